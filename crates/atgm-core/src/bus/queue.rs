//! Per-subscriber bounded queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::trace;

use crate::record::Record;

/// Default number of records buffered per subscriber.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// What a subscriber queue does with a record that arrives while it is full.
///
/// The publisher is never blocked, whichever policy is selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued record to make room for the new one.
    #[default]
    DropOldest,
    /// Keep the queued records and discard the incoming one.
    DropNewest,
}

/// Capacity and overflow behaviour of a single subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum number of buffered records. Clamped to at least 1.
    pub capacity: usize,
    /// Behaviour when the queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Opaque token identifying a subscription on a [`DataBus`](super::DataBus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub(crate) struct Queue {
    pub(crate) id: SubscriptionId,
    pub(crate) name: String,
    options: QueueOptions,
    buf: Mutex<VecDeque<Arc<Record>>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl Queue {
    pub(crate) fn new(id: SubscriptionId, name: String, options: QueueOptions) -> Self {
        let capacity = options.capacity.max(1);
        Self {
            id,
            name,
            options: QueueOptions {
                capacity,
                ..options
            },
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Enqueues `record`, applying the overflow policy. Never blocks.
    pub(crate) fn push(&self, record: Arc<Record>) {
        if self.is_closed() {
            return;
        }
        {
            let mut buf = self.buf.lock();
            if buf.len() >= self.options.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match self.options.overflow {
                    OverflowPolicy::DropOldest => {
                        if let Some(evicted) = buf.pop_front() {
                            trace!(
                                subscriber = %self.name,
                                seq = evicted.seq(),
                                "Queue full, dropped oldest record"
                            );
                        }
                    }
                    OverflowPolicy::DropNewest => {
                        trace!(
                            subscriber = %self.name,
                            seq = record.seq(),
                            "Queue full, dropped incoming record"
                        );
                        return;
                    }
                }
            }
            buf.push_back(record);
        }
        self.notify.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<Arc<Record>> {
        let record = self.buf.lock().pop_front();
        if record.is_some() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// The receiving end of a bus subscription.
///
/// Records arrive in publish order. Dropping the subscription closes its
/// queue; the bus prunes it on the next publish.
pub struct Subscription {
    queue: Arc<Queue>,
}

impl Subscription {
    pub(crate) fn new(queue: Arc<Queue>) -> Self {
        Self { queue }
    }

    /// Token identifying this subscription on the bus.
    pub fn id(&self) -> SubscriptionId {
        self.queue.id
    }

    /// Name the subscription was registered under.
    pub fn name(&self) -> &str {
        &self.queue.name
    }

    /// Waits for the next record.
    ///
    /// Returns `None` once the subscription has been removed from the bus and
    /// every record queued before that has been received.
    pub async fn recv(&self) -> Option<Arc<Record>> {
        loop {
            if let Some(record) = self.queue.pop() {
                return Some(record);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Takes the next record without waiting.
    pub fn try_recv(&self) -> Option<Arc<Record>> {
        self.queue.pop()
    }

    /// Number of records currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` when no record is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Returns `true` once the subscription has been removed from the bus.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.queue.id)
            .field("name", &self.queue.name)
            .field("queued", &self.queue.len())
            .field("dropped", &self.queue.dropped())
            .finish()
    }
}
