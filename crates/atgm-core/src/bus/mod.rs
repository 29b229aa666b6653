//! The data bus: single-producer, multi-consumer fan-out of records.
//!
//! ```text
//!                          ┌──────────────┐
//!                     ┌───▶│ queue "mqtt" │───▶ worker task
//! ┌───────────┐       │    └──────────────┘
//! │ Publisher │──▶ DataBus
//! └───────────┘       │    ┌──────────────┐
//!                     └───▶│ queue "disk" │───▶ worker task
//!                          └──────────────┘
//! ```
//!
//! Every subscriber owns a bounded queue. Publishing only ever pushes into
//! those queues, so a slow or stuck consumer can neither block the producer
//! nor delay its siblings. When a queue is full its [`OverflowPolicy`] decides
//! which record is discarded and the subscriber's drop counter is incremented.
//!
//! # Example
//!
//! ```rust
//! use atgm_core::{BusConfig, DataBus};
//!
//! let bus = DataBus::new(BusConfig::default());
//! let sub = bus.subscribe("printer");
//! let mut publisher = bus.publisher().unwrap();
//!
//! publisher.publish_line("$UW,20083,-1369");
//! assert_eq!(sub.try_recv().unwrap().line(), "$UW,20083,-1369");
//! ```

mod queue;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BusError, BusResult};
use crate::record::Record;

pub use queue::{DEFAULT_QUEUE_CAPACITY, OverflowPolicy, QueueOptions, Subscription, SubscriptionId};

use queue::Queue;

/// Bus-wide defaults applied to new subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default per-subscriber queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Default overflow policy.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl BusConfig {
    /// Queue options derived from the bus defaults.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            capacity: self.queue_capacity,
            overflow: self.overflow,
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

struct BusInner {
    config: BusConfig,
    subscribers: RwLock<Vec<Arc<Queue>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    publisher_taken: AtomicBool,
}

/// In-process fan-out channel from the acquisition loop to the plugins.
///
/// `DataBus` is a cheap, clonable handle; all clones refer to the same bus.
#[derive(Clone)]
pub struct DataBus {
    inner: Arc<BusInner>,
}

impl DataBus {
    /// Creates an empty bus.
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                publisher_taken: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the bus defaults.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Subscribes with the bus default queue options.
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        self.subscribe_with(name, self.inner.config.queue_options())
    }

    /// Subscribes with explicit queue options.
    ///
    /// The subscriber receives every record published after this call
    /// returns; records published earlier are never replayed.
    pub fn subscribe_with(&self, name: impl Into<String>, options: QueueOptions) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(Queue::new(id, name.into(), options));
        debug!(
            subscriber = %queue.name,
            id = %id,
            capacity = options.capacity,
            overflow = ?options.overflow,
            "Subscribed to data bus"
        );
        self.inner.subscribers.write().push(Arc::clone(&queue));
        Subscription::new(queue)
    }

    /// Removes a subscription.
    ///
    /// The subscriber's queue is closed: records already queued can still be
    /// received, after which [`Subscription::recv`] yields `None`.
    /// Returns `false` if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut subscribers = self.inner.subscribers.write();
            subscribers
                .iter()
                .position(|q| q.id == id)
                .map(|pos| subscribers.remove(pos))
        };
        match removed {
            Some(queue) => {
                queue.close();
                debug!(subscriber = %queue.name, id = %id, "Unsubscribed from data bus");
                true
            }
            None => false,
        }
    }

    /// Delivers `record` to every current subscriber, in subscription order.
    ///
    /// Never blocks on consumers and never fails; full queues apply their
    /// overflow policy instead. Producers go through the [`Publisher`].
    pub(crate) fn publish(&self, record: Record) {
        let record = Arc::new(record);
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut stale = false;
        {
            let subscribers = self.inner.subscribers.read();
            for queue in subscribers.iter() {
                if queue.is_closed() {
                    stale = true;
                    continue;
                }
                queue.push(Arc::clone(&record));
            }
        }

        if stale {
            self.inner.subscribers.write().retain(|q| !q.is_closed());
        }
    }

    /// Takes the producer handle.
    ///
    /// Only one [`Publisher`] may exist at a time; it is released when
    /// dropped.
    pub fn publisher(&self) -> BusResult<Publisher> {
        if self.inner.publisher_taken.swap(true, Ordering::AcqRel) {
            return Err(BusError::PublisherTaken);
        }
        Ok(Publisher {
            bus: self.clone(),
            next_seq: 0,
        })
    }

    /// Number of records published so far.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .iter()
            .filter(|q| !q.is_closed())
            .count()
    }

    /// Returns `true` if `id` is currently subscribed.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner
            .subscribers
            .read()
            .iter()
            .any(|q| q.id == id && !q.is_closed())
    }

    /// Per-subscriber queue statistics, in subscription order.
    pub fn stats(&self) -> Vec<SubscriberStats> {
        self.inner
            .subscribers
            .read()
            .iter()
            .map(|q| SubscriberStats {
                id: q.id,
                name: q.name.clone(),
                queued: q.len(),
                dropped: q.dropped(),
                delivered: q.delivered(),
            })
            .collect()
    }
}

impl Default for DataBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl fmt::Debug for DataBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBus")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published())
            .finish()
    }
}

/// Queue statistics of one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Subscription token.
    pub id: SubscriptionId,
    /// Name the subscription was registered under.
    pub name: String,
    /// Records waiting to be received.
    pub queued: usize,
    /// Records discarded by the overflow policy.
    pub dropped: u64,
    /// Records handed to the consumer.
    pub delivered: u64,
}

/// The single producer handle of a [`DataBus`].
///
/// Publishing takes `&mut self`, so the acquisition loop is sequential by
/// construction. Records published through [`publish_line`](Self::publish_line)
/// are numbered from zero.
pub struct Publisher {
    bus: DataBus,
    next_seq: u64,
}

impl Publisher {
    /// Publishes a prepared record.
    pub fn publish(&mut self, record: Record) {
        self.next_seq = self.next_seq.max(record.seq().saturating_add(1));
        self.bus.publish(record);
    }

    /// Stamps `line` with the next sequence number and the current time, then
    /// publishes it. Returns the assigned sequence number.
    pub fn publish_line(&mut self, line: impl Into<String>) -> u64 {
        let seq = self.next_seq;
        self.next_seq = seq.saturating_add(1);
        self.bus.publish(Record::now(seq, line));
        seq
    }

    /// The bus this publisher feeds.
    pub fn bus(&self) -> &DataBus {
        &self.bus
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.bus
            .inner
            .publisher_taken
            .store(false, Ordering::Release);
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_bus(capacity: usize, overflow: OverflowPolicy) -> DataBus {
        DataBus::new(BusConfig {
            queue_capacity: capacity,
            overflow,
        })
    }

    fn drain(sub: &Subscription) -> Vec<u64> {
        std::iter::from_fn(|| sub.try_recv()).map(|r| r.seq()).collect()
    }

    #[test]
    fn test_fifo_without_overflow() {
        let bus = DataBus::default();
        let sub = bus.subscribe("a");
        let mut publisher = bus.publisher().unwrap();

        for i in 0..20 {
            publisher.publish_line(format!("line {i}"));
        }

        assert_eq!(drain(&sub), (0..20).collect::<Vec<_>>());
        assert_eq!(sub.dropped(), 0);
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let bus = small_bus(4, OverflowPolicy::DropOldest);
        let sub = bus.subscribe("slow");
        let mut publisher = bus.publisher().unwrap();

        for i in 0..10 {
            publisher.publish_line(format!("{i}"));
        }

        assert_eq!(drain(&sub), vec![6, 7, 8, 9]);
        assert_eq!(sub.dropped(), 6);
    }

    #[test]
    fn test_drop_newest_keeps_earliest() {
        let bus = small_bus(3, OverflowPolicy::DropNewest);
        let sub = bus.subscribe("slow");
        let mut publisher = bus.publisher().unwrap();

        for i in 0..5 {
            publisher.publish_line(format!("{i}"));
        }

        assert_eq!(drain(&sub), vec![0, 1, 2]);
        assert_eq!(sub.dropped(), 2);
    }

    #[test]
    fn test_overflow_is_isolated_per_subscriber() {
        let bus = small_bus(2, OverflowPolicy::DropOldest);
        let slow = bus.subscribe("slow");
        let fast = bus.subscribe_with(
            "fast",
            QueueOptions {
                capacity: 16,
                overflow: OverflowPolicy::DropOldest,
            },
        );
        let mut publisher = bus.publisher().unwrap();

        for i in 0..5 {
            publisher.publish_line(format!("{i}"));
        }

        assert_eq!(drain(&fast), vec![0, 1, 2, 3, 4]);
        assert_eq!(drain(&slow), vec![3, 4]);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(slow.dropped(), 3);
    }

    #[test]
    fn test_late_subscriber_sees_only_later_records() {
        let bus = DataBus::default();
        let mut publisher = bus.publisher().unwrap();
        publisher.publish_line("early");

        let sub = bus.subscribe("late");
        publisher.publish_line("later");

        assert_eq!(drain(&sub), vec![1]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = DataBus::default();
        let sub = bus.subscribe("a");
        let mut publisher = bus.publisher().unwrap();

        publisher.publish_line("0");
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
        publisher.publish_line("1");

        assert!(sub.is_closed());
        assert_eq!(drain(&sub), vec![0]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_single_publisher() {
        let bus = DataBus::default();
        let first = bus.publisher().unwrap();
        assert!(matches!(bus.publisher(), Err(BusError::PublisherTaken)));
        drop(first);
        assert!(bus.publisher().is_ok());
    }

    #[test]
    fn test_sequence_saturates_at_max() {
        let bus = DataBus::default();
        let sub = bus.subscribe("tail");
        let mut publisher = bus.publisher().unwrap();

        publisher.publish(Record::now(u64::MAX, "last"));
        assert_eq!(publisher.publish_line("after"), u64::MAX);
        assert_eq!(sub.try_recv().map(|r| r.seq()), Some(u64::MAX));
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let bus = DataBus::default();
        let sub = bus.subscribe("gone");
        let _keep = bus.subscribe("kept");
        drop(sub);

        bus.publisher().unwrap().publish_line("x");

        let stats = bus.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, "kept");
        assert_eq!(stats[0].queued, 1);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let bus = DataBus::default();
        let sub = bus.subscribe("waiter");
        let producer = bus.clone();

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(record) = sub.recv().await {
                seen.push(record.seq());
            }
            seen
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut publisher = producer.publisher().unwrap();
        for i in 0..3 {
            publisher.publish_line(format!("{i}"));
        }
        let id = producer.stats()[0].id;
        producer.unsubscribe(id);

        let seen = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
