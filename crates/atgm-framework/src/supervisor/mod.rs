//! Lifecycle supervision of running plugins.
//!
//! The [`Supervisor`] runs every started plugin on its own OS thread, driven
//! by a private current-thread runtime. The thread reads the plugin's bus
//! subscription and calls its handler sequentially, so a handler that blocks
//! only delays its own queue. A handler that errors or panics beyond its
//! budget is unsubscribed and marked [`PluginState::Failed`] without touching
//! any other plugin or the publisher.
//!
//! ```text
//!              start()                       stop()
//! Created ────────────► Running ───────────────────────► Stopped
//!    │                     │  handler errors > budget
//!    │ start fails         ▼
//!    └──────────────────► Failed ──restart policy──► Running
//! ```
//!
//! Stopping cancels the instance's token and waits up to the grace timeout for
//! the thread. Past that the plugin is aborted: its worker is dropped at the
//! next await point and its thread is left to finish on its own. Shutdown
//! therefore completes even when a handler never returns.

mod worker;

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use atgm_core::{CapabilitySet, DataBus, QueueOptions, SubscriptionId};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{PluginError, SupervisorError, SupervisorResult};
use crate::plugin::{PluginContext, PluginDescriptor, PluginInstance, PluginState};

use worker::{Worker, spawn_plugin_thread};

/// Default time a plugin is given to stop before it is aborted.
pub const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(2);

// ─── Configuration ────────────────────────────────────────────────────────────

/// What happens to a plugin after it failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// The plugin stays failed.
    #[default]
    Never,
    /// Re-create and restart the plugin after `backoff`, at most
    /// `max_restarts` times over its lifetime.
    OnFailure {
        /// Restart attempts before giving up.
        max_restarts: u32,
        /// Delay before each attempt.
        backoff: Duration,
    },
}

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time a plugin is given to stop before it is aborted.
    pub grace_timeout: Duration,
    /// Behaviour after a plugin failed.
    pub restart: RestartPolicy,
    /// Handler errors tolerated before a plugin is failed. `0` fails on the
    /// first error. Plugins may override it with their `error_budget` option.
    pub error_budget: u32,
    /// Capabilities exposed to plugins through their [`PluginContext`].
    pub capabilities: CapabilitySet,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_timeout: DEFAULT_GRACE_TIMEOUT,
            restart: RestartPolicy::Never,
            error_budget: 0,
            capabilities: CapabilitySet::default(),
        }
    }
}

// ─── Per-instance shared state ────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    errors: AtomicU64,
    restarts: AtomicU64,
    dropped: AtomicU64,
}

/// State shared between the supervisor, handles and the worker thread.
pub(crate) struct Slot {
    descriptor: PluginDescriptor,
    state: watch::Sender<PluginState>,
    counters: Counters,
    subscription: Mutex<Option<SubscriptionId>>,
    cancel: CancellationToken,
    abort: CancellationToken,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Slot {
    fn name(&self) -> &'static str {
        self.descriptor.name
    }

    fn state(&self) -> PluginState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PluginState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(plugin = %self.name(), from = %previous, to = %state, "Plugin state changed");
        }
    }

    /// Moves to `Stopped` unless the plugin already failed.
    fn mark_stopped(&self) {
        let changed = self.state.send_if_modified(|state| match *state {
            PluginState::Failed | PluginState::Stopped => false,
            _ => {
                *state = PluginState::Stopped;
                true
            }
        });
        if changed {
            info!(plugin = %self.name(), "Plugin stopped");
        }
    }

    fn attach(&self, id: SubscriptionId) {
        *self.subscription.lock() = Some(id);
    }

    /// Removes the current subscription from the bus, keeping its drop count.
    fn release(&self, bus: &DataBus) {
        let Some(id) = self.subscription.lock().take() else {
            return;
        };
        if let Some(stats) = bus.stats().into_iter().find(|s| s.id == id) {
            self.counters.dropped.fetch_add(stats.dropped, Ordering::Relaxed);
        }
        bus.unsubscribe(id);
    }

    fn stats(&self, bus: &DataBus) -> PluginStats {
        let live = *self.subscription.lock();
        let (queued, live_dropped) = live
            .and_then(|id| bus.stats().into_iter().find(|s| s.id == id))
            .map_or((0, 0), |s| (s.queued, s.dropped));

        PluginStats {
            name: self.name(),
            state: self.state(),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            restarts: self.counters.restarts.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed) + live_dropped,
            queued,
        }
    }
}

// ─── InstanceHandle ───────────────────────────────────────────────────────────

/// A cheap, cloneable view of a supervised plugin.
#[derive(Clone)]
pub struct InstanceHandle {
    slot: Arc<Slot>,
}

impl InstanceHandle {
    /// The plugin's name.
    pub fn name(&self) -> &'static str {
        self.slot.name()
    }

    /// The plugin's current state.
    pub fn state(&self) -> PluginState {
        self.slot.state()
    }

    /// Waits until the plugin's state satisfies `predicate` and returns it.
    pub async fn wait_until(&self, mut predicate: impl FnMut(PluginState) -> bool) -> PluginState {
        let mut rx = self.slot.state.subscribe();
        match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Waits until the plugin reaches `state`.
    pub async fn wait_for(&self, state: PluginState) {
        self.wait_until(|s| s == state).await;
    }

    /// A receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<PluginState> {
        self.slot.state.subscribe()
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Counters of one supervised plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStats {
    /// Plugin name.
    pub name: &'static str,
    /// Current state.
    pub state: PluginState,
    /// Records handed to the handler.
    pub delivered: u64,
    /// Handler errors and panics.
    pub errors: u64,
    /// Restart attempts made.
    pub restarts: u64,
    /// Records discarded by the overflow policy.
    pub dropped: u64,
    /// Records waiting in the queue.
    pub queued: usize,
}

// ─── Supervisor ───────────────────────────────────────────────────────────────

/// Starts, monitors and stops plugin instances.
pub struct Supervisor {
    bus: DataBus,
    config: SupervisorConfig,
    root: CancellationToken,
    slots: Mutex<Vec<Arc<Slot>>>,
}

impl Supervisor {
    /// Creates a supervisor delivering records from `bus`.
    pub fn new(bus: DataBus, config: SupervisorConfig) -> Self {
        Self {
            bus,
            config,
            root: CancellationToken::new(),
            slots: Mutex::new(Vec::new()),
        }
    }

    /// The bus plugins are subscribed to.
    pub fn bus(&self) -> &DataBus {
        &self.bus
    }

    /// The supervisor's settings.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Starts a plugin instance.
    ///
    /// Spawns the plugin's thread, which calls `Plugin::start`. On success
    /// the plugin is subscribed to the bus before this returns. On failure
    /// the instance is recorded as `Failed` and never subscribed.
    pub async fn start(&self, instance: PluginInstance) -> SupervisorResult<InstanceHandle> {
        let (descriptor, config, delivery, plugin) = instance.into_parts();
        let name = descriptor.name;

        let slot = {
            let mut slots = self.slots.lock();
            if slots.iter().any(|s| s.name() == name) {
                return Err(SupervisorError::AlreadySupervised(name.to_string()));
            }
            let slot = Arc::new(Slot {
                descriptor,
                state: watch::Sender::new(PluginState::Created),
                counters: Counters::default(),
                subscription: Mutex::new(None),
                cancel: self.root.child_token(),
                abort: CancellationToken::new(),
                done: Mutex::new(None),
            });
            slots.push(slot.clone());
            slot
        };
        let handle = InstanceHandle { slot: slot.clone() };

        let ctx = PluginContext::new(
            config.clone(),
            self.config.capabilities.clone(),
            slot.cancel.clone(),
        );

        let defaults = self.bus.config().queue_options();
        let queue = QueueOptions {
            capacity: delivery
                .queue_capacity
                .map_or(defaults.capacity, NonZeroUsize::get),
            overflow: delivery.overflow.unwrap_or(defaults.overflow),
        };

        let worker = Worker {
            slot: slot.clone(),
            bus: self.bus.clone(),
            plugin,
            config,
            ctx,
            queue,
            interval: delivery.interval(),
            error_budget: delivery.error_budget.unwrap_or(self.config.error_budget),
            restart: self.config.restart,
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let span = info_span!("plugin", name = %name);
        let spawned = spawn_plugin_thread(name, slot.abort.clone(), move || {
            worker.run(ready_tx).instrument(span)
        });

        let started = match spawned {
            Ok(done) => {
                *slot.done.lock() = Some(done);
                ready_rx.await.unwrap_or(Err(PluginError::Exited))
            }
            Err(e) => Err(PluginError::Spawn(e)),
        };
        if let Err(e) = started {
            slot.set_state(PluginState::Failed);
            error!(plugin = %name, error = %e, "Plugin failed to start");
            return Err(SupervisorError::Start {
                name: name.to_string(),
                source: e,
            });
        }

        info!(
            plugin = %name,
            capacity = queue.capacity,
            interval = delivery.interval(),
            "Plugin started"
        );
        Ok(handle)
    }

    /// Stops one plugin and returns its final state.
    ///
    /// Returns within the grace timeout (plus scheduling latency) even if the
    /// plugin's handler never returns.
    pub async fn stop(&self, name: &str) -> SupervisorResult<PluginState> {
        let slot = self
            .find(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        Ok(self.stop_slot(&slot).await)
    }

    /// Stops every plugin concurrently, each bounded by the grace timeout.
    pub async fn stop_all(&self) {
        let slots: Vec<_> = self.slots.lock().clone();
        if slots.is_empty() {
            return;
        }
        info!(count = slots.len(), "Stopping all plugins");
        futures::future::join_all(slots.iter().map(|slot| self.stop_slot(slot))).await;
    }

    async fn stop_slot(&self, slot: &Slot) -> PluginState {
        let name = slot.name();
        slot.cancel.cancel();

        let done = slot.done.lock().take();
        if let Some(done) = done {
            match tokio::time::timeout(self.config.grace_timeout, done).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    error!(plugin = %name, "Plugin thread exited abnormally");
                }
                Err(_) => {
                    warn!(
                        plugin = %name,
                        grace_ms = self.config.grace_timeout.as_millis() as u64,
                        "Plugin did not stop within the grace period; aborting"
                    );
                    slot.abort.cancel();
                }
            }
        }

        slot.release(&self.bus);
        slot.mark_stopped();
        slot.state()
    }

    fn find(&self, name: &str) -> Option<Arc<Slot>> {
        self.slots.lock().iter().find(|s| s.name() == name).cloned()
    }

    /// Current state of a supervised plugin.
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.find(name).map(|s| s.state())
    }

    /// Handle to a supervised plugin.
    pub fn handle(&self, name: &str) -> Option<InstanceHandle> {
        self.find(name).map(|slot| InstanceHandle { slot })
    }

    /// Handles of every supervised plugin, in start order.
    pub fn handles(&self) -> Vec<InstanceHandle> {
        self.slots
            .lock()
            .iter()
            .map(|slot| InstanceHandle { slot: slot.clone() })
            .collect()
    }

    /// Counters of every supervised plugin, in start order.
    pub fn stats(&self) -> Vec<PluginStats> {
        let slots: Vec<_> = self.slots.lock().clone();
        slots.iter().map(|s| s.stats(&self.bus)).collect()
    }

    /// Number of supervised plugins, whatever their state.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` when no plugin is supervised.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every plugin in a terminal state.
    pub fn clear_terminated(&self) {
        self.slots.lock().retain(|s| !s.state().is_terminal());
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("plugins", &self.len())
            .finish()
    }
}
