//! The per-plugin delivery loop and the thread it runs on.

use std::future::Future;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use atgm_core::{DataBus, QueueOptions, Record, Subscription};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{RestartPolicy, Slot};
use crate::error::{PluginError, panic_message};
use crate::plugin::{BoxedPlugin, PluginConfig, PluginContext, PluginState};

/// Why the delivery loop returned.
enum Exit {
    /// The instance's cancellation token fired.
    Cancelled,
    /// The subscription was removed from the bus by someone else.
    Closed,
    /// The error budget was exceeded.
    Failed {
        error: PluginError,
        record: Arc<Record>,
    },
}

pub(crate) struct Worker {
    pub(crate) slot: Arc<Slot>,
    pub(crate) bus: DataBus,
    pub(crate) plugin: BoxedPlugin,
    pub(crate) config: Arc<PluginConfig>,
    pub(crate) ctx: PluginContext,
    pub(crate) queue: QueueOptions,
    pub(crate) interval: u64,
    pub(crate) error_budget: u32,
    pub(crate) restart: RestartPolicy,
}

impl Worker {
    /// Starts the plugin, reports the outcome on `ready`, then delivers
    /// records until cancelled.
    pub(crate) async fn run(mut self, ready: oneshot::Sender<Result<(), PluginError>>) {
        let name = self.slot.name();
        if let Err(e) = start_plugin(&mut self.plugin, &self.ctx).await {
            let _ = ready.send(Err(e));
            return;
        }
        let mut subscription = self.subscribe();
        let _ = ready.send(Ok(()));

        loop {
            match self.deliver(&subscription).await {
                Exit::Cancelled | Exit::Closed => {
                    // Aborted plugins are not given a chance to stop.
                    if self.slot.abort.is_cancelled() {
                        debug!(plugin = %name, "Abandoned plugin worker exited");
                        return;
                    }
                    if AssertUnwindSafe(self.plugin.stop())
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        warn!(plugin = %name, "Plugin panicked while stopping");
                    }
                    self.slot.release(&self.bus);
                    self.slot.mark_stopped();
                    debug!(plugin = %name, "Plugin worker exited");
                    return;
                }
                Exit::Failed { error, record } => {
                    self.slot.release(&self.bus);
                    self.slot.set_state(PluginState::Failed);
                    error!(
                        plugin = %name,
                        seq = record.seq(),
                        line = %record.line(),
                        error = %error,
                        "Plugin failed; unsubscribed from the data bus"
                    );
                    match self.restart().await {
                        Some(next) => subscription = next,
                        None => return,
                    }
                }
            }
        }
    }

    fn subscribe(&self) -> Subscription {
        let subscription = self.bus.subscribe_with(self.slot.name(), self.queue);
        self.slot.attach(subscription.id());
        self.slot.set_state(PluginState::Running);
        subscription
    }

    async fn deliver(&mut self, subscription: &Subscription) -> Exit {
        let name = self.slot.name();
        let mut seen: u64 = 0;
        let mut errors: u32 = 0;

        loop {
            let record = tokio::select! {
                biased;
                () = self.ctx.cancelled() => return Exit::Cancelled,
                next = subscription.recv() => match next {
                    Some(record) => record,
                    None => return Exit::Closed,
                },
            };

            seen += 1;
            if seen % self.interval != 0 {
                continue;
            }

            self.slot.counters.delivered.fetch_add(1, Ordering::Relaxed);
            let outcome = AssertUnwindSafe(self.plugin.handle(record.clone()))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => PluginError::Handler(e),
                Err(payload) => PluginError::Panicked(panic_message(payload.as_ref())),
            };

            self.slot.counters.errors.fetch_add(1, Ordering::Relaxed);
            errors += 1;
            if errors > self.error_budget {
                return Exit::Failed { error, record };
            }
            warn!(
                plugin = %name,
                seq = record.seq(),
                error = %error,
                remaining = self.error_budget - errors,
                "Plugin handler error"
            );
        }
    }

    /// Applies the restart policy after a failure.
    ///
    /// Returns the new subscription once the plugin is running again.
    async fn restart(&mut self) -> Option<Subscription> {
        let name = self.slot.name();
        let RestartPolicy::OnFailure {
            max_restarts,
            backoff,
        } = self.restart
        else {
            return None;
        };

        loop {
            let attempt = self.slot.counters.restarts.load(Ordering::Relaxed);
            if attempt >= u64::from(max_restarts) {
                warn!(plugin = %name, restarts = attempt, "Restart limit reached; plugin stays failed");
                return None;
            }

            tokio::select! {
                biased;
                () = self.ctx.cancelled() => return None,
                () = tokio::time::sleep(backoff) => {}
            }
            self.slot.counters.restarts.fetch_add(1, Ordering::Relaxed);

            let created = catch_unwind(AssertUnwindSafe(|| {
                self.slot.descriptor.instantiate(&self.config)
            }));
            let mut plugin = match created {
                Ok(Ok(plugin)) => plugin,
                Ok(Err(e)) => {
                    error!(plugin = %name, error = %e, "Plugin factory failed during restart");
                    continue;
                }
                Err(payload) => {
                    error!(
                        plugin = %name,
                        error = %panic_message(payload.as_ref()),
                        "Plugin factory panicked during restart"
                    );
                    continue;
                }
            };

            if let Err(e) = start_plugin(&mut plugin, &self.ctx).await {
                error!(plugin = %name, error = %e, "Plugin failed to start during restart");
                continue;
            }

            self.plugin = plugin;
            let subscription = self.subscribe();
            info!(plugin = %name, attempt = attempt + 1, "Plugin restarted");
            return Some(subscription);
        }
    }
}

/// Runs `Plugin::start`, converting errors and panics to [`PluginError`].
async fn start_plugin(
    plugin: &mut BoxedPlugin,
    ctx: &PluginContext,
) -> Result<(), PluginError> {
    match AssertUnwindSafe(plugin.start(ctx)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PluginError::Start(e)),
        Err(payload) => Err(PluginError::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Runs a plugin's worker on a dedicated OS thread with its own
/// current-thread runtime.
///
/// A handler that blocks the thread only delays its own queue. The returned
/// receiver resolves when the thread finishes; it errors if the thread
/// panicked. Cancelling `abort` drops the worker at its next await point.
pub(crate) fn spawn_plugin_thread<F, Fut>(
    name: &'static str,
    abort: CancellationToken,
    worker: F,
) -> io::Result<oneshot::Receiver<()>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(format!("plugin-{name}"))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(plugin = %name, error = %e, "Failed to build plugin runtime");
                    return;
                }
            };
            runtime.block_on(async move {
                tokio::select! {
                    biased;
                    () = abort.cancelled() => {}
                    () = worker() => {}
                }
            });
            let _ = done_tx.send(());
        })?;
    Ok(done_rx)
}
