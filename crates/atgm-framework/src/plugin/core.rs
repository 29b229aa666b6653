use std::sync::Arc;

use async_trait::async_trait;
use atgm_core::{BoxError, CapabilitySet, Record};
use tokio_util::sync::CancellationToken;

use super::config::PluginConfig;

// ─── PluginContext ────────────────────────────────────────────────────────────

/// Context handed to a plugin when it starts.
///
/// Gives access to the plugin's configuration section and to the cancellation
/// token the supervisor trips when the host shuts down. Plugins that spawn
/// their own background work should tie it to [`cancelled`](Self::cancelled).
///
/// # Example
///
/// ```rust,ignore
/// #[derive(serde::Deserialize)]
/// struct UplinkConfig { endpoint: String }
///
/// async fn start(&mut self, ctx: &PluginContext) -> Result<(), BoxError> {
///     let cfg: UplinkConfig = ctx.get_config()?;
///     info!(endpoint = %cfg.endpoint, "uplink configured");
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct PluginContext {
    config: Arc<PluginConfig>,
    capabilities: CapabilitySet,
    cancel: CancellationToken,
}

impl PluginContext {
    pub(crate) fn new(
        config: Arc<PluginConfig>,
        capabilities: CapabilitySet,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            capabilities,
            cancel,
        }
    }

    /// The plugin's name.
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// The plugin's configuration section.
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Deserialises the plugin's configuration section into `T`.
    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.config.get_config()
    }

    /// Capabilities offered by the host.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Token cancelled when the plugin is asked to stop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves once the plugin has been asked to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// A live plugin instance.
///
/// The supervisor drives every instance on its own thread:
///
/// ```text
/// start(ctx) ──► handle(record) … handle(record) ──► stop()
/// ```
///
/// `handle` is called once per delivered record, strictly in publish order.
/// Returning `Err` (or panicking) counts against the plugin's error budget;
/// once the budget is exhausted the plugin is failed and unsubscribed, without
/// affecting the logger or any other plugin.
///
/// Each instance runs on a dedicated thread, so handlers may block or do I/O
/// freely: only the plugin's own queue backs up. A handler still blocked when
/// the stop grace period ends is abandoned and [`stop`](Plugin::stop) is not
/// called.
#[async_trait]
pub trait Plugin: Send + 'static {
    /// Called once before the first record is delivered.
    async fn start(&mut self, ctx: &PluginContext) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }

    /// Processes one record.
    async fn handle(&mut self, record: Arc<Record>) -> Result<(), BoxError>;

    /// Called once when the plugin is stopped gracefully.
    async fn stop(&mut self) {}
}

/// Owned, type-erased plugin instance.
pub type BoxedPlugin = Box<dyn Plugin>;
