use std::fmt;
use std::sync::Arc;

use super::config::{DeliveryOptions, PluginConfig};
use super::core::BoxedPlugin;
use super::descriptor::PluginDescriptor;
use crate::error::ActivationError;

/// Lifecycle state of a plugin instance.
///
/// ```text
/// activate() ──► Created ──start()──► Running ──stop()──────────► Stopped
///                   │                    │
///                   └──start fails──┐    └──handler fails──┐
///                                   ▼                      ▼
///                                 Failed ◄──restart gives up
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Instantiated by the registry, not yet started.
    Created,
    /// Subscribed to the bus and processing records.
    Running,
    /// Unsubscribed after an unrecoverable error.
    Failed,
    /// Unsubscribed after a requested stop.
    Stopped,
}

impl PluginState {
    /// Returns `true` for `Failed` and `Stopped`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin built by the registry and waiting to be handed to the supervisor.
pub struct PluginInstance {
    descriptor: PluginDescriptor,
    config: Arc<PluginConfig>,
    delivery: DeliveryOptions,
    plugin: BoxedPlugin,
}

impl PluginInstance {
    pub(crate) fn new(
        descriptor: PluginDescriptor,
        config: Arc<PluginConfig>,
        delivery: DeliveryOptions,
        plugin: BoxedPlugin,
    ) -> Self {
        Self {
            descriptor,
            config,
            delivery,
            plugin,
        }
    }

    /// The plugin's unique name.
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// The descriptor the instance was built from.
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// The configuration section the factory received.
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Delivery overrides read from the configuration section.
    pub fn delivery(&self) -> DeliveryOptions {
        self.delivery
    }

    /// Instances returned by the registry are always `Created`.
    pub fn state(&self) -> PluginState {
        PluginState::Created
    }

    pub(crate) fn into_parts(
        self,
    ) -> (PluginDescriptor, Arc<PluginConfig>, DeliveryOptions, BoxedPlugin) {
        (self.descriptor, self.config, self.delivery, self.plugin)
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.descriptor.name)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// A configured plugin that could not be activated.
#[derive(Debug)]
pub struct ActivationFailure {
    /// Plugin name.
    pub name: String,
    /// Why activation failed.
    pub error: ActivationError,
}

impl ActivationFailure {
    /// Failed activations are recorded in the `Failed` state.
    pub fn state(&self) -> PluginState {
        PluginState::Failed
    }
}
