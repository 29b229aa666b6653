//! # atgm framework
//!
//! Plugin layer of the atgm logger plugin host.
//!
//! This layer provides:
//! - Plugin descriptors and the [`define_plugin!`] macro
//! - The plugin registry: discovery and configuration-driven activation
//! - The lifecycle supervisor: one isolated delivery task per plugin, error
//!   budgets, restart policy and bounded shutdown
//!
//! It sits on top of the data bus from `atgm-core` and never feeds errors back
//! to the acquisition loop.

pub mod error;
pub mod plugin;
pub mod supervisor;

pub use error::{
    ActivationError, DiscoveryError, PluginConfigError, PluginError, SupervisorError,
    SupervisorResult,
};
pub use plugin::{
    ATGM_PLUGIN_API_VERSION, Activation, ActivationFailure, Discovery, PLUGINS, Plugin,
    PluginConfig, PluginConfigs, PluginContext, PluginDescriptor, PluginInstance, PluginRegistry,
    PluginState,
};
pub use supervisor::{
    DEFAULT_GRACE_TIMEOUT, InstanceHandle, PluginStats, RestartPolicy, Supervisor,
    SupervisorConfig,
};

// ─── Macro-internal re-exports (needed by define_plugin! at call sites) ───────
pub use atgm_core::{BoxError, Capability, CapabilitySet};
#[doc(hidden)]
pub use linkme;
