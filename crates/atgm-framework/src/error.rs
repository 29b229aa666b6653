//! Error types for plugin discovery, activation and supervision.
//!
//! None of these errors is ever propagated to the acquisition loop: the
//! registry and the supervisor record them, log them, and carry on with the
//! remaining plugins.

use atgm_core::{BoxError, Capability};
use thiserror::Error;

/// A descriptor that could not be accepted during discovery.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// The descriptor has an empty or blank name.
    #[error("plugin descriptor has an empty name")]
    EmptyName,

    /// The descriptor was built against an incompatible plugin API.
    #[error("plugin '{name}' targets API {found}, host provides {expected}")]
    IncompatibleApi {
        /// Plugin name.
        name: String,
        /// `major.minor` the descriptor was built against.
        found: String,
        /// `major.minor` of the host.
        expected: String,
    },

    /// Another descriptor with the same name was already discovered.
    #[error("plugin '{0}' is provided more than once; keeping the first")]
    Duplicate(String),
}

impl DiscoveryError {
    /// The plugin name involved, when known.
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            Self::EmptyName => None,
            Self::IncompatibleApi { name, .. } | Self::Duplicate(name) => Some(name),
        }
    }
}

/// The `plugins` configuration object has an unexpected shape.
#[derive(Debug, Clone, Error)]
pub enum PluginConfigError {
    /// The top-level plugin configuration is not a JSON object.
    #[error("plugin configuration must be an object keyed by plugin name, got {0}")]
    NotAnObject(&'static str),

    /// A plugin section is neither an object, a boolean, nor null.
    #[error("section for plugin '{name}' must be an object, boolean or null, got {kind}")]
    InvalidSection {
        /// Plugin name (the section key).
        name: String,
        /// JSON kind that was found instead.
        kind: &'static str,
    },
}

/// Why a configured plugin could not be instantiated.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The host does not offer every capability the plugin requires.
    #[error("missing capabilities: {}", format_capabilities(.0))]
    MissingCapabilities(Vec<Capability>),

    /// The plugin's factory returned an error.
    #[error("factory failed: {0}")]
    Factory(#[source] BoxError),

    /// The plugin's factory panicked.
    #[error("factory panicked: {0}")]
    FactoryPanicked(String),

    /// The host-interpreted delivery options in the plugin section are invalid.
    #[error("invalid delivery options: {0}")]
    InvalidOptions(#[source] serde_json::Error),
}

fn format_capabilities(caps: &[Capability]) -> String {
    caps.iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A failure of a running plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// `Plugin::start` returned an error.
    #[error("start failed: {0}")]
    Start(#[source] BoxError),

    /// `Plugin::handle` returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    /// `Plugin::handle` panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The plugin's thread could not be spawned.
    #[error("could not spawn plugin thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The plugin's thread ended before reporting whether it started.
    #[error("plugin thread exited before starting")]
    Exited,
}

/// Errors returned by [`Supervisor`](crate::supervisor::Supervisor) operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A plugin with this name is already supervised.
    #[error("plugin '{0}' is already supervised")]
    AlreadySupervised(String),

    /// No supervised plugin has this name.
    #[error("plugin '{0}' is not supervised")]
    NotFound(String),

    /// The plugin failed to start.
    #[error("plugin '{name}' failed to start: {source}")]
    Start {
        /// Plugin name.
        name: String,
        /// Underlying failure.
        #[source]
        source: PluginError,
    },
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Renders a panic payload for logs.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
