//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use atgm_core::{BusConfig, CapabilitySet};
use atgm_framework::{PluginConfigError, PluginConfigs, RestartPolicy, SupervisorConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root configuration structure.
///
/// ```json
/// {
///   "logging":    { "level": "info", "format": "compact" },
///   "bus":        { "queue_capacity": 64, "overflow": "drop-oldest" },
///   "supervisor": { "grace_timeout_ms": 2000, "restart": { "policy": "never" } },
///   "host":       { "capabilities": ["serial-stream", "timer", "filesystem"] },
///   "plugins":    { "mqtt": { "endpoint": "iot.example.com" } }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AtgmConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Data bus defaults.
    #[serde(default)]
    pub bus: BusConfig,

    /// Plugin supervision settings.
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// What the host offers to plugins.
    #[serde(default)]
    pub host: HostConfig,

    /// One opaque section per plugin, keyed by plugin name.
    #[serde(default)]
    pub plugins: Map<String, Value>,
}

impl AtgmConfig {
    /// Parses the `plugins` object into per-plugin sections.
    pub fn plugin_configs(&self) -> Result<PluginConfigs, PluginConfigError> {
        PluginConfigs::from_json(&Value::Object(self.plugins.clone()))
    }

    /// Supervisor settings with the host capabilities filled in.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            grace_timeout: Duration::from_millis(self.supervisor.grace_timeout_ms),
            restart: self.supervisor.restart.to_policy(),
            error_budget: self.supervisor.error_budget,
            capabilities: self.host.capabilities.clone(),
        }
    }
}

// ─── Supervisor ───────────────────────────────────────────────────────────────

/// Supervisor section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorSection {
    /// Time a plugin is given to stop before its task is aborted.
    #[serde(default = "default_grace_timeout_ms")]
    pub grace_timeout_ms: u64,

    /// Handler errors tolerated before a plugin is failed.
    #[serde(default)]
    pub error_budget: u32,

    /// What happens to a failed plugin.
    #[serde(default)]
    pub restart: RestartConfig,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            grace_timeout_ms: default_grace_timeout_ms(),
            error_budget: 0,
            restart: RestartConfig::default(),
        }
    }
}

fn default_grace_timeout_ms() -> u64 {
    2000
}

/// Restart policy, tagged by `policy`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum RestartConfig {
    /// Failed plugins stay failed.
    #[default]
    Never,
    /// Failed plugins are re-created after a delay.
    OnFailure {
        /// Restart attempts before giving up.
        #[serde(default = "default_max_restarts")]
        max_restarts: u32,
        /// Delay before each attempt in milliseconds.
        #[serde(default = "default_backoff_ms")]
        backoff_ms: u64,
    },
}

impl RestartConfig {
    /// Converts to the supervisor's policy.
    pub fn to_policy(self) -> RestartPolicy {
        match self {
            Self::Never => RestartPolicy::Never,
            Self::OnFailure {
                max_restarts,
                backoff_ms,
            } => RestartPolicy::OnFailure {
                max_restarts,
                backoff: Duration::from_millis(backoff_ms),
            },
        }
    }
}

fn default_max_restarts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

// ─── Host ─────────────────────────────────────────────────────────────────────

/// Host section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostConfig {
    /// Capabilities offered to plugins. Defaults to every capability.
    #[serde(default)]
    pub capabilities: CapabilitySet,
}

// ─── Logging ──────────────────────────────────────────────────────────────────

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Global log level. `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, required when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Daily log files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file name and line number.
    #[serde(default)]
    pub file_location: bool,

    /// Span lifecycle events to log.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module levels, e.g. `{"atgm_framework": "debug"}`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            max_files: default_max_files(),
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: BTreeMap::new(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as used in filter directives.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line output.
    #[default]
    Compact,
    /// Default `tracing-subscriber` output.
    Full,
    /// Multi-line, human-oriented output.
    Pretty,
    /// JSON lines. Needs the `json-log` feature; falls back to compact.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Span events to log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}
