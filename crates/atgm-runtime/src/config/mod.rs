//! Configuration module for the atgm runtime.
//!
//! This module provides layered JSON configuration loading and validation
//! for logging, the data bus, plugin supervision and the plugin sections.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AtgmConfig, HostConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, RestartConfig,
    SpanEventConfig, SupervisorSection,
};
pub use validation::validate_config;
