//! Runtime error types.

use atgm_core::BusError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The data bus refused the request.
    #[error("Data bus error: {0}")]
    Bus(#[from] BusError),

    /// `init` was called on a runtime whose plugins are already running.
    #[error("Runtime is already initialized")]
    AlreadyInitialized,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
