//! atgm runtime - orchestration layer of the atgm logger plugin host.
//!
//! This crate provides:
//! - Layered JSON configuration (`config`): defaults, profile and main
//!   files, `ATGM_` environment overrides, validation
//! - Logging setup on `tracing-subscriber` (`logging`)
//! - The runtime (`AtgmRuntime`) wiring the data bus, the plugin registry and
//!   the supervisor together
//!
//! ```ignore
//! use atgm_runtime::AtgmRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AtgmRuntime::builder().build()?;
//!
//!     // Hand the publisher to whatever reads the meter
//!     let publisher = runtime.publisher()?;
//!     tokio::spawn(read_serial(publisher));
//!
//!     // Start configured plugins, run until Ctrl+C or SIGTERM
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{AtgmConfig, ConfigError, ConfigLoader, ConfigResult, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{AtgmRuntime, InitReport, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
