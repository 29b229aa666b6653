//! # atgm
//!
//! Plugin host for the AT1A/AT1M gravity meter serial logger.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────┐     ┌──────────────────────────────────────┐
//! │ serial reader│────▶│ DataBus │────▶│ plugin "mqtt"    (own thread, queue) │
//! │  (Publisher) │     │         │────▶│ plugin "archive" (own thread, queue) │
//! └──────────────┘     └─────────┘────▶│ plugin ...       (own thread, queue) │
//!                                      └──────────────────────────────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, activates plugins, shuts them down
//! - **Data bus**: fans every record out to per-plugin bounded queues; a slow
//!   plugin loses its oldest records, never the logger's time
//! - **Plugins**: isolated consumers; a failing plugin is unsubscribed and
//!   everything else keeps running
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use atgm::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Plugin for Echo {
//!     async fn handle(&mut self, record: Arc<Record>) -> Result<(), BoxError> {
//!         info!(seq = record.seq(), line = record.line(), "record");
//!         Ok(())
//!     }
//! }
//!
//! fn create(_config: &PluginConfig) -> Result<Echo, BoxError> {
//!     Ok(Echo)
//! }
//!
//! static ECHO: PluginDescriptor = define_plugin! {
//!     /// Logs every record.
//!     name: "echo",
//!     requires: [SerialStream],
//!     create: create,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AtgmRuntime::builder().plugin(ECHO).build()?;
//!     let publisher = runtime.publisher()?;
//!     tokio::spawn(read_serial(publisher));
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `json-log`: JSON log output

pub use atgm_core as core;
pub use atgm_framework as framework;
pub use atgm_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use atgm::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use atgm_runtime::{AtgmConfig, AtgmRuntime, InitReport};

    // Plugin system
    pub use async_trait::async_trait;
    pub use atgm_framework::{
        Plugin, PluginConfig, PluginContext, PluginDescriptor, PluginState, define_plugin,
    };

    // Records
    pub use atgm_core::{BoxError, FieldSelection, FieldValue, Publisher, Record};

    // Logging
    pub use atgm_runtime::prelude::*;
}
