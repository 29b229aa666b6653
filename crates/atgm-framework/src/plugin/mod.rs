//! Plugin system.
//!
//! # Architecture
//!
//! A [`PluginDescriptor`] is the *static, `Copy` handle* to a plugin: it
//! carries its name, the capabilities it requires, metadata, and a factory
//! function pointer. Descriptors reach the [`PluginRegistry`] either through
//! explicit registration or through the link-time [`PLUGINS`] slice.
//!
//! The registry turns the descriptors enabled by configuration into
//! [`PluginInstance`]s; the supervisor then drives each live [`Plugin`] on its
//! own thread.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use atgm::prelude::*;
//!
//! struct Console;
//!
//! impl Console {
//!     fn from_config(_: &PluginConfig) -> Result<Self, BoxError> {
//!         Ok(Self)
//!     }
//! }
//!
//! #[async_trait]
//! impl Plugin for Console {
//!     async fn handle(&mut self, record: Arc<Record>) -> Result<(), BoxError> {
//!         println!("{}", record.line());
//!         Ok(())
//!     }
//! }
//!
//! pub static CONSOLE: PluginDescriptor = define_plugin! {
//!     name: "console",
//!     create: Console::from_config,
//! };
//! ```
//!
//! # Configuration
//!
//! Each plugin reads its own section from the `plugins` object of
//! `atgmlogger.json`:
//!
//! ```json
//! { "plugins": { "console": { "prefix": "> " } } }
//! ```

// ─── Submodules ──────────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod descriptor;
pub mod instance;
pub mod macros;
pub mod registry;

// ─── Re-exports from submodules ──────────────────────────────────────────────
pub use config::{DeliveryOptions, PluginConfig, PluginConfigs, RESERVED_OPTIONS};
pub use core::{BoxedPlugin, Plugin, PluginContext};
pub use descriptor::{ATGM_PLUGIN_API_VERSION, CreateFn, PLUGINS, PluginDescriptor, PluginMetadata};
pub use instance::{ActivationFailure, PluginInstance, PluginState};
pub use registry::{Activation, Discovery, PluginRegistry};
