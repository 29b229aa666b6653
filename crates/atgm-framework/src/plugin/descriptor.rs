//! Plugin descriptor: the static, `Copy` handle to a plugin.

use atgm_core::{BoxError, Capability};
use linkme::distributed_slice;

use super::config::PluginConfig;
use super::core::BoxedPlugin;

// ─── API versioning ───────────────────────────────────────────────────────────

/// Current plugin API version (1.0), `major << 16 | minor`.
pub const ATGM_PLUGIN_API_VERSION: u32 = 0x0001_0000;

/// Factory that builds a live plugin from its configuration section.
pub type CreateFn = fn(&PluginConfig) -> Result<BoxedPlugin, BoxError>;

// ─── Link-time registration ───────────────────────────────────────────────────

/// Descriptors registered at link time.
///
/// Every crate linked into the host binary can contribute entries; the
/// registry reads them during [`discover`](crate::plugin::PluginRegistry::discover).
///
/// ```rust,ignore
/// use atgm_framework::linkme::distributed_slice;
/// use atgm_framework::{PLUGINS, define_plugin, plugin::PluginDescriptor};
///
/// #[distributed_slice(PLUGINS)]
/// #[linkme(crate = atgm_framework::linkme)]
/// static UPLINK: PluginDescriptor = define_plugin! {
///     name: "uplink",
///     create: Uplink::from_config,
/// };
/// ```
#[distributed_slice]
pub static PLUGINS: [PluginDescriptor];

// ─── PluginMetadata ───────────────────────────────────────────────────────────

/// Descriptive metadata attached to every descriptor.
///
/// [`define_plugin!`](crate::define_plugin) fills `version` and `desc` from the
/// defining crate's `CARGO_PKG_VERSION` / `CARGO_PKG_DESCRIPTION` unless they
/// are given explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginMetadata {
    /// Semver version string of the plugin.
    pub version: &'static str,
    /// One-line description shown in logs.
    pub desc: &'static str,
}

// ─── PluginDescriptor ─────────────────────────────────────────────────────────

/// A static, `Copy` descriptor that identifies and instantiates a plugin.
///
/// The descriptor's `name` is also the configuration key that enables the
/// plugin. Descriptors are immutable once registered.
#[derive(Debug, Clone, Copy)]
pub struct PluginDescriptor {
    /// Plugin API version this descriptor was compiled against.
    pub api_version: u32,

    /// Unique plugin name, used as the configuration lookup key.
    pub name: &'static str,

    /// Host capabilities the plugin needs in order to run.
    pub requires: &'static [Capability],

    /// Option keys the plugin understands; anything else is reported.
    pub options: &'static [&'static str],

    /// Factory that creates the live plugin.
    pub create: CreateFn,

    /// Static metadata snapshot.
    pub metadata: PluginMetadata,
}

impl PluginDescriptor {
    /// Returns `true` if this descriptor's API version is compatible with the
    /// host.
    ///
    /// The major part must match exactly; the descriptor's minor part must be
    /// at most the host's.
    pub fn is_compatible(&self) -> bool {
        let host_major = ATGM_PLUGIN_API_VERSION >> 16;
        let host_minor = ATGM_PLUGIN_API_VERSION & 0xFFFF;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }

    /// Creates the live plugin from the factory.
    ///
    /// Prefer [`PluginRegistry::activate`](crate::plugin::PluginRegistry::activate),
    /// which also checks capabilities and isolates factory panics.
    #[inline]
    pub fn instantiate(&self, config: &PluginConfig) -> Result<BoxedPlugin, BoxError> {
        (self.create)(config)
    }
}

/// Formats a packed API version as `major.minor`.
pub(crate) fn format_api_version(version: u32) -> String {
    format!("{}.{}", version >> 16, version & 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use async_trait::async_trait;
    use atgm_core::Record;
    use std::sync::Arc;

    struct Nop;

    #[async_trait]
    impl Plugin for Nop {
        async fn handle(&mut self, _record: Arc<Record>) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn descriptor(api_version: u32) -> PluginDescriptor {
        PluginDescriptor {
            api_version,
            name: "nop",
            requires: &[],
            options: &[],
            create: |_| Ok(Box::new(Nop)),
            metadata: PluginMetadata {
                version: "0.0.0",
                desc: "",
            },
        }
    }

    #[test]
    fn test_api_compatibility() {
        assert!(descriptor(ATGM_PLUGIN_API_VERSION).is_compatible());
        assert!(descriptor(0x0001_0000).is_compatible());
        assert!(!descriptor(0x0001_0001).is_compatible());
        assert!(!descriptor(0x0002_0000).is_compatible());
    }

    #[test]
    fn test_format_api_version() {
        assert_eq!(format_api_version(0x0003_0002), "3.2");
    }

    #[test]
    fn test_instantiate_calls_factory() {
        let desc = descriptor(ATGM_PLUGIN_API_VERSION);
        assert!(desc.instantiate(&PluginConfig::empty("nop")).is_ok());
    }
}
