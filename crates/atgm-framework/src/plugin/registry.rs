//! Plugin discovery and activation.
//!
//! The registry knows two sources of descriptors:
//!
//! - the explicit registration table, filled by [`PluginRegistry::register`]
//!   at process start;
//! - the link-time [`PLUGINS`] slice, filled by every linked crate.
//!
//! Discovery is independent of configuration; activation intersects the
//! discovered set with the enabled configuration sections and builds one
//! [`PluginInstance`] per match. Both steps fail per plugin, never as a whole.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use atgm_core::CapabilitySet;
use tracing::{debug, error, info, warn};

use super::config::{PluginConfig, PluginConfigs};
use super::descriptor::{ATGM_PLUGIN_API_VERSION, PLUGINS, PluginDescriptor, format_api_version};
use super::instance::{ActivationFailure, PluginInstance};
use crate::error::{ActivationError, DiscoveryError, panic_message};

/// Result of [`PluginRegistry::discover`].
#[derive(Debug, Default)]
pub struct Discovery {
    /// Accepted descriptors, explicit registrations first, names unique.
    pub descriptors: Vec<PluginDescriptor>,
    /// Descriptors that were rejected.
    pub errors: Vec<DiscoveryError>,
}

impl Discovery {
    /// Looks up an accepted descriptor by name.
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Names of the accepted descriptors.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.name)
    }
}

/// Result of [`PluginRegistry::activate`].
#[derive(Debug, Default)]
pub struct Activation {
    /// Successfully built instances, in discovery order.
    pub instances: Vec<PluginInstance>,
    /// Configured plugins that could not be built.
    pub failures: Vec<ActivationFailure>,
}

/// Registry of installed plugins.
pub struct PluginRegistry {
    host: CapabilitySet,
    explicit: Vec<PluginDescriptor>,
    include_linked: bool,
}

impl PluginRegistry {
    /// Creates a registry for a host offering `host` capabilities.
    ///
    /// Link-time registrations are included.
    pub fn new(host: CapabilitySet) -> Self {
        Self {
            host,
            explicit: Vec::new(),
            include_linked: true,
        }
    }

    /// Ignores the link-time [`PLUGINS`] slice; only explicit registrations
    /// are discovered.
    pub fn without_linked(mut self) -> Self {
        self.include_linked = false;
        self
    }

    /// Capabilities the host offers.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.host
    }

    /// Adds a descriptor to the explicit registration table.
    pub fn register(&mut self, descriptor: PluginDescriptor) {
        debug!(plugin = %descriptor.name, "Plugin descriptor registered");
        self.explicit.push(descriptor);
    }

    /// Adds a descriptor (builder style).
    pub fn with(mut self, descriptor: PluginDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// Collects every installed descriptor, regardless of configuration.
    ///
    /// Malformed descriptors are reported in [`Discovery::errors`] and
    /// skipped; when two descriptors share a name the first one wins.
    pub fn discover(&self) -> Discovery {
        let linked: &[PluginDescriptor] = if self.include_linked { &PLUGINS } else { &[] };
        let mut discovery = Discovery::default();
        let mut seen: HashSet<&'static str> = HashSet::new();

        for desc in self.explicit.iter().chain(linked.iter()) {
            let verdict = if desc.name.trim().is_empty() {
                Err(DiscoveryError::EmptyName)
            } else if !desc.is_compatible() {
                Err(DiscoveryError::IncompatibleApi {
                    name: desc.name.to_string(),
                    found: format_api_version(desc.api_version),
                    expected: format_api_version(ATGM_PLUGIN_API_VERSION),
                })
            } else if !seen.insert(desc.name) {
                Err(DiscoveryError::Duplicate(desc.name.to_string()))
            } else {
                Ok(())
            };

            match verdict {
                Ok(()) => discovery.descriptors.push(*desc),
                Err(e) => {
                    warn!(
                        plugin = desc.name,
                        error = %e,
                        "Plugin descriptor rejected during discovery"
                    );
                    discovery.errors.push(e);
                }
            }
        }

        info!(
            found = discovery.descriptors.len(),
            rejected = discovery.errors.len(),
            "Plugin discovery complete"
        );
        discovery
    }

    /// Discovers installed plugins and activates the configured ones.
    pub fn activate(&self, configs: &PluginConfigs) -> Activation {
        self.activate_from(&self.discover(), configs)
    }

    /// Activates the configured plugins among an existing discovery result.
    ///
    /// A plugin is instantiated exactly when its name is an enabled
    /// configuration key and its descriptor was discovered. Unmet
    /// capabilities, invalid delivery options and failing or panicking
    /// factories are recorded as [`ActivationFailure`]s.
    pub fn activate_from(&self, discovery: &Discovery, configs: &PluginConfigs) -> Activation {
        let mut activation = Activation::default();

        for name in configs.enabled_names() {
            if discovery.get(name).is_none() {
                warn!(
                    plugin = %name,
                    "Configuration enables a plugin that is not installed"
                );
            }
        }

        for desc in &discovery.descriptors {
            let Some(config) = configs.get(desc.name).filter(|c| c.is_enabled()) else {
                debug!(plugin = %desc.name, "Plugin not enabled by configuration");
                continue;
            };

            match self.build(desc, config) {
                Ok(instance) => {
                    info!(
                        plugin = %desc.name,
                        version = desc.metadata.version,
                        "Plugin activated"
                    );
                    activation.instances.push(instance);
                }
                Err(error) => {
                    error!(plugin = %desc.name, error = %error, "Plugin activation failed");
                    activation.failures.push(ActivationFailure {
                        name: desc.name.to_string(),
                        error,
                    });
                }
            }
        }

        activation
    }

    fn build(
        &self,
        desc: &PluginDescriptor,
        config: &PluginConfig,
    ) -> Result<PluginInstance, ActivationError> {
        let missing = self.host.missing(desc.requires);
        if !missing.is_empty() {
            return Err(ActivationError::MissingCapabilities(missing));
        }

        let delivery = config.delivery().map_err(ActivationError::InvalidOptions)?;

        let unknown = config.unknown_options(desc.options);
        if !desc.options.is_empty() && !unknown.is_empty() {
            warn!(
                plugin = %desc.name,
                options = ?unknown,
                "Ignoring unrecognised plugin options"
            );
        }

        let plugin = catch_unwind(AssertUnwindSafe(|| desc.instantiate(config)))
            .map_err(|payload| ActivationError::FactoryPanicked(panic_message(payload.as_ref())))?
            .map_err(ActivationError::Factory)?;

        Ok(PluginInstance::new(
            *desc,
            Arc::new(config.clone()),
            delivery,
            plugin,
        ))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(CapabilitySet::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, PluginMetadata, PluginState};
    use async_trait::async_trait;
    use atgm_core::{BoxError, Capability, Record};
    use serde_json::json;

    struct Nop;

    #[async_trait]
    impl Plugin for Nop {
        async fn handle(&mut self, _record: Arc<Record>) -> Result<(), BoxError> {
            Ok(())
        }
    }

    const META: PluginMetadata = PluginMetadata {
        version: "0.1.0",
        desc: "test plugin",
    };

    fn desc(name: &'static str) -> PluginDescriptor {
        PluginDescriptor {
            api_version: ATGM_PLUGIN_API_VERSION,
            name,
            requires: &[],
            options: &[],
            create: |_| Ok(Box::new(Nop)),
            metadata: META,
        }
    }

    fn registry(descs: &[PluginDescriptor]) -> PluginRegistry {
        descs
            .iter()
            .fold(PluginRegistry::default().without_linked(), |r, d| r.with(*d))
    }

    fn configs(value: serde_json::Value) -> PluginConfigs {
        PluginConfigs::from_json(&value).unwrap()
    }

    fn names(activation: &Activation) -> Vec<&'static str> {
        activation.instances.iter().map(|i| i.name()).collect()
    }

    #[test]
    fn test_discover_with_no_plugins() {
        let discovery = PluginRegistry::default().without_linked().discover();
        assert!(discovery.descriptors.is_empty());
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn test_discover_rejects_malformed_and_continues() {
        let mut future_api = desc("future");
        future_api.api_version = 0x0002_0000;

        let discovery = registry(&[desc("a"), desc(" "), future_api, desc("a"), desc("b")]).discover();

        assert_eq!(discovery.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(discovery.errors.len(), 3);
        assert!(matches!(discovery.errors[0], DiscoveryError::EmptyName));
        assert!(matches!(
            &discovery.errors[1],
            DiscoveryError::IncompatibleApi { name, found, .. } if name == "future" && found == "2.0"
        ));
        assert!(matches!(&discovery.errors[2], DiscoveryError::Duplicate(n) if n == "a"));
    }

    #[test]
    fn test_activate_exactly_enabled_and_discovered() {
        let reg = registry(&[desc("mqtt"), desc("archive"), desc("console")]);
        let activation = reg.activate(&configs(json!({
            "mqtt": {},
            "archive": { "enabled": false },
            "not_installed": {},
        })));

        assert_eq!(names(&activation), vec!["mqtt"]);
        assert!(activation.failures.is_empty());
        assert!(
            activation
                .instances
                .iter()
                .all(|i| i.state() == PluginState::Created)
        );
    }

    #[test]
    fn test_activate_with_empty_config_builds_nothing() {
        let reg = registry(&[desc("mqtt"), desc("archive")]);
        let activation = reg.activate(&PluginConfigs::new());
        assert!(activation.instances.is_empty());
        assert!(activation.failures.is_empty());
    }

    #[test]
    fn test_missing_capability_fails_only_that_plugin() {
        let mut needs_fs = desc("archive");
        needs_fs.requires = &[Capability::SerialStream, Capability::Filesystem];

        let reg = PluginRegistry::new(CapabilitySet::empty().with(Capability::SerialStream))
            .without_linked()
            .with(needs_fs)
            .with(desc("mqtt"));
        let activation = reg.activate(&configs(json!({ "archive": {}, "mqtt": {} })));

        assert_eq!(names(&activation), vec!["mqtt"]);
        assert_eq!(activation.failures.len(), 1);
        let failure = &activation.failures[0];
        assert_eq!(failure.name, "archive");
        assert_eq!(failure.state(), PluginState::Failed);
        assert!(matches!(
            &failure.error,
            ActivationError::MissingCapabilities(caps) if caps == &[Capability::Filesystem]
        ));
    }

    #[test]
    fn test_factory_error_and_panic_are_isolated() {
        let mut erroring = desc("erroring");
        erroring.create = |_| Err("endpoint not configured".into());
        let mut panicking = desc("panicking");
        panicking.create = |_| panic!("factory exploded");

        let reg = registry(&[erroring, panicking, desc("healthy")]);
        let activation = reg.activate(&configs(json!({
            "erroring": {}, "panicking": {}, "healthy": {}
        })));

        assert_eq!(names(&activation), vec!["healthy"]);
        assert_eq!(activation.failures.len(), 2);
        assert!(matches!(
            &activation.failures[0].error,
            ActivationError::Factory(e) if e.to_string() == "endpoint not configured"
        ));
        assert!(matches!(
            &activation.failures[1].error,
            ActivationError::FactoryPanicked(msg) if msg == "factory exploded"
        ));
    }

    #[test]
    fn test_factory_receives_matching_config() {
        let mut checked = desc("checked");
        checked.create = |config| {
            if config.option::<String>("endpoint")?.as_deref() == Some("iot.example.com") {
                Ok(Box::new(Nop))
            } else {
                Err("wrong config".into())
            }
        };

        let reg = registry(&[checked]);
        let activation = reg.activate(&configs(json!({
            "checked": { "endpoint": "iot.example.com" }
        })));
        assert_eq!(names(&activation), vec!["checked"]);
        assert_eq!(
            activation.instances[0].config().options()["endpoint"],
            json!("iot.example.com")
        );
    }

    #[test]
    fn test_invalid_delivery_options_fail_activation() {
        let reg = registry(&[desc("mqtt")]);
        let activation = reg.activate(&configs(json!({ "mqtt": { "interval": "often" } })));
        assert!(activation.instances.is_empty());
        assert!(matches!(
            activation.failures[0].error,
            ActivationError::InvalidOptions(_)
        ));
    }

    #[test]
    fn test_zero_queue_capacity_fails_only_that_plugin() {
        let reg = registry(&[desc("mqtt"), desc("console")]);
        let activation = reg.activate(&configs(json!({
            "mqtt": { "queue_capacity": 0 },
            "console": { "queue_capacity": 8 }
        })));
        assert_eq!(names(&activation), vec!["console"]);
        assert_eq!(activation.failures.len(), 1);
        assert_eq!(activation.failures[0].name, "mqtt");
        assert!(matches!(
            activation.failures[0].error,
            ActivationError::InvalidOptions(_)
        ));
    }
}
