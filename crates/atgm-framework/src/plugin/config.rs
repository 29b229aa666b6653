//! Plugin configuration sections.
//!
//! The host configuration carries one section per plugin, keyed by the
//! plugin's name. The mere presence of a key enables the plugin; an explicit
//! `"enabled": false` inside the section turns it off again:
//!
//! ```json
//! {
//!   "mqtt":    { "endpoint": "iot.example.com", "interval": 10 },
//!   "archive": { "enabled": false },
//!   "console": null
//! }
//! ```
//!
//! The section is handed to the plugin opaquely. A few keys are additionally
//! read by the host to shape delivery ([`DeliveryOptions`]); they stay visible
//! to the plugin as well.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use atgm_core::OverflowPolicy;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::PluginConfigError;

/// Option keys interpreted by the host rather than by the plugin.
pub const RESERVED_OPTIONS: [&str; 5] = [
    "enabled",
    "queue_capacity",
    "overflow",
    "interval",
    "error_budget",
];

/// The configuration section of one plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    name: String,
    options: Map<String, Value>,
    enabled: bool,
}

impl PluginConfig {
    /// Creates an enabled section from an options object.
    ///
    /// An `"enabled": false` entry in `options` disables the section.
    pub fn new(name: impl Into<String>, options: Map<String, Value>) -> Self {
        let enabled = options
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Self {
            name: name.into(),
            options,
            enabled,
        }
    }

    /// Creates an enabled section with no options.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Map::new())
    }

    /// Builds a section from the raw JSON value found under the plugin's key.
    ///
    /// Objects become the option map, `null` and `true` enable the plugin
    /// without options, `false` disables it.
    pub fn from_value(name: impl Into<String>, value: &Value) -> Result<Self, PluginConfigError> {
        let name = name.into();
        match value {
            Value::Object(map) => Ok(Self::new(name, map.clone())),
            Value::Null | Value::Bool(true) => Ok(Self::empty(name)),
            Value::Bool(false) => Ok(Self {
                name,
                options: Map::new(),
                enabled: false,
            }),
            other => Err(PluginConfigError::InvalidSection {
                name,
                kind: json_kind(other),
            }),
        }
    }

    /// The plugin name this section belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the plugin should be activated.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The raw option map, reserved keys included.
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// Deserialises the whole section into `T`.
    ///
    /// Use `#[serde(default)]` on `T` to make every field optional.
    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        T::deserialize(Value::Object(self.options.clone()))
    }

    /// Reads and deserialises a single option, `Ok(None)` when absent.
    pub fn option<T>(&self, key: &str) -> serde_json::Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        self.options
            .get(key)
            .map(|v| T::deserialize(v.clone()))
            .transpose()
    }

    /// Host-interpreted delivery options of this section.
    pub fn delivery(&self) -> serde_json::Result<DeliveryOptions> {
        DeliveryOptions::deserialize(Value::Object(self.options.clone()))
    }

    /// Option keys neither reserved by the host nor listed in `known`.
    pub fn unknown_options<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.options
            .keys()
            .map(String::as_str)
            .filter(|k| {
                !RESERVED_OPTIONS.iter().any(|r| r == k) && !known.iter().any(|n| n == k)
            })
            .collect()
    }
}

/// Per-plugin delivery overrides read from the plugin's section.
///
/// Every field falls back to the host default when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DeliveryOptions {
    /// Queue capacity for this plugin's subscription. Zero is rejected.
    #[serde(default)]
    pub queue_capacity: Option<NonZeroUsize>,

    /// Overflow policy for this plugin's subscription.
    #[serde(default)]
    pub overflow: Option<OverflowPolicy>,

    /// Deliver only every `interval`-th record (1 delivers everything).
    #[serde(default)]
    pub interval: Option<u64>,

    /// Handler errors tolerated before the plugin is failed.
    #[serde(default)]
    pub error_budget: Option<u32>,
}

impl DeliveryOptions {
    /// Effective decimation interval, never zero.
    pub fn interval(&self) -> u64 {
        self.interval.unwrap_or(1).max(1)
    }
}

/// All plugin sections, keyed by plugin name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginConfigs {
    sections: BTreeMap<String, PluginConfig>,
}

impl PluginConfigs {
    /// Creates an empty set; nothing will be activated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from the `plugins` JSON object.
    pub fn from_json(value: &Value) -> Result<Self, PluginConfigError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::new()),
            other => return Err(PluginConfigError::NotAnObject(json_kind(other))),
        };
        map.iter()
            .map(|(name, section)| PluginConfig::from_value(name.clone(), section))
            .collect()
    }

    /// Adds or replaces a section.
    pub fn insert(&mut self, config: PluginConfig) {
        self.sections.insert(config.name().to_string(), config);
    }

    /// Adds a section (builder style).
    pub fn with(mut self, config: PluginConfig) -> Self {
        self.insert(config);
        self
    }

    /// Looks up the section for `name`.
    pub fn get(&self, name: &str) -> Option<&PluginConfig> {
        self.sections.get(name)
    }

    /// Returns `true` when `name` has a section that is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(PluginConfig::is_enabled)
    }

    /// Names of the enabled sections.
    pub fn enabled_names(&self) -> impl Iterator<Item = &str> {
        self.sections
            .values()
            .filter(|c| c.is_enabled())
            .map(PluginConfig::name)
    }

    /// Iterates over every section.
    pub fn iter(&self) -> impl Iterator<Item = &PluginConfig> {
        self.sections.values()
    }

    /// Number of sections, enabled or not.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns `true` when no section is present.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl FromIterator<PluginConfig> for PluginConfigs {
    fn from_iter<I: IntoIterator<Item = PluginConfig>>(iter: I) -> Self {
        let mut configs = Self::new();
        for config in iter {
            configs.insert(config);
        }
        configs
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_presence_enables_and_explicit_false_disables() {
        let configs = PluginConfigs::from_json(&json!({
            "mqtt": { "endpoint": "iot.example.com" },
            "archive": { "enabled": false },
            "console": null,
            "legacy": false,
        }))
        .unwrap();

        assert_eq!(configs.len(), 4);
        assert!(configs.is_enabled("mqtt"));
        assert!(configs.is_enabled("console"));
        assert!(!configs.is_enabled("archive"));
        assert!(!configs.is_enabled("legacy"));
        assert!(!configs.is_enabled("missing"));

        let enabled: Vec<_> = configs.enabled_names().collect();
        assert_eq!(enabled, vec!["console", "mqtt"]);
    }

    #[test]
    fn test_invalid_shapes_are_rejected() {
        assert!(matches!(
            PluginConfigs::from_json(&json!(["mqtt"])),
            Err(PluginConfigError::NotAnObject("array"))
        ));
        assert!(matches!(
            PluginConfigs::from_json(&json!({ "mqtt": 3 })),
            Err(PluginConfigError::InvalidSection { kind: "number", .. })
        ));
        assert!(PluginConfigs::from_json(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_typed_access() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Uplink {
            endpoint: String,
            topic_pfx: Option<String>,
        }

        let config = PluginConfig::from_value(
            "mqtt",
            &json!({ "endpoint": "iot.example.com", "interval": 10 }),
        )
        .unwrap();

        let uplink: Uplink = config.get_config().unwrap();
        assert_eq!(uplink.endpoint, "iot.example.com");
        assert!(uplink.topic_pfx.is_none());
        assert_eq!(config.option::<u64>("interval").unwrap(), Some(10));
        assert_eq!(config.option::<u64>("absent").unwrap(), None);
    }

    #[test]
    fn test_delivery_options_and_unknown_keys() {
        let config = PluginConfig::from_value(
            "mqtt",
            &json!({
                "endpoint": "x",
                "interval": 0,
                "overflow": "drop-newest",
                "error_budget": 10,
                "typo": true,
            }),
        )
        .unwrap();

        let delivery = config.delivery().unwrap();
        assert_eq!(delivery.interval(), 1);
        assert_eq!(delivery.overflow, Some(OverflowPolicy::DropNewest));
        assert_eq!(delivery.error_budget, Some(10));
        assert_eq!(delivery.queue_capacity, None);

        assert_eq!(config.unknown_options(&["endpoint"]), vec!["typo"]);
    }
}
