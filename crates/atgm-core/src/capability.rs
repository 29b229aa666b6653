//! Host capabilities a plugin may require.
//!
//! A plugin descriptor lists the capabilities it needs; the registry compares
//! that list against the [`CapabilitySet`] the host offers before calling the
//! plugin's factory.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A facility the host can offer to plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Access to the live record stream from the serial acquisition loop.
    SerialStream,
    /// Periodic timers driven by the host runtime.
    Timer,
    /// Writable storage (data directory, log files).
    Filesystem,
}

impl Capability {
    /// Every capability the host knows about.
    pub const ALL: [Capability; 3] = [
        Capability::SerialStream,
        Capability::Timer,
        Capability::Filesystem,
    ];

    /// Returns the configuration spelling of this capability.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SerialStream => "serial-stream",
            Self::Timer => "timer",
            Self::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities offered by a host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// An empty set; no plugin with requirements can be activated against it.
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// A set containing every known capability.
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    /// Adds a capability (builder style).
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    /// Returns `true` if the host offers `capability`.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Returns the requirements from `required` that this set cannot satisfy,
    /// preserving their declared order.
    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        required
            .iter()
            .copied()
            .filter(|cap| !self.contains(*cap))
            .collect()
    }

    /// Iterates over the offered capabilities in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_reports_unmet_requirements_in_order() {
        let host = CapabilitySet::empty().with(Capability::SerialStream);
        let missing = host.missing(&[
            Capability::Filesystem,
            Capability::SerialStream,
            Capability::Timer,
        ]);
        assert_eq!(missing, vec![Capability::Filesystem, Capability::Timer]);
    }

    #[test]
    fn test_default_offers_everything() {
        let host = CapabilitySet::default();
        assert!(host.missing(&Capability::ALL).is_empty());
    }

    #[test]
    fn test_deserialize_kebab_case() {
        let set: CapabilitySet = serde_json::from_str(r#"["serial-stream", "timer"]"#).unwrap();
        assert!(set.contains(Capability::SerialStream));
        assert!(set.contains(Capability::Timer));
        assert!(!set.contains(Capability::Filesystem));
    }
}
