//! Link-time registration through the `PLUGINS` slice, end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use atgm_core::{BusConfig, DataBus, Record};
use atgm_framework::linkme::distributed_slice;
use atgm_framework::{
    BoxError, CapabilitySet, PLUGINS, Plugin, PluginConfig, PluginConfigs, PluginDescriptor,
    PluginRegistry, PluginState, Supervisor, SupervisorConfig, define_plugin,
};
use serde_json::json;

static COUNTED: AtomicU64 = AtomicU64::new(0);

struct Counter;

impl Counter {
    fn from_config(_config: &PluginConfig) -> Result<Self, BoxError> {
        Ok(Self)
    }
}

#[async_trait]
impl Plugin for Counter {
    async fn handle(&mut self, _record: Arc<Record>) -> Result<(), BoxError> {
        COUNTED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[distributed_slice(PLUGINS)]
#[linkme(crate = atgm_framework::linkme)]
static COUNTER: PluginDescriptor = define_plugin! {
    /// Counts delivered records.
    name: "counter",
    requires: [SerialStream],
    create: Counter::from_config,
};

#[distributed_slice(PLUGINS)]
#[linkme(crate = atgm_framework::linkme)]
static UNUSED: PluginDescriptor = define_plugin! {
    name: "unused",
    create: Counter::from_config,
};

#[test]
fn linked_descriptors_are_discovered() {
    let discovery = PluginRegistry::new(CapabilitySet::all()).discover();
    let names: Vec<_> = discovery.names().collect();
    assert!(names.contains(&"counter"));
    assert!(names.contains(&"unused"));
    assert!(discovery.errors.is_empty());
    assert_eq!(
        discovery.get("counter").map(|d| d.metadata.desc.trim()),
        Some("Counts delivered records.")
    );
}

#[test]
fn explicit_registration_wins_over_linked_duplicate() {
    let mut shadow = COUNTER;
    shadow.options = &["shadowed"];

    let discovery = PluginRegistry::new(CapabilitySet::all()).with(shadow).discover();
    assert_eq!(discovery.get("counter").map(|d| d.options), Some(&["shadowed"][..]));
    assert_eq!(discovery.errors.len(), 1);
    assert_eq!(discovery.errors[0].plugin_name(), Some("counter"));
}

#[tokio::test]
async fn linked_plugin_runs_under_supervision() {
    let registry = PluginRegistry::new(CapabilitySet::all());
    let configs = PluginConfigs::from_json(&json!({ "counter": {} })).unwrap();
    let activation = registry.activate(&configs);
    assert_eq!(activation.instances.len(), 1);
    assert!(activation.failures.is_empty());

    let supervisor = Supervisor::new(DataBus::new(BusConfig::default()), SupervisorConfig::default());
    let mut handles = Vec::new();
    for instance in activation.instances {
        handles.push(supervisor.start(instance).await.unwrap());
    }

    let mut publisher = supervisor.bus().publisher().unwrap();
    for i in 0..5 {
        publisher.publish_line(format!("$UW,{i}"));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while COUNTED.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    supervisor.stop_all().await;
    assert_eq!(handles[0].state(), PluginState::Stopped);
}
