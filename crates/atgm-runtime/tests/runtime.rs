//! End-to-end runtime behaviour: configuration in, supervised plugins out.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use atgm_framework::{
    BoxError, Plugin, PluginConfig, PluginDescriptor, PluginState, SupervisorError,
    define_plugin,
};
use atgm_runtime::{AtgmConfig, AtgmRuntime, RuntimeError};
use serde_json::json;

fn config(value: serde_json::Value) -> AtgmConfig {
    serde_json::from_value(value).unwrap()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ─── Plugins ──────────────────────────────────────────────────────────────────

static SEEN: Mutex<Vec<u64>> = Mutex::new(Vec::new());

struct Recorder;

impl Recorder {
    fn from_config(_config: &PluginConfig) -> Result<Self, BoxError> {
        Ok(Self)
    }
}

#[async_trait]
impl Plugin for Recorder {
    async fn handle(&mut self, record: Arc<atgm_core::Record>) -> Result<(), BoxError> {
        SEEN.lock().unwrap().push(record.seq());
        Ok(())
    }
}

static RECORDER: PluginDescriptor = define_plugin! {
    name: "recorder",
    requires: [SerialStream],
    create: Recorder::from_config,
};

struct Broken;

impl Broken {
    fn from_config(_config: &PluginConfig) -> Result<Self, BoxError> {
        Ok(Self)
    }
}

#[async_trait]
impl Plugin for Broken {
    async fn handle(&mut self, _record: Arc<atgm_core::Record>) -> Result<(), BoxError> {
        Err("uplink unreachable".into())
    }
}

static BROKEN: PluginDescriptor = define_plugin! {
    name: "broken",
    create: Broken::from_config,
};

struct Refuses;

impl Refuses {
    fn from_config(_config: &PluginConfig) -> Result<Self, BoxError> {
        Ok(Self)
    }
}

#[async_trait]
impl Plugin for Refuses {
    async fn start(&mut self, _ctx: &atgm_framework::PluginContext) -> Result<(), BoxError> {
        Err("device missing".into())
    }

    async fn handle(&mut self, _record: Arc<atgm_core::Record>) -> Result<(), BoxError> {
        Ok(())
    }
}

static REFUSES: PluginDescriptor = define_plugin! {
    name: "refuses",
    create: Refuses::from_config,
};

static STALLED_CALLS: AtomicU64 = AtomicU64::new(0);

struct Stalled;

impl Stalled {
    fn from_config(_config: &PluginConfig) -> Result<Self, BoxError> {
        Ok(Self)
    }
}

#[async_trait]
impl Plugin for Stalled {
    async fn handle(&mut self, _record: Arc<atgm_core::Record>) -> Result<(), BoxError> {
        STALLED_CALLS.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

static STALLED: PluginDescriptor = define_plugin! {
    name: "stalled",
    create: Stalled::from_config,
};

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_plugin_does_not_affect_healthy_one() {
    let mut runtime = AtgmRuntime::from_config(&config(json!({
        "plugins": { "recorder": {}, "broken": {}, "refuses": {}, "missing": {} }
    })));
    runtime.register_plugin(RECORDER);
    runtime.register_plugin(BROKEN);
    runtime.register_plugin(REFUSES);

    let mut publisher = runtime.publisher().unwrap();
    let report = runtime.init().await.unwrap();

    assert_eq!(report.discovered.len(), 3);
    assert!(report.discovery_errors.is_empty());
    assert!(report.activation_failures.is_empty());
    assert_eq!(report.started.len(), 2);
    assert!(matches!(
        &report.start_failures[..],
        [SupervisorError::Start { name, .. }] if name == "refuses"
    ));
    assert_eq!(runtime.supervisor().state("refuses"), Some(PluginState::Failed));

    for i in 0..10 {
        publisher.publish_line(format!("$UW,{i}"));
    }

    eventually(|| SEEN.lock().unwrap().len() == 10).await;
    assert_eq!(*SEEN.lock().unwrap(), (0..10).collect::<Vec<_>>());
    assert_eq!(runtime.supervisor().state("recorder"), Some(PluginState::Running));
    assert_eq!(runtime.supervisor().state("broken"), Some(PluginState::Failed));

    let broken = runtime.stats().into_iter().find(|s| s.name == "broken").unwrap();
    assert_eq!(broken.errors, 1);

    runtime.stop().await;
    assert!(runtime.supervisor().is_empty());
    assert!(!runtime.is_initialized());
}

#[tokio::test]
async fn missing_capability_is_reported_not_fatal() {
    let mut runtime = AtgmRuntime::from_config(&config(json!({
        "host": { "capabilities": ["timer"] },
        "plugins": { "recorder": {} }
    })));
    runtime.register_plugin(RECORDER);

    let report = runtime.init().await.unwrap();
    assert!(report.started.is_empty());
    assert_eq!(report.activation_failures.len(), 1);
    assert_eq!(report.activation_failures[0].name, "recorder");
    assert_eq!(report.failed_count(), 1);

    runtime.stop().await;
}

#[tokio::test]
async fn stop_is_bounded_by_grace_timeout() {
    let mut runtime = AtgmRuntime::from_config(&config(json!({
        "supervisor": { "grace_timeout_ms": 100 },
        "plugins": { "stalled": {} }
    })));
    runtime.register_plugin(STALLED);

    let mut publisher = runtime.publisher().unwrap();
    let report = runtime.init().await.unwrap();
    let handle = report.started[0].clone();

    publisher.publish_line("$UW,1");
    eventually(|| STALLED_CALLS.load(Ordering::SeqCst) == 1).await;

    let started = Instant::now();
    runtime.stop().await;
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(handle.state(), PluginState::Stopped);
    assert_eq!(runtime.bus().subscriber_count(), 0);
}

#[tokio::test]
async fn run_until_starts_and_stops_plugins() {
    let runtime = AtgmRuntime::from_config(&config(json!({ "plugins": {} })));
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let run = runtime.run_until(async {
        let _ = rx.await;
    });
    tx.send(()).unwrap();
    run.await.unwrap();

    assert!(!runtime.is_initialized());
}

#[tokio::test]
async fn init_twice_is_rejected() {
    let runtime = AtgmRuntime::from_config(&AtgmConfig::default());
    runtime.init().await.unwrap();
    assert!(matches!(
        runtime.init().await,
        Err(RuntimeError::AlreadyInitialized)
    ));
    runtime.stop().await;
}

#[tokio::test]
async fn publisher_is_taken_once() {
    let runtime = AtgmRuntime::from_config(&AtgmConfig::default());
    let _publisher = runtime.publisher().unwrap();
    assert!(matches!(runtime.publisher(), Err(RuntimeError::Bus(_))));
}

#[test]
fn builder_loads_and_validates_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("atgmlogger.json");
    std::fs::write(
        &path,
        r#"{ "bus": { "queue_capacity": 16 }, "plugins": { "recorder": { "interval": 2 } } }"#,
    )
    .unwrap();

    let runtime = AtgmRuntime::builder()
        .without_env()
        .config_file(&path)
        .plugin(RECORDER)
        .build()
        .unwrap();
    assert_eq!(runtime.config().bus.queue_capacity, 16);

    std::fs::write(&path, r#"{ "bus": { "queue_capacity": 0 } }"#).unwrap();
    let result = AtgmRuntime::builder()
        .without_env()
        .config_file(&path)
        .build();
    assert!(matches!(result, Err(RuntimeError::Config(_))));
}

#[tokio::test]
async fn bad_plugin_options_fail_only_that_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("atgmlogger.json");
    std::fs::write(
        &path,
        r#"{ "plugins": {
            "recorder": {},
            "broken": { "interval": "often" },
            "refuses": { "queue_capacity": 0 }
        } }"#,
    )
    .unwrap();

    let runtime = AtgmRuntime::builder()
        .without_env()
        .config_file(&path)
        .plugin(RECORDER)
        .plugin(BROKEN)
        .plugin(REFUSES)
        .build()
        .unwrap();

    let report = runtime.init().await.unwrap();
    let mut failed: Vec<_> = report
        .activation_failures
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    failed.sort_unstable();
    assert_eq!(failed, ["broken", "refuses"]);
    assert_eq!(report.started.len(), 1);
    assert_eq!(report.started[0].name(), "recorder");

    runtime.stop().await;
}
