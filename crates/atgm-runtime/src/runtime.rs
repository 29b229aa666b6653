//! Main runtime orchestration: configuration, data bus, plugin registry and
//! supervisor wired together.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use atgm_runtime::AtgmRuntime;
//!
//! // Search the usual locations, layer env overrides, validate
//! let runtime = AtgmRuntime::builder().build()?;
//!
//! // The acquisition loop owns the publisher
//! let mut publisher = runtime.publisher()?;
//! runtime.init().await?;
//! publisher.publish_line("$UW,81242,-1948,557,4807924,307,874,204,6978,7541,-70,211,4970,0,20160307151524");
//!
//! runtime.stop().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use atgm_core::{DataBus, Publisher};
use atgm_framework::{
    ActivationFailure, DiscoveryError, InstanceHandle, PluginDescriptor, PluginRegistry,
    PluginStats, Supervisor, SupervisorError,
};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::{AtgmConfig, ConfigError, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Outcome of [`AtgmRuntime::init`].
///
/// Failures are collected rather than returned so one broken plugin never
/// prevents the others from running.
#[derive(Debug, Default)]
pub struct InitReport {
    /// Names of the plugins that passed discovery.
    pub discovered: Vec<&'static str>,
    /// Descriptors rejected during discovery.
    pub discovery_errors: Vec<DiscoveryError>,
    /// Configured plugins that could not be built.
    pub activation_failures: Vec<ActivationFailure>,
    /// Plugins now running under supervision.
    pub started: Vec<InstanceHandle>,
    /// Plugins that were built but failed to start.
    pub start_failures: Vec<SupervisorError>,
}

impl InitReport {
    /// Total number of configured plugins that are not running.
    pub fn failed_count(&self) -> usize {
        self.activation_failures.len() + self.start_failures.len()
    }
}

/// The atgm plugin host runtime.
///
/// Owns the data bus, the plugin registry and the supervisor for one
/// acquisition session.
///
/// ```rust,ignore
/// let runtime = AtgmRuntime::builder()
///     .config_file("/etc/atgmlogger/atgmlogger.json")
///     .profile("survey")
///     .build()?;
///
/// let publisher = runtime.publisher()?;
/// tokio::spawn(read_serial(publisher));
/// runtime.run().await?;
/// ```
pub struct AtgmRuntime {
    /// The configuration.
    config: AtgmConfig,
    /// Descriptors registered in code, on top of the linked ones.
    registry: PluginRegistry,
    /// Plugin supervisor, which also owns the data bus.
    supervisor: Supervisor,
    /// Whether `init` has started the configured plugins.
    initialized: AtomicBool,
}

impl AtgmRuntime {
    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a new runtime from configuration.
    ///
    /// This initializes logging based on the configuration and creates the
    /// data bus and supervisor. The configuration is not validated here;
    /// [`RuntimeBuilder::build`] does that.
    pub fn from_config(config: &AtgmConfig) -> Self {
        logging::init_from_config(&config.logging);

        let bus = DataBus::new(config.bus);
        let supervisor = Supervisor::new(bus, config.supervisor_config());
        let registry = PluginRegistry::new(config.host.capabilities.clone());

        info!(
            log_level = %config.logging.level,
            queue_capacity = config.bus.queue_capacity,
            capabilities = ?config.host.capabilities,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            registry,
            supervisor,
            initialized: AtomicBool::new(false),
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &AtgmConfig {
        &self.config
    }

    /// The data bus records are published on.
    pub fn bus(&self) -> &DataBus {
        self.supervisor.bus()
    }

    /// The plugin supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Takes the bus's single publisher.
    ///
    /// Records published before [`init`](Self::init) reach no plugin.
    pub fn publisher(&self) -> RuntimeResult<Publisher> {
        Ok(self.bus().publisher()?)
    }

    /// Registers a descriptor in code, alongside the linked ones.
    ///
    /// Must be called before [`init`](Self::init) to take effect.
    pub fn register_plugin(&mut self, descriptor: PluginDescriptor) {
        debug!(plugin = descriptor.name, "Registered plugin descriptor");
        self.registry.register(descriptor);
    }

    /// Returns whether the configured plugins have been started.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Per-plugin delivery statistics.
    pub fn stats(&self) -> Vec<PluginStats> {
        self.supervisor.stats()
    }

    /// Discovers, activates and starts every plugin enabled in the
    /// configuration.
    ///
    /// Individual plugin failures end up in the report. Only a malformed
    /// `plugins` section fails the call.
    pub async fn init(&self) -> RuntimeResult<InitReport> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyInitialized);
        }

        let configs = match self.config.plugin_configs() {
            Ok(configs) => configs,
            Err(e) => {
                self.initialized.store(false, Ordering::Release);
                return Err(ConfigError::from(e).into());
            }
        };

        let discovery = self.registry.discover();
        let activation = self.registry.activate_from(&discovery, &configs);

        let mut report = InitReport {
            discovered: discovery.names().collect(),
            activation_failures: activation.failures,
            ..Default::default()
        };
        report.discovery_errors = discovery.errors;

        for instance in activation.instances {
            match self.supervisor.start(instance).await {
                Ok(handle) => report.started.push(handle),
                Err(e) => report.start_failures.push(e),
            }
        }

        info!(
            discovered = report.discovered.len(),
            started = report.started.len(),
            failed = report.failed_count(),
            "Plugins initialized"
        );

        Ok(report)
    }

    /// Stops every plugin and releases its subscription.
    ///
    /// Each plugin gets the configured grace period before its task is
    /// aborted, so this returns within roughly one grace period.
    pub async fn stop(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return;
        }

        info!("Stopping atgm runtime");
        self.supervisor.stop_all().await;
        self.supervisor.clear_terminated();
        info!("Runtime stopped");
    }

    /// Runs the runtime until a shutdown signal is received.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs the runtime with a custom shutdown future.
    ///
    /// Plugins are initialized first unless [`init`](Self::init) was already
    /// called.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        if !self.is_initialized() {
            self.init().await?;
        }

        info!("atgm runtime is now running");
        shutdown.await;

        self.stop().await;
        Ok(())
    }
}

impl std::fmt::Debug for AtgmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtgmRuntime")
            .field("initialized", &self.is_initialized())
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
                        } else {
                            info!("Received Ctrl+C, shutting down");
                        }
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
            }
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating an `AtgmRuntime` with custom configuration.
///
/// The loaded configuration is validated before the runtime is created.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    descriptors: Vec<PluginDescriptor>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    ///
    /// Without explicit search paths the loader looks in the current
    /// directory, the user configuration directory and `/etc/atgmlogger`.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            descriptors: Vec::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "survey", "bench").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading `ATGM_` environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: AtgmConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Registers a plugin descriptor in code.
    pub fn plugin(mut self, descriptor: PluginDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Loads, validates and builds the runtime.
    pub fn build(self) -> RuntimeResult<AtgmRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;

        let mut runtime = AtgmRuntime::from_config(&config);
        for descriptor in self.descriptors {
            runtime.register_plugin(descriptor);
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
