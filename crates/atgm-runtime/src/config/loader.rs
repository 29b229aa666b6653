//! Configuration loader using figment.
//!
//! This module provides a flexible configuration loading system that supports:
//!
//! - **Multiple sources**: JSON files, environment variables, programmatic defaults
//! - **Layered configuration**: Later sources override earlier ones
//! - **Profile support**: e.g. a `survey` profile next to the shipboard defaults
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic overrides passed to [`ConfigLoader::merge`]
//! 3. Profile-specific config file (`atgmlogger.{profile}.json`)
//! 4. Main config file (`atgmlogger.json`, then `config.json`)
//! 5. Environment variables (`ATGM_*`)
//!
//! # Environment Variable Mapping
//!
//! Environment variables are mapped using the `ATGM_` prefix with `__` as separator:
//!
//! - `ATGM_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `ATGM_BUS__QUEUE_CAPACITY=256` → `bus.queue_capacity = 256`
//! - `ATGM_PLUGINS__MQTT__ENDPOINT=iot.example.com` → `plugins.mqtt.endpoint`
//!
//! # Example
//!
//! ```rust,ignore
//! use atgm_runtime::config::ConfigLoader;
//!
//! // Simple loading from default locations
//! let config = ConfigLoader::new().load()?;
//!
//! // Load from specific file with env overrides
//! let config = ConfigLoader::new()
//!     .file("/etc/atgmlogger/atgmlogger.json")
//!     .with_env()
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::AtgmConfig;

/// File names searched for, in order, in every search path.
const CONFIG_FILE_NAMES: [&str; 2] = ["atgmlogger.json", "config.json"];

/// System-wide configuration directory.
const SYSTEM_CONFIG_DIR: &str = "/etc/atgmlogger";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Default profile; no profile-specific file is looked up.
    #[default]
    Default,
    /// Named profile, e.g. `survey` loads `atgmlogger.survey.json`.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Custom(name) => name,
        }
    }

    /// Reads the profile from `ATGM_PROFILE`, defaulting to [`Profile::Default`].
    pub fn from_env() -> Self {
        std::env::var("ATGM_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }

    fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "" | "default" => Self::Default,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
///
/// # Example
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .file("atgmlogger.json")
///     .with_env()
///     .load()?;
/// ```
pub struct ConfigLoader {
    /// Programmatic overrides.
    figment: Figment,
    /// Configuration profile.
    profile: Profile,
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Adds user config directory to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("atgmlogger"))
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges additional configuration programmatically.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = ConfigLoader::new()
    ///     .merge(AtgmConfig {
    ///         logging: LoggingConfig { level: LogLevel::Debug, ..Default::default() },
    ///         ..Default::default()
    ///     })
    ///     .load()?;
    /// ```
    pub fn merge(mut self, config: AtgmConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<AtgmConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: AtgmConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            plugins = config.plugins.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Builds the figment instance with all sources.
    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(AtgmConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                return Err(ConfigError::UnsupportedFormat(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = figment.merge(Json::file(path));
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with ATGM_ prefix");
            figment = figment.merge(Env::prefixed("ATGM_").split("__"));
        }

        Ok(figment)
    }

    /// Resolves the effective list of search paths.
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("atgmlogger"));
            }
            paths.push(PathBuf::from(SYSTEM_CONFIG_DIR));
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Searches for and loads configuration files from search paths.
    ///
    /// Iterates `search_paths × CONFIG_FILE_NAMES`, merging a profile-specific
    /// variant first, then the base file. Stops at the first base file found.
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        for search_path in self.resolve_search_paths() {
            for base_name in CONFIG_FILE_NAMES {
                if let (Profile::Custom(profile), Some(stem)) =
                    (&self.profile, base_name.strip_suffix(".json"))
                {
                    let profile_path = search_path.join(format!("{stem}.{profile}.json"));
                    if profile_path.exists() {
                        debug!(path = %profile_path.display(), "Loading profile-specific config");
                        figment = figment.merge(Json::file(&profile_path));
                    }
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return figment.merge(Json::file(&base_path));
                }
            }
        }

        warn!("No configuration file found, using defaults");
        figment
    }
}

/// Loads the configuration from the default locations, with env overrides.
pub fn load_config() -> ConfigResult<AtgmConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with env overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<AtgmConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use atgm_core::OverflowPolicy;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new()
            .search_path(dir.path())
            .without_env()
            .load()
            .unwrap();

        assert_eq!(config.logging.level.as_str(), "info");
        assert_eq!(config, AtgmConfig::default());
    }

    #[test]
    fn test_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "logger.json",
            r#"{ "bus": { "queue_capacity": 16, "overflow": "drop-newest" },
                 "plugins": { "mqtt": { "endpoint": "iot.example.com" } } }"#,
        );

        let config = ConfigLoader::new().file(&path).without_env().load().unwrap();
        assert_eq!(config.bus.queue_capacity, 16);
        assert_eq!(config.bus.overflow, OverflowPolicy::DropNewest);
        assert!(config.plugin_configs().unwrap().is_enabled("mqtt"));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ConfigLoader::new()
            .file(dir.path().join("absent.json"))
            .without_env()
            .load();
        assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));

        let yaml = write(dir.path(), "atgmlogger.yaml", "bus: {}");
        let unsupported = ConfigLoader::new().file(&yaml).without_env().load();
        assert!(matches!(unsupported, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_search_prefers_atgmlogger_json() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.json", r#"{ "bus": { "queue_capacity": 2 } }"#);
        write(dir.path(), "atgmlogger.json", r#"{ "bus": { "queue_capacity": 3 } }"#);

        let config = ConfigLoader::new()
            .search_path(dir.path())
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.bus.queue_capacity, 3);
    }

    #[test]
    fn test_profile_file_is_layered_under_main_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "atgmlogger.survey.json",
            r#"{ "logging": { "level": "debug" }, "bus": { "queue_capacity": 5 } }"#,
        );
        write(dir.path(), "atgmlogger.json", r#"{ "bus": { "queue_capacity": 7 } }"#);

        let config = ConfigLoader::new()
            .profile("survey")
            .search_path(dir.path())
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.bus.queue_capacity, 7);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "atgmlogger.json", r#"{ "bus": { "queue_capacity": "many" } }"#);
        let result = ConfigLoader::new().file(&path).without_env().load();
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("Survey"), Profile::Custom("survey".into()));
        assert_eq!(Profile::parse(""), Profile::Default);
        assert_eq!(Profile::parse("default"), Profile::Default);
    }
}
