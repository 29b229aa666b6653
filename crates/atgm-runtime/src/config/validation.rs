//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{AtgmConfig, LogOutput, LoggingConfig, RestartConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &AtgmConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_runtime_config(config)?;
    validate_plugins_config(config)?;
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Log filter module name cannot be empty: {module:?}"
        )));
    }

    Ok(())
}

/// Validates bus and supervisor settings.
fn validate_runtime_config(config: &AtgmConfig) -> ConfigResult<()> {
    if config.bus.queue_capacity == 0 {
        return Err(ConfigError::validation(
            "Bus queue capacity must be greater than 0",
        ));
    }

    if config.supervisor.grace_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Supervisor grace timeout must be greater than 0",
        ));
    }

    if let RestartConfig::OnFailure { max_restarts: 0, .. } = config.supervisor.restart {
        return Err(ConfigError::validation(
            "On-failure restart policy needs max_restarts greater than 0",
        ));
    }

    Ok(())
}

/// Validates the shape of the plugin sections.
///
/// Options inside a section are checked when that plugin is activated, so a
/// bad option fails only its own plugin.
fn validate_plugins_config(config: &AtgmConfig) -> ConfigResult<()> {
    if config.plugins.keys().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation("Plugin name cannot be empty"));
    }

    config.plugin_configs()?;
    Ok(())
}
