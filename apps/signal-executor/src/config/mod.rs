//! Configuration module for the signal executor.
//!
//! Provides configuration loading, validation, and environment variable
//! interpolation for the webhook server, the execution pipeline, resilience
//! policies, and the account registry.
//!
//! # Usage
//!
//! ```rust,ignore
//! use signal_executor::config::{Config, load_config};
//!
//! // Load from $SIGNAL_EXECUTOR_CONFIG, falling back to config.yaml
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//!
//! println!("webhooks on {}", config.server.listen_address());
//! ```

mod accounts;
mod circuit_breaker;
mod environment;
mod observability;
mod pipeline;
mod retry;
mod server;

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;

pub use accounts::{AccountConfig, PaperAccountConfig};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerSettings};
pub use environment::EnvironmentConfig;
pub use observability::{LoggingConfig, MetricsSettings, ObservabilityConfig};
pub use pipeline::PipelineSettings;
pub use retry::RetryConfig;
pub use server::ServerConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SIGNAL_EXECUTOR_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Execution pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Circuit breaker configuration.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry policy overrides.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Accounts that may receive webhooks.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Environment configuration.
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to
///   `$SIGNAL_EXECUTOR_CONFIG`, then "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let from_env = std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.is_empty());
    let path = path.or(from_env.as_deref()).unwrap_or("config.yaml");

    // Read the config file
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    // Interpolate environment variables
    let interpolated = interpolate_env_vars(&contents);

    // Parse YAML
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;

    // Validate configuration
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let mut result = input.to_string();

    // Match ${VAR} or ${VAR:-default} patterns
    let re = ENV_VAR_REGEX.get_or_init(|| {
        // This regex pattern is compile-time constant and always valid
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    for cap in re.captures_iter(input) {
        // Group 0 and group 1 are guaranteed by the regex pattern structure
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let full_match = full_match.as_str();
        let var_name = var_match.as_str();
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match, &value);
    }

    result
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = ConfigError::ValidationError;

    if config.server.signature_header.trim().is_empty() {
        return Err(invalid("server.signature_header must not be empty".to_string()));
    }
    if config.server.max_body_bytes == 0 {
        return Err(invalid("server.max_body_bytes must be positive".to_string()));
    }

    config.pipeline.validate().map_err(invalid)?;
    config.retry.validate().map_err(invalid)?;
    config.observability.metrics.validate().map_err(invalid)?;

    // Validate circuit breaker settings
    config
        .circuit_breaker
        .default
        .validate("circuit_breaker.default")
        .map_err(invalid)?;
    for (exchange, settings) in &config.circuit_breaker.exchanges {
        settings
            .validate(&format!("circuit_breaker.exchanges.{exchange}"))
            .map_err(invalid)?;
    }

    // Validate accounts
    let mut seen = HashSet::new();
    for account in &config.accounts {
        if account.id.trim().is_empty() {
            return Err(invalid("accounts[].id must not be empty".to_string()));
        }
        if !seen.insert(account.id.as_str()) {
            return Err(invalid(format!("duplicate account id '{}'", account.id)));
        }
        if account.exchange.trim().is_empty() {
            return Err(invalid(format!("account '{}' has no exchange", account.id)));
        }
        if account.webhook_secret.is_empty() {
            return Err(invalid(format!(
                "account '{}' has an empty webhook_secret",
                account.id
            )));
        }
    }

    // Validate environment mode
    let valid_modes = EnvironmentConfig::MODES;
    if !valid_modes.contains(&config.environment.mode.as_str()) {
        return Err(invalid(format!(
            "environment.mode must be one of: {valid_modes:?}"
        )));
    }

    Ok(())
}
