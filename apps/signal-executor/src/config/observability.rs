//! Observability configuration for logging and metrics.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::observability::MetricsConfig;

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus exporter configuration.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format, `full` or `compact`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Start the exporter.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Listener address for `/metrics`.
    #[serde(default = "default_metrics_listen_addr")]
    pub listen_addr: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_metrics_listen_addr(),
        }
    }
}

impl MetricsSettings {
    /// Exporter configuration, or `None` when disabled or the address is invalid.
    #[must_use]
    pub fn to_metrics_config(&self) -> Option<MetricsConfig> {
        if !self.enabled {
            return None;
        }
        self.listen_addr
            .parse::<SocketAddr>()
            .ok()
            .map(MetricsConfig::with_addr)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.enabled && self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "observability.metrics.listen_addr '{}' is not a socket address",
                self.listen_addr
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "signal_executor=info,tower_http=info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_metrics_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}
