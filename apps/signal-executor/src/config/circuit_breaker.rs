//! Circuit breaker configuration for exchange accounts.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CircuitBreakerConfig {
    /// Settings for every exchange without an override.
    #[serde(default)]
    pub default: CircuitBreakerSettings,
    /// Per-exchange overrides, keyed by exchange name.
    #[serde(default)]
    pub exchanges: HashMap<String, CircuitBreakerSettings>,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Failures inside the monitoring window that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Probe successes that close a half-open circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Duration in open state (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Window in which failures are counted (seconds).
    #[serde(default = "default_monitoring_period_secs")]
    pub monitoring_period_secs: u64,
    /// Calls permitted in half-open state.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_timeout_secs(),
            monitoring_period_secs: default_monitoring_period_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert config settings to resilience module's `CircuitBreakerConfig`.
    #[must_use]
    pub const fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
            monitoring_period: Duration::from_secs(self.monitoring_period_secs),
            half_open_max_calls: self.half_open_max_calls,
        }
    }

    pub(crate) fn validate(&self, scope: &str) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err(format!("{scope}.failure_threshold must be positive"));
        }
        if self.success_threshold == 0 {
            return Err(format!("{scope}.success_threshold must be positive"));
        }
        if self.half_open_max_calls == 0 {
            return Err(format!("{scope}.half_open_max_calls must be positive"));
        }
        if self.monitoring_period_secs == 0 {
            return Err(format!("{scope}.monitoring_period_secs must be positive"));
        }
        Ok(())
    }
}

impl CircuitBreakerConfig {
    /// Build a breaker registry from these settings.
    #[must_use]
    pub fn build_registry(&self) -> crate::resilience::CircuitBreakerRegistry {
        let overrides = self
            .exchanges
            .iter()
            .map(|(exchange, settings)| (exchange.clone(), settings.to_resilience_config()))
            .collect();
        crate::resilience::CircuitBreakerRegistry::new(
            self.default.to_resilience_config(),
            overrides,
        )
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_monitoring_period_secs() -> u64 {
    60
}

const fn default_half_open_max_calls() -> u32 {
    2
}
