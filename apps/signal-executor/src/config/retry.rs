//! Retry policy overrides per error category.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;
use crate::resilience::RetryPolicy;

/// Retry configuration.
///
/// Categories not listed keep the policy derived from the classification
/// table.
///
/// ```yaml
/// retry:
///   overrides:
///     NETWORK_ERROR:
///       max_attempts: 5
///       backoff: exponential
///       initial_delay_ms: 500
///       max_delay_ms: 20000
///       jitter_factor: 0.2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryConfig {
    /// Per-category policy overrides.
    #[serde(default)]
    pub overrides: HashMap<ErrorCategory, RetryPolicy>,
}

impl RetryConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        for (category, policy) in &self.overrides {
            if !(0.0..=1.0).contains(&policy.jitter_factor) {
                return Err(format!(
                    "retry.overrides.{category}.jitter_factor must be between 0.0 and 1.0"
                ));
            }
            if policy.max_delay_ms < policy.initial_delay_ms {
                return Err(format!(
                    "retry.overrides.{category}.max_delay_ms must be >= initial_delay_ms"
                ));
            }
        }
        Ok(())
    }
}
