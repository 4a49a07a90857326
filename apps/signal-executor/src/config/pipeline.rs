//! Execution pipeline tuning.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::services::ExchangeAdapterConfig;
use crate::application::use_cases::PipelineConfig;

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Deadline for each exchange call (milliseconds).
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
    /// How long a fetched balance may be reused (milliseconds).
    #[serde(default = "default_balance_max_age_ms")]
    pub balance_max_age_ms: u64,
    /// Currency margin is posted in.
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    /// Leverage applied when a signal names none.
    #[serde(default = "default_leverage")]
    pub default_leverage: Decimal,
    /// Longest retry delay slept inline; longer delays go back to the queue.
    #[serde(default = "default_max_inline_retry_delay_ms")]
    pub max_inline_retry_delay_ms: u64,
    /// Reject signals older than this many seconds. `0` disables the check.
    #[serde(default)]
    pub max_signal_age_secs: u64,
    /// Queue worker poll interval (milliseconds).
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
    /// Ticker cache lifetime (milliseconds).
    #[serde(default = "default_price_cache_ttl_ms")]
    pub price_cache_ttl_ms: u64,
    /// Pending jobs the retry queue holds.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: default_exchange_timeout_ms(),
            balance_max_age_ms: default_balance_max_age_ms(),
            quote_currency: default_quote_currency(),
            default_leverage: default_leverage(),
            max_inline_retry_delay_ms: default_max_inline_retry_delay_ms(),
            max_signal_age_secs: 0,
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            price_cache_ttl_ms: default_price_cache_ttl_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl PipelineSettings {
    /// Convert to the pipeline's runtime configuration.
    #[must_use]
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            default_leverage: self.default_leverage,
            max_signal_age: (self.max_signal_age_secs > 0)
                .then_some(self.max_signal_age_secs)
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(chrono::Duration::try_seconds),
            max_inline_retry_delay: Some(Duration::from_millis(self.max_inline_retry_delay_ms)),
            balance_max_age: Duration::from_millis(self.balance_max_age_ms),
            adapter: ExchangeAdapterConfig {
                call_timeout: Duration::from_millis(self.exchange_timeout_ms),
                quote_currency: self.quote_currency.to_uppercase(),
            },
        }
    }

    /// Worker poll interval.
    #[must_use]
    pub const fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    /// Ticker cache lifetime.
    #[must_use]
    pub const fn price_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.price_cache_ttl_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.exchange_timeout_ms == 0 {
            return Err("pipeline.exchange_timeout_ms must be positive".to_string());
        }
        if self.worker_poll_interval_ms == 0 {
            return Err("pipeline.worker_poll_interval_ms must be positive".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("pipeline.queue_capacity must be positive".to_string());
        }
        if self.default_leverage < Decimal::ONE {
            return Err("pipeline.default_leverage must be at least 1".to_string());
        }
        if self.quote_currency.trim().is_empty() {
            return Err("pipeline.quote_currency must not be empty".to_string());
        }
        Ok(())
    }
}

const fn default_exchange_timeout_ms() -> u64 {
    10_000
}

const fn default_balance_max_age_ms() -> u64 {
    5_000
}

fn default_quote_currency() -> String {
    "USDT".to_string()
}

const fn default_leverage() -> Decimal {
    Decimal::ONE
}

const fn default_max_inline_retry_delay_ms() -> u64 {
    5_000
}

const fn default_worker_poll_interval_ms() -> u64 {
    250
}

const fn default_price_cache_ttl_ms() -> u64 {
    2_000
}

const fn default_queue_capacity() -> usize {
    10_000
}
