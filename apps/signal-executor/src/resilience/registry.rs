//! Lazily created circuit breakers keyed by `exchange:account`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};

/// Registry of breakers, one per exchange account.
///
/// Each exchange may override the default configuration.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Registry using `default_config` for every exchange without an override.
    #[must_use]
    pub fn new(
        default_config: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
    ) -> Self {
        Self {
            default_config,
            overrides,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Resource key for an exchange account.
    #[must_use]
    pub fn resource_key(exchange: &str, account_id: &str) -> String {
        format!("{exchange}:{account_id}")
    }

    /// Breaker for an exchange account, created on first use.
    pub fn get_or_create(&self, exchange: &str, account_id: &str) -> Arc<CircuitBreaker> {
        let key = Self::resource_key(exchange, account_id);

        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(breaker);
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let breaker = breakers.entry(key).or_insert_with_key(|key| {
            let config = self
                .overrides
                .get(exchange)
                .unwrap_or(&self.default_config)
                .clone();
            tracing::debug!(resource = %key, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(key.clone(), config))
        });
        Arc::clone(breaker)
    }

    /// Breaker for a resource key, if it exists.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Statistics for every breaker, sorted by name.
    #[must_use]
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<_> = self
            .breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut stats: Vec<_> = breakers.iter().map(|b| b.get_stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
