//! Resilience patterns for exchange calls.
//!
//! Circuit breakers gate attempts per exchange account; retry policies decide
//! whether and when a classified failure is tried again.

mod circuit_breaker;
mod registry;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerState,
    CircuitBreakerStats,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{BackoffType, RetryAttempt, RetryFailure, RetryPolicy, RetryPolicyManager};
