//! Circuit breaker guarding calls to one exchange account.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (failures in monitoring window >= failure_threshold)
//! OPEN → HALF_OPEN (first call after timeout elapsed)
//! HALF_OPEN → CLOSED (success_threshold probe successes)
//! HALF_OPEN → OPEN (any probe failure)
//! ```
//!
//! State only changes inside [`CircuitBreaker::execute`] and is guarded by a
//! single mutex. The lock is never held across the guarded operation.
//!
//! # Example
//!
//! ```rust,ignore
//! let breaker = CircuitBreaker::new("binance:acct-1", CircuitBreakerConfig::default());
//!
//! match breaker.execute(|| client.place_order(&request)).await {
//!     Ok(order) => { /* ... */ }
//!     Err(CircuitBreakerError::Open { retry_after, .. }) => { /* fail fast */ }
//!     Err(CircuitBreakerError::Inner(e)) => { /* classify e */ }
//! }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{
    Classify, ErrorCategory, ErrorClassifier, ErrorContext, RETRY_AFTER_MS, TradingError,
};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without reaching the exchange.
    Open,
    /// A limited number of probe calls are let through.
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures inside the monitoring window that open the circuit.
    pub failure_threshold: u32,
    /// Probe successes in `HALF_OPEN` that close the circuit.
    pub success_threshold: u32,
    /// Time to stay `OPEN` before probing.
    pub timeout: Duration,
    /// Failures older than this no longer count.
    pub monitoring_period: Duration,
    /// Concurrent probes allowed in `HALF_OPEN`.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit rejected the call; the operation was not invoked.
    #[error("circuit breaker {name} is open, service temporarily unavailable")]
    Open {
        /// Breaker name.
        name: String,
        /// Time until the next probe is allowed.
        retry_after: Duration,
    },
    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E: Classify + std::fmt::Display> Classify for CircuitBreakerError<E> {
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError {
        match self {
            Self::Open { name, retry_after } => classifier.error(
                ErrorCategory::TemporaryUnavailable,
                self.to_string(),
                context
                    .clone()
                    .with("circuit_breaker", name)
                    .with(RETRY_AFTER_MS, retry_after.as_millis()),
            ),
            Self::Inner(inner) => inner.classify_with(classifier, context),
        }
    }
}

/// Point-in-time statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Calls admitted since the circuit last closed.
    pub request_count: u64,
    /// Successes since the circuit last closed, or probe successes in `HALF_OPEN`.
    pub success_count: u64,
    /// Failures inside the monitoring window.
    pub failure_count: u64,
    /// Calls rejected while open.
    pub rejected_count: u64,
    /// Milliseconds since the circuit opened, when open.
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitBreakerState,
    failures: VecDeque<Instant>,
    request_count: u64,
    success_count: u64,
    rejected_count: u64,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .failures
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) > window)
        {
            self.failures.pop_front();
        }
    }
}

enum Permit {
    Closed,
    Probe,
}

/// Circuit breaker for one resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitBreakerState::Closed,
                failures: VecDeque::new(),
                request_count: 0,
                success_count: 0,
                rejected_count: 0,
                half_open_in_flight: 0,
                opened_at: None,
            }),
        }
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state as last recorded. Does not advance `OPEN` to `HALF_OPEN`.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    /// Time until the next probe is allowed, if the circuit is open.
    #[must_use]
    pub fn remaining_open(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitBreakerState::Open, Some(opened)) => {
                let elapsed = Instant::now().saturating_duration_since(opened);
                self.config.timeout.checked_sub(elapsed)
            }
            _ => None,
        }
    }

    /// Run `operation` through the breaker. Every error counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_filtered(operation, |_| true).await
    }

    /// Run `operation` through the breaker.
    ///
    /// Errors for which `counts_as_failure` returns `false` (e.g. an order the
    /// exchange rejected for business reasons) are passed through without
    /// touching the failure window.
    pub async fn execute_filtered<T, E, F, Fut, P>(
        &self,
        operation: F,
        counts_as_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let permit = self.acquire::<E>()?;
        let result = operation().await;

        match &result {
            Ok(_) => self.on_success(&permit),
            Err(e) if counts_as_failure(e) => self.on_failure(&permit),
            Err(_) => self.on_neutral(&permit),
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Current statistics.
    #[must_use]
    pub fn get_stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.prune(now, self.config.monitoring_period);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            request_count: inner.request_count,
            success_count: inner.success_count,
            failure_count: inner.failures.len() as u64,
            rejected_count: inner.rejected_count,
            open_for_ms: inner
                .opened_at
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn acquire<E>(&self) -> Result<Permit, CircuitBreakerError<E>> {
        let now = Instant::now();
        let mut inner = self.lock();

        if inner.state == CircuitBreakerState::Open {
            let elapsed = inner
                .opened_at
                .map_or(self.config.timeout, |t| now.saturating_duration_since(t));
            if elapsed < self.config.timeout {
                inner.rejected_count += 1;
                drop(inner);
                metrics::record_circuit_breaker_rejected(&self.name);
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after: self.config.timeout - elapsed,
                });
            }
            self.transition(&mut inner, CircuitBreakerState::HalfOpen, now);
        }

        if inner.state == CircuitBreakerState::HalfOpen {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.rejected_count += 1;
                drop(inner);
                metrics::record_circuit_breaker_rejected(&self.name);
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    retry_after: Duration::ZERO,
                });
            }
            inner.half_open_in_flight += 1;
            inner.request_count += 1;
            return Ok(Permit::Probe);
        }

        inner.request_count += 1;
        Ok(Permit::Closed)
    }

    fn on_success(&self, permit: &Permit) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.success_count += 1;

        if let Permit::Probe = permit {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            if inner.state == CircuitBreakerState::HalfOpen
                && inner.success_count >= u64::from(self.config.success_threshold)
            {
                self.transition(&mut inner, CircuitBreakerState::Closed, now);
            }
        }
        drop(inner);
        metrics::record_circuit_breaker_success(&self.name);
    }

    fn on_failure(&self, permit: &Permit) {
        let now = Instant::now();
        let mut inner = self.lock();

        match permit {
            Permit::Probe => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.failures.push_back(now);
                if inner.state == CircuitBreakerState::HalfOpen {
                    self.transition(&mut inner, CircuitBreakerState::Open, now);
                }
            }
            Permit::Closed => {
                inner.failures.push_back(now);
                inner.prune(now, self.config.monitoring_period);
                if inner.state == CircuitBreakerState::Closed
                    && inner.failures.len() >= self.config.failure_threshold as usize
                {
                    self.transition(&mut inner, CircuitBreakerState::Open, now);
                }
            }
        }
        drop(inner);
        metrics::record_circuit_breaker_failure(&self.name);
    }

    fn on_neutral(&self, permit: &Permit) {
        if let Permit::Probe = permit {
            let mut inner = self.lock();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitBreakerState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitBreakerState::Open => {
                inner.opened_at = Some(now);
                inner.success_count = 0;
                tracing::warn!(
                    name = %self.name,
                    from = %from,
                    to = "OPEN",
                    failures = inner.failures.len(),
                    "Circuit breaker opened"
                );
            }
            CircuitBreakerState::HalfOpen => {
                inner.success_count = 0;
                inner.half_open_in_flight = 0;
                tracing::info!(
                    name = %self.name,
                    from = %from,
                    to = "HALF_OPEN",
                    "Circuit breaker probing"
                );
            }
            CircuitBreakerState::Closed => {
                inner.failures.clear();
                inner.request_count = 0;
                inner.success_count = 0;
                inner.opened_at = None;
                tracing::info!(
                    name = %self.name,
                    from = %from,
                    to = "CLOSED",
                    "Circuit breaker closed"
                );
            }
        }
        metrics::record_circuit_breaker_state(&self.name, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(10),
            monitoring_period: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.execute(|| async { Err("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_and_rejects_without_calling() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(CircuitBreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        let mut invoked = false;
        let result: Result<(), CircuitBreakerError<&str>> = breaker
            .execute(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!invoked);
        assert_eq!(breaker.get_stats().rejected_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_age_out_of_window() {
        let breaker = CircuitBreaker::new("test", config());
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&breaker).await.ok();

        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.get_stats().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        let stats = breaker.get_stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.request_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_with_fresh_timer() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        fail(&breaker).await.ok();

        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        let remaining = breaker.remaining_open().unwrap();
        assert_eq!(remaining, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn neutral_errors_do_not_count() {
        let breaker = CircuitBreaker::new("test", config());
        for _ in 0..5 {
            let _ = breaker
                .execute_filtered(|| async { Err::<(), _>("rejected") }, |_| false)
                .await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.get_stats().failure_count, 0);
    }

    #[test]
    fn open_error_classifies_as_temporarily_unavailable() {
        let error: CircuitBreakerError<String> = CircuitBreakerError::Open {
            name: "binance:acct-1".to_string(),
            retry_after: Duration::from_millis(4_200),
        };
        let classified = error.classify_with(&ErrorClassifier::default(), &ErrorContext::new());

        assert_eq!(classified.category(), ErrorCategory::TemporaryUnavailable);
        assert_eq!(
            classified.context().get(RETRY_AFTER_MS).map(String::as_str),
            Some("4200")
        );
    }
}
