//! Category-keyed retry policies with bounded, jittered backoff.
//!
//! # Delay
//!
//! ```text
//! fixed        base
//! linear       base * (attempt + 1)
//! exponential  base * 2^attempt
//! ```
//!
//! The base delay is clamped to `max_delay_ms`, then jittered by
//! `delay * jitter_factor * (rand - 0.5)` and floored at zero.
//!
//! # Never retried
//!
//! `AUTHENTICATION_ERROR`, `ACCOUNT_NOT_FOUND`, `VALIDATION_ERROR`,
//! `EXCHANGE_REJECTED`, `INVALID_CONFIGURATION`, `POSITION_SIZE_ERROR`,
//! `INSUFFICIENT_BALANCE` and `SYSTEM_ERROR` carry a zero budget. Overrides
//! cannot lift it.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = RetryPolicyManager::new(Arc::new(ErrorClassifier::default()));
//! let ticker = manager
//!     .with_retry(&ErrorContext::for_account("acct-1"), || client.fetch_ticker(&symbol))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Classify, ErrorCategory, ErrorClassifier, ErrorContext, RETRY_AFTER_MS, TradingError};
use crate::observability::metrics;

/// Growth of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffType {
    /// Same delay every time.
    Fixed,
    /// Delay grows by the base each attempt.
    Linear,
    /// Delay doubles each attempt.
    Exponential,
}

/// Retry policy for one error category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure.
    pub max_attempts: u32,
    /// Delay growth.
    pub backoff: BackoffType,
    /// Base delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound of the base delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor in `[0, 1]`.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 0,
            backoff: BackoffType::Fixed,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Whether `error` may be retried after `attempt` earlier retries.
    #[must_use]
    pub fn should_retry(&self, error: &TradingError, attempt: u32) -> bool {
        !error.category().is_never_retryable() && attempt < self.max_attempts
    }

    /// Delay for `attempt` before jitter, clamped to `max_delay_ms`.
    #[must_use]
    pub fn base_delay_ms(&self, attempt: u32) -> f64 {
        let base = self.initial_delay_ms as f64;
        let delay = match self.backoff {
            BackoffType::Fixed => base,
            BackoffType::Linear => base * f64::from(attempt.saturating_add(1)),
            BackoffType::Exponential => base * 2f64.powi(attempt.min(62) as i32),
        };
        delay.min(self.max_delay_ms as f64)
    }

    /// Jittered delay for `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_ms(attempt);
        let jitter = if self.jitter_factor > 0.0 {
            delay * self.jitter_factor * (rand::rng().random::<f64>() - 0.5)
        } else {
            0.0
        };
        Duration::from_millis((delay + jitter).max(0.0).round() as u64)
    }
}

fn default_policy(category: ErrorCategory, classifier: &ErrorClassifier) -> RetryPolicy {
    if category.is_never_retryable() {
        return RetryPolicy::none();
    }
    let row = classifier.get_classification(category);
    let (backoff, max_delay_ms, jitter_factor) = match category {
        ErrorCategory::NetworkError => (BackoffType::Exponential, 30_000, 0.1),
        ErrorCategory::RateLimit => (BackoffType::Exponential, 60_000, 0.2),
        ErrorCategory::TemporaryUnavailable => (BackoffType::Exponential, 60_000, 0.1),
        ErrorCategory::Timeout => (BackoffType::Linear, 10_000, 0.1),
        ErrorCategory::DatabaseError => (BackoffType::Exponential, 10_000, 0.1),
        _ => (BackoffType::Fixed, row.retry_delay_ms, 0.0),
    };
    RetryPolicy {
        max_attempts: row.max_retries,
        backoff,
        initial_delay_ms: row.retry_delay_ms,
        max_delay_ms,
        jitter_factor,
    }
}

/// Audit record of a scheduled retry.
#[derive(Debug, Clone, Serialize)]
pub struct RetryAttempt {
    /// Zero-based retry number.
    pub attempt: u32,
    /// Failure that triggered the retry.
    pub error: TradingError,
    /// When the next attempt starts.
    pub next_retry_at: DateTime<Utc>,
    /// Delay before the next attempt.
    pub delay_ms: u64,
}

/// Why [`RetryPolicyManager::with_retry_budget`] stopped.
#[derive(Debug, Clone)]
pub enum RetryFailure {
    /// The policy refused a further retry.
    GaveUp {
        /// Last classified failure.
        error: TradingError,
        /// Retries performed before giving up.
        attempts: u32,
    },
    /// The next delay exceeds the inline budget; the caller should reschedule.
    Deferred {
        /// Last classified failure.
        error: TradingError,
        /// Retry number that was not performed inline.
        attempt: u32,
        /// Delay the policy asked for.
        delay: Duration,
    },
}

impl RetryFailure {
    /// Last classified failure.
    #[must_use]
    pub const fn error(&self) -> &TradingError {
        match self {
            Self::GaveUp { error, .. } | Self::Deferred { error, .. } => error,
        }
    }

    /// Consume into the last classified failure.
    #[must_use]
    pub fn into_error(self) -> TradingError {
        match self {
            Self::GaveUp { error, .. } | Self::Deferred { error, .. } => error,
        }
    }
}

/// Retry decisions keyed by error category.
///
/// Immutable after construction; share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RetryPolicyManager {
    policies: HashMap<ErrorCategory, RetryPolicy>,
    classifier: Arc<ErrorClassifier>,
}

impl RetryPolicyManager {
    /// Manager with default policies derived from the classification table.
    #[must_use]
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self::with_overrides(classifier, HashMap::new())
    }

    /// Manager with per-category overrides applied on top of the defaults.
    ///
    /// Overrides for never-retryable categories are ignored.
    #[must_use]
    pub fn with_overrides(
        classifier: Arc<ErrorClassifier>,
        overrides: HashMap<ErrorCategory, RetryPolicy>,
    ) -> Self {
        let mut policies: HashMap<_, _> = ErrorCategory::ALL
            .iter()
            .map(|c| (*c, default_policy(*c, &classifier)))
            .collect();

        for (category, policy) in overrides {
            if category.is_never_retryable() && policy.max_attempts > 0 {
                tracing::warn!(
                    category = %category,
                    max_attempts = policy.max_attempts,
                    "Ignoring retry override for non-retryable category"
                );
                continue;
            }
            policies.insert(category, policy);
        }

        Self {
            policies,
            classifier,
        }
    }

    /// Classifier used to turn operation failures into `TradingError`s.
    #[must_use]
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Policy for a category.
    #[must_use]
    pub fn get_policy(&self, category: ErrorCategory) -> &RetryPolicy {
        const NONE: RetryPolicy = RetryPolicy::none();
        self.policies
            .get(&category)
            .or_else(|| self.policies.get(&ErrorCategory::UnknownError))
            .unwrap_or(&NONE)
    }

    /// Whether `error` may be retried after `attempt` earlier retries.
    #[must_use]
    pub fn should_retry(&self, error: &TradingError, attempt: u32) -> bool {
        self.get_policy(error.category()).should_retry(error, attempt)
    }

    /// Delay before retry number `attempt`.
    ///
    /// An explicit retry hint on the error (e.g. a rate limit reset) raises
    /// the delay, never lowers it.
    #[must_use]
    pub fn calculate_delay(&self, error: &TradingError, attempt: u32) -> Duration {
        let delay = self.get_policy(error.category()).delay_for(attempt);
        let hint = error
            .context()
            .get(RETRY_AFTER_MS)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis);
        hint.map_or(delay, |hint| delay.max(hint))
    }

    /// Run `operation`, retrying per policy with non-blocking sleeps.
    ///
    /// Returns the last classified error once the policy gives up.
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        context: &ErrorContext,
        operation: F,
    ) -> Result<T, TradingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.with_retry_budget(context, None, |_| {}, operation)
            .await
            .map_err(RetryFailure::into_error)
    }

    /// Like [`Self::with_retry`], with an inline delay budget and an observer.
    ///
    /// A retry whose delay exceeds `max_inline_delay` is not slept on; the
    /// failure comes back as [`RetryFailure::Deferred`] so the caller can
    /// reschedule the work instead of holding resources.
    pub async fn with_retry_budget<T, E, F, Fut, O>(
        &self,
        context: &ErrorContext,
        max_inline_delay: Option<Duration>,
        mut on_retry: O,
        mut operation: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
        O: FnMut(&RetryAttempt),
    {
        let mut attempt = 0u32;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e.classify_with(&self.classifier, context),
            };

            if !self.should_retry(&error, attempt) {
                return Err(RetryFailure::GaveUp {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.calculate_delay(&error, attempt);
            if max_inline_delay.is_some_and(|budget| delay > budget) {
                return Err(RetryFailure::Deferred {
                    error,
                    attempt,
                    delay,
                });
            }

            let record = RetryAttempt {
                attempt,
                next_retry_at: Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()),
                delay_ms: delay.as_millis() as u64,
                error,
            };
            tracing::warn!(
                category = %record.error.category(),
                attempt = record.attempt,
                delay_ms = record.delay_ms,
                error = %record.error.message(),
                "Retrying after classified failure"
            );
            metrics::record_retry_attempt(record.error.category());
            on_retry(&record);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager() -> RetryPolicyManager {
        RetryPolicyManager::new(Arc::new(ErrorClassifier::default()))
    }

    fn error(category: ErrorCategory) -> TradingError {
        ErrorClassifier::default().error(category, "boom", ErrorContext::new())
    }

    #[test]
    fn never_retryable_categories_refuse_first_retry() {
        let manager = manager();
        for category in ErrorCategory::ALL.iter().filter(|c| c.is_never_retryable()) {
            assert!(!manager.should_retry(&error(*category), 0), "{category}");
        }
    }

    #[test]
    fn overrides_cannot_enable_non_retryable() {
        let mut overrides = HashMap::new();
        overrides.insert(
            ErrorCategory::ValidationError,
            RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::none()
            },
        );
        let manager =
            RetryPolicyManager::with_overrides(Arc::new(ErrorClassifier::default()), overrides);
        assert_eq!(manager.get_policy(ErrorCategory::ValidationError).max_attempts, 0);
    }

    #[test]
    fn network_budget_matches_classification() {
        let manager = manager();
        let err = error(ErrorCategory::NetworkError);
        assert!(manager.should_retry(&err, 0));
        assert!(manager.should_retry(&err, 2));
        assert!(!manager.should_retry(&err, 3));
    }

    #[test]
    fn linear_and_fixed_growth() {
        let linear = RetryPolicy {
            max_attempts: 5,
            backoff: BackoffType::Linear,
            initial_delay_ms: 100,
            max_delay_ms: 250,
            jitter_factor: 0.0,
        };
        assert_eq!(linear.base_delay_ms(0), 100.0);
        assert_eq!(linear.base_delay_ms(1), 200.0);
        assert_eq!(linear.base_delay_ms(2), 250.0);

        let fixed = RetryPolicy {
            backoff: BackoffType::Fixed,
            ..linear
        };
        assert_eq!(fixed.delay_for(4), Duration::from_millis(100));
    }

    #[test]
    fn retry_hint_raises_delay() {
        let manager = manager();
        let err = error(ErrorCategory::RateLimit).with_context(RETRY_AFTER_MS, 120_000);
        assert_eq!(manager.calculate_delay(&err, 0), Duration::from_secs(120));
    }

    proptest! {
        #[test]
        fn exponential_network_delay_is_monotonic_within_jitter(attempt in 0u32..12) {
            let manager = manager();
            let policy = manager.get_policy(ErrorCategory::NetworkError);
            let current = policy.base_delay_ms(attempt);
            let next = policy.base_delay_ms(attempt + 1);
            prop_assert!(next >= current);

            let half_jitter = current * policy.jitter_factor / 2.0;
            let delay = manager
                .calculate_delay(&error(ErrorCategory::NetworkError), attempt)
                .as_millis() as f64;
            prop_assert!(delay >= (current - half_jitter).floor());
            prop_assert!(delay <= (current + half_jitter).ceil());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_recovers_from_transient_failure() {
        let manager = manager();
        let calls = AtomicU32::new(0);

        let result = manager
            .with_retry(&ErrorContext::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("connection reset by peer".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_stops_on_non_retryable() {
        let manager = manager();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = manager
            .with_retry(&ErrorContext::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unauthorized: bad key".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err().category(), ErrorCategory::AuthenticationError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_defers_long_waits() {
        let manager = manager();

        let result: Result<(), _> = manager
            .with_retry_budget(
                &ErrorContext::new(),
                Some(Duration::from_secs(1)),
                |_| {},
                || async { Err("503 service unavailable".to_string()) },
            )
            .await;

        match result {
            Err(RetryFailure::Deferred { error, attempt, delay }) => {
                assert_eq!(error.category(), ErrorCategory::TemporaryUnavailable);
                assert_eq!(attempt, 0);
                assert!(delay > Duration::from_secs(1));
            }
            other => panic!("expected deferral, got {other:?}"),
        }
    }
}
