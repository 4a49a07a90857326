//! Error taxonomy and the immutable classification table.
//!
//! Every failure in the execution pipeline is mapped onto exactly one
//! [`ErrorCategory`]. The category decides recoverability, the retry budget,
//! whether the failure counts against a circuit breaker and whether an
//! operator must be alerted.
//!
//! | Category | Recoverable | Retries | Delay (ms) | Breaker | Alert |
//! |----------|-------------|---------|------------|---------|-------|
//! | `NETWORK_ERROR` | yes | 3 | 1000 | yes | no |
//! | `RATE_LIMIT` | yes | 5 | 5000 | no | no |
//! | `TEMPORARY_UNAVAILABLE` | yes | 3 | 10000 | yes | no |
//! | `TIMEOUT` | yes | 2 | 2000 | yes | no |
//! | `INSUFFICIENT_BALANCE` | no | 0 | 0 | no | yes |
//! | `PRICE_FEED_ERROR` | yes | 3 | 1000 | no | no |
//! | `POSITION_SIZE_ERROR` | no | 0 | 0 | no | yes |
//! | `AUTHENTICATION_ERROR` | no | 0 | 0 | yes | yes |
//! | `ACCOUNT_NOT_FOUND` | no | 0 | 0 | no | yes |
//! | `INVALID_CONFIGURATION` | no | 0 | 0 | no | yes |
//! | `VALIDATION_ERROR` | no | 0 | 0 | no | no |
//! | `EXCHANGE_REJECTED` | no | 0 | 0 | no | yes |
//! | `DATABASE_ERROR` | yes | 3 | 1000 | no | yes |
//! | `SYSTEM_ERROR` | no | 0 | 0 | no | yes |
//! | `UNKNOWN_ERROR` | yes | 1 | 2000 | no | yes |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Transport level failure reaching the exchange.
    NetworkError,
    /// Exchange throttled the request.
    RateLimit,
    /// Exchange (or a guard in front of it) is temporarily unavailable.
    TemporaryUnavailable,
    /// Call did not complete in time.
    Timeout,
    /// Free margin does not cover the order.
    InsufficientBalance,
    /// Ticker or market data could not be obtained.
    PriceFeedError,
    /// Order size violates exchange or account limits.
    PositionSizeError,
    /// Credentials or webhook signature rejected.
    AuthenticationError,
    /// Account unknown or inactive.
    AccountNotFound,
    /// Service or account configuration is wrong.
    InvalidConfiguration,
    /// Payload or parameter validation failed.
    ValidationError,
    /// Exchange refused the order for business reasons.
    ExchangeRejected,
    /// Persistence layer failure.
    DatabaseError,
    /// Internal fault of this service.
    SystemError,
    /// Anything no rule recognised.
    UnknownError,
}

impl ErrorCategory {
    /// All categories, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::NetworkError,
        Self::RateLimit,
        Self::TemporaryUnavailable,
        Self::Timeout,
        Self::InsufficientBalance,
        Self::PriceFeedError,
        Self::PositionSizeError,
        Self::AuthenticationError,
        Self::AccountNotFound,
        Self::InvalidConfiguration,
        Self::ValidationError,
        Self::ExchangeRejected,
        Self::DatabaseError,
        Self::SystemError,
        Self::UnknownError,
    ];

    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::RateLimit => "RATE_LIMIT",
            Self::TemporaryUnavailable => "TEMPORARY_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::PriceFeedError => "PRICE_FEED_ERROR",
            Self::PositionSizeError => "POSITION_SIZE_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::InvalidConfiguration => "INVALID_CONFIGURATION",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ExchangeRejected => "EXCHANGE_REJECTED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Categories that are never retried, whatever the configuration says.
    #[must_use]
    pub const fn is_never_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationError
                | Self::AccountNotFound
                | Self::ValidationError
                | Self::ExchangeRejected
                | Self::InvalidConfiguration
                | Self::PositionSizeError
                | Self::InsufficientBalance
                | Self::SystemError
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handling rules attached to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Category this row describes.
    pub category: ErrorCategory,
    /// Whether retrying can plausibly succeed.
    pub is_recoverable: bool,
    /// Retry budget for the category.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Whether the failure counts against the circuit breaker.
    pub should_circuit_break: bool,
    /// Whether an operator must be alerted synchronously.
    pub requires_immediate_alert: bool,
}

impl ErrorClassification {
    const fn row(
        category: ErrorCategory,
        is_recoverable: bool,
        max_retries: u32,
        retry_delay_ms: u64,
        should_circuit_break: bool,
        requires_immediate_alert: bool,
    ) -> Self {
        Self {
            category,
            is_recoverable,
            max_retries,
            retry_delay_ms,
            should_circuit_break,
            requires_immediate_alert,
        }
    }

    /// Default row for a category.
    #[must_use]
    pub const fn default_for(category: ErrorCategory) -> Self {
        use ErrorCategory as C;
        match category {
            C::NetworkError => Self::row(category, true, 3, 1_000, true, false),
            C::RateLimit => Self::row(category, true, 5, 5_000, false, false),
            C::TemporaryUnavailable => Self::row(category, true, 3, 10_000, true, false),
            C::Timeout => Self::row(category, true, 2, 2_000, true, false),
            C::InsufficientBalance => Self::row(category, false, 0, 0, false, true),
            C::PriceFeedError => Self::row(category, true, 3, 1_000, false, false),
            C::PositionSizeError => Self::row(category, false, 0, 0, false, true),
            C::AuthenticationError => Self::row(category, false, 0, 0, true, true),
            C::AccountNotFound => Self::row(category, false, 0, 0, false, true),
            C::InvalidConfiguration => Self::row(category, false, 0, 0, false, true),
            C::ValidationError => Self::row(category, false, 0, 0, false, false),
            C::ExchangeRejected => Self::row(category, false, 0, 0, false, true),
            C::DatabaseError => Self::row(category, true, 3, 1_000, false, true),
            C::SystemError => Self::row(category, false, 0, 0, false, true),
            C::UnknownError => Self::row(category, true, 1, 2_000, false, true),
        }
    }
}

/// Immutable category → classification lookup.
///
/// Built once at startup and shared behind an `Arc`. A lookup never fails:
/// a category missing from a custom table resolves to the `UNKNOWN_ERROR` row.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    rows: HashMap<ErrorCategory, ErrorClassification>,
    fallback: ErrorClassification,
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self::from_rows(ErrorCategory::ALL.map(ErrorClassification::default_for))
    }
}

impl ClassificationTable {
    /// Build a table from explicit rows.
    ///
    /// Rows are keyed by their own `category`; later rows replace earlier ones.
    #[must_use]
    pub fn from_rows(rows: impl IntoIterator<Item = ErrorClassification>) -> Self {
        let rows: HashMap<_, _> = rows.into_iter().map(|r| (r.category, r)).collect();
        let fallback = rows
            .get(&ErrorCategory::UnknownError)
            .copied()
            .unwrap_or_else(|| ErrorClassification::default_for(ErrorCategory::UnknownError));
        Self { rows, fallback }
    }

    /// Classification for a category.
    #[must_use]
    pub fn get(&self, category: ErrorCategory) -> ErrorClassification {
        self.rows.get(&category).copied().unwrap_or(self.fallback)
    }

    /// Number of explicit rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no explicit rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
