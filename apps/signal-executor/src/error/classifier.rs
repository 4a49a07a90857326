//! Ordered, first-match-wins failure classifier.
//!
//! Rules are evaluated in order over the lowercased error message and error
//! name; the first matching rule decides. Transport failures come first, then
//! throttling, timeouts and outages, then credentials, funds and accounts.
//! Validation sits above the price, size, database, rejection and
//! configuration rules, so "invalid price" is a validation failure and
//! "connection timed out" is a network failure.

use std::sync::Arc;

use super::category::{ClassificationTable, ErrorCategory, ErrorClassification};
use super::trading_error::{ErrorContext, TradingError};

/// A single needle a rule looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Substring match.
    Phrase(&'static str),
    /// Numeric status code not embedded in a longer number.
    StatusCode(&'static str),
}

impl Pattern {
    fn matches(self, haystack: &str) -> bool {
        match self {
            Self::Phrase(needle) => haystack.contains(needle),
            Self::StatusCode(code) => haystack.match_indices(code).any(|(start, _)| {
                let before = haystack[..start].chars().next_back();
                let after = haystack[start + code.len()..].chars().next();
                !before.is_some_and(|c| c.is_ascii_digit())
                    && !after.is_some_and(|c| c.is_ascii_digit())
            }),
        }
    }
}

/// Predicate/category pair.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    /// Category assigned on match.
    pub category: ErrorCategory,
    /// Any pattern matching selects the rule.
    pub patterns: &'static [Pattern],
}

impl ClassificationRule {
    /// Whether the rule applies to an already lowercased text.
    #[must_use]
    pub fn matches(&self, lowercased: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(lowercased))
    }
}

use Pattern::{Phrase, StatusCode};

/// Default rule order: network, rate limit, timeout, unavailable, auth,
/// balance, account, validation, price feed, position size, database,
/// rejection, configuration, system. Anything else is `UnknownError`.
pub const DEFAULT_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        category: ErrorCategory::NetworkError,
        patterns: &[
            Phrase("network"),
            Phrase("connection"),
            Phrase("econnrefused"),
            Phrase("econnreset"),
            Phrase("enotfound"),
            Phrase("socket"),
            Phrase("dns"),
            Phrase("broken pipe"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::RateLimit,
        patterns: &[
            Phrase("rate limit"),
            Phrase("rate-limit"),
            Phrase("ratelimit"),
            Phrase("too many requests"),
            StatusCode("429"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::Timeout,
        patterns: &[Phrase("timeout"), Phrase("timed out"), Phrase("etimedout")],
    },
    ClassificationRule {
        category: ErrorCategory::TemporaryUnavailable,
        patterns: &[
            StatusCode("503"),
            StatusCode("502"),
            Phrase("service unavailable"),
            Phrase("temporarily unavailable"),
            Phrase("unavailable"),
            Phrase("bad gateway"),
            Phrase("maintenance"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::AuthenticationError,
        patterns: &[
            Phrase("unauthorized"),
            StatusCode("401"),
            StatusCode("403"),
            Phrase("forbidden"),
            Phrase("authentication"),
            Phrase("invalid api key"),
            Phrase("api key"),
            Phrase("api-key"),
            Phrase("signature"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::InsufficientBalance,
        patterns: &[
            Phrase("insufficient balance"),
            Phrase("insufficient margin"),
            Phrase("insufficient funds"),
            Phrase("not enough balance"),
            Phrase("margin is insufficient"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::AccountNotFound,
        patterns: &[
            Phrase("account not found"),
            Phrase("account inactive"),
            Phrase("account is inactive"),
            Phrase("account disabled"),
            Phrase("unknown account"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::ValidationError,
        patterns: &[Phrase("validation"), Phrase("schema"), Phrase("invalid")],
    },
    ClassificationRule {
        category: ErrorCategory::PriceFeedError,
        patterns: &[
            Phrase("price feed"),
            Phrase("market data"),
            Phrase("market-data"),
            Phrase("ticker"),
            Phrase("price"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::PositionSizeError,
        patterns: &[
            Phrase("order size"),
            Phrase("position size"),
            Phrase("quantity too"),
            Phrase("min notional"),
            Phrase("minimum notional"),
            Phrase("lot size"),
            Phrase("max position"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::DatabaseError,
        patterns: &[
            Phrase("database"),
            Phrase("query"),
            Phrase("sql"),
            Phrase("deadlock"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::ExchangeRejected,
        patterns: &[
            Phrase("rejected"),
            Phrase("trading halted"),
            Phrase("trading is halted"),
            Phrase("market closed"),
            Phrase("market is closed"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::InvalidConfiguration,
        patterns: &[
            Phrase("configuration"),
            Phrase("not configured"),
            Phrase("env var"),
            Phrase("environment variable"),
            Phrase("missing"),
        ],
    },
    ClassificationRule {
        category: ErrorCategory::SystemError,
        patterns: &[
            Phrase("panic"),
            Phrase("internal error"),
            Phrase("out of memory"),
        ],
    },
];

/// Failure classifier.
///
/// Pure and immutable: construct once, share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
    table: Arc<ClassificationTable>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(ClassificationTable::default()))
    }
}

impl ErrorClassifier {
    /// Classifier with the default rule order and the given table.
    #[must_use]
    pub fn new(table: Arc<ClassificationTable>) -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
            table,
        }
    }

    /// Category for a message and optional error name.
    #[must_use]
    pub fn categorize(&self, message: &str, name: Option<&str>) -> ErrorCategory {
        let message = message.to_lowercase();
        let name = name.map(str::to_lowercase);

        self.rules
            .iter()
            .find(|rule| rule.matches(&message) || name.as_deref().is_some_and(|n| rule.matches(n)))
            .map_or(ErrorCategory::UnknownError, |rule| rule.category)
    }

    /// Classify a raw failure. Never fails.
    #[must_use]
    pub fn classify(&self, message: &str, name: Option<&str>, context: ErrorContext) -> TradingError {
        let category = self.categorize(message, name);
        TradingError::new(
            self.table.get(category),
            message,
            context,
            Some(match name {
                Some(name) => format!("{name}: {message}"),
                None => message.to_string(),
            }),
        )
    }

    /// Build an error of a known category without pattern matching.
    #[must_use]
    pub fn error(
        &self,
        category: ErrorCategory,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> TradingError {
        TradingError::new(self.table.get(category), message, context, None)
    }

    /// Copy of `error` moved into another category.
    #[must_use]
    pub fn reclassify(&self, error: &TradingError, category: ErrorCategory) -> TradingError {
        error.reclassified(self.table.get(category))
    }

    /// Constant-time table lookup.
    #[must_use]
    pub fn get_classification(&self, category: ErrorCategory) -> ErrorClassification {
        self.table.get(category)
    }
}

/// Conversion of a layer error into a [`TradingError`].
pub trait Classify {
    /// Classify `self` with the given context.
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError;
}

impl Classify for TradingError {
    /// Already classified; returned as is.
    fn classify_with(&self, _classifier: &ErrorClassifier, _context: &ErrorContext) -> TradingError {
        self.clone()
    }
}

impl Classify for String {
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError {
        classifier.classify(self, None, context.clone())
    }
}
