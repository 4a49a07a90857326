//! Classified error carrier and the public error response.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::{ErrorCategory, ErrorClassification};

/// Key/value context attached to a failure at the point it was classified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    account_id: Option<String>,
    fields: BTreeMap<String, String>,
}

impl ErrorContext {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context scoped to an account.
    #[must_use]
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    /// Account the failure belongs to.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Context fields.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// A failure that has been classified into the error taxonomy.
///
/// Values are immutable once built. Re-classification produces a new value
/// through [`TradingError::reclassified`] and keeps the original message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {message}")]
pub struct TradingError {
    category: ErrorCategory,
    classification: ErrorClassification,
    message: String,
    context: BTreeMap<String, String>,
    original_error: Option<String>,
    timestamp: DateTime<Utc>,
    alert_id: Option<String>,
    account_id: Option<String>,
}

impl TradingError {
    pub(crate) fn new(
        classification: ErrorClassification,
        message: impl Into<String>,
        context: ErrorContext,
        original_error: Option<String>,
    ) -> Self {
        let alert_id = classification
            .requires_immediate_alert
            .then(|| uuid::Uuid::new_v4().to_string());
        Self {
            category: classification.category,
            classification,
            message: message.into(),
            context: context.fields,
            original_error,
            timestamp: Utc::now(),
            alert_id,
            account_id: context.account_id,
        }
    }

    /// Copy of this error under a different classification.
    ///
    /// The message and context are kept; the previous rendering becomes the
    /// original error when none was recorded yet.
    #[must_use]
    pub fn reclassified(&self, classification: ErrorClassification) -> Self {
        let original = self
            .original_error
            .clone()
            .unwrap_or_else(|| self.to_string());
        let context = ErrorContext {
            account_id: self.account_id.clone(),
            fields: self.context.clone(),
        };
        Self::new(classification, self.message.clone(), context, Some(original))
    }

    /// Copy of this error with an extra context field.
    #[must_use]
    pub fn with_context(&self, key: impl Into<String>, value: impl ToString) -> Self {
        let mut copy = self.clone();
        copy.context.insert(key.into(), value.to_string());
        copy
    }

    /// Error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Classification row captured when the error was built.
    #[must_use]
    pub const fn classification(&self) -> &ErrorClassification {
        &self.classification
    }

    /// Human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Context fields.
    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Rendering of the underlying error, if any.
    #[must_use]
    pub fn original_error(&self) -> Option<&str> {
        self.original_error.as_deref()
    }

    /// When the error was classified.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Alert identifier, present for categories that page an operator.
    #[must_use]
    pub fn alert_id(&self) -> Option<&str> {
        self.alert_id.as_deref()
    }

    /// Account the failure belongs to.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Whether retrying can plausibly succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.classification.is_recoverable
    }

    /// Whether this failure counts against a circuit breaker.
    #[must_use]
    pub const fn should_circuit_break(&self) -> bool {
        self.classification.should_circuit_break
    }

    /// Whether an operator must be alerted.
    #[must_use]
    pub const fn requires_immediate_alert(&self) -> bool {
        self.classification.requires_immediate_alert
    }
}

/// Error body returned to external callers.
///
/// Carries no internal context: account id, alert id and the original error
/// stay in logs and alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable message.
    pub error: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Whether the caller may retry.
    pub is_recoverable: bool,
    /// Seconds to wait before retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Context key holding an explicit retry hint in milliseconds.
pub const RETRY_AFTER_MS: &str = "retry_after_ms";

/// Render a classified error for an external caller.
#[must_use]
pub fn format_error_response(error: &TradingError) -> ErrorResponse {
    let retry_after = error.is_recoverable().then(|| {
        let hint_ms = error
            .context()
            .get(RETRY_AFTER_MS)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(error.classification().retry_delay_ms);
        hint_ms.div_ceil(1_000).max(1)
    });

    ErrorResponse {
        error: error.message().to_string(),
        category: error.category(),
        is_recoverable: error.is_recoverable(),
        retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(category: ErrorCategory) -> ErrorClassification {
        ErrorClassification::default_for(category)
    }

    #[test]
    fn alert_id_only_for_alerting_categories() {
        let auth = TradingError::new(
            classification(ErrorCategory::AuthenticationError),
            "bad signature",
            ErrorContext::new(),
            None,
        );
        assert!(auth.alert_id().is_some());

        let network = TradingError::new(
            classification(ErrorCategory::NetworkError),
            "connection reset",
            ErrorContext::new(),
            None,
        );
        assert!(network.alert_id().is_none());
    }

    #[test]
    fn response_hides_internal_context() {
        let error = TradingError::new(
            classification(ErrorCategory::InsufficientBalance),
            "Insufficient margin",
            ErrorContext::for_account("acct-1").with("symbol", "BTCUSDT"),
            Some("raw exchange payload".to_string()),
        );

        let response = format_error_response(&error);
        let json = serde_json::to_string(&response).unwrap();

        assert_eq!(response.category, ErrorCategory::InsufficientBalance);
        assert!(!response.is_recoverable);
        assert!(response.retry_after.is_none());
        assert!(!json.contains("acct-1"));
        assert!(!json.contains("raw exchange payload"));
    }

    #[test]
    fn response_uses_retry_hint_when_present() {
        let error = TradingError::new(
            classification(ErrorCategory::TemporaryUnavailable),
            "circuit open",
            ErrorContext::new().with(RETRY_AFTER_MS, 2_500),
            None,
        );
        assert_eq!(format_error_response(&error).retry_after, Some(3));
    }

    #[test]
    fn response_defaults_retry_to_classification_delay() {
        let error = TradingError::new(
            classification(ErrorCategory::RateLimit),
            "slow down",
            ErrorContext::new(),
            None,
        );
        assert_eq!(format_error_response(&error).retry_after, Some(5));
    }

    #[test]
    fn reclassified_keeps_message_and_original() {
        let error = TradingError::new(
            classification(ErrorCategory::UnknownError),
            "weird failure",
            ErrorContext::for_account("acct-1"),
            None,
        );
        let moved = error.reclassified(classification(ErrorCategory::SystemError));

        assert_eq!(moved.category(), ErrorCategory::SystemError);
        assert_eq!(moved.message(), "weird failure");
        assert_eq!(moved.account_id(), Some("acct-1"));
        assert_eq!(moved.original_error(), Some("[UNKNOWN_ERROR] weird failure"));
        assert_eq!(error.category(), ErrorCategory::UnknownError);
    }
}
