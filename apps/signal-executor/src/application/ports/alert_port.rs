//! Alert Port (Driven Port)
//!
//! Operator notification for failures that need a human.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCategory, TradingError};

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Degraded but trading continues.
    Warning,
    /// Trading for the account is affected.
    Critical,
}

/// Notification sent to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id; matches the error's alert id when raised from one.
    pub id: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Error category.
    pub category: ErrorCategory,
    /// Summary.
    pub message: String,
    /// Affected account.
    pub account_id: Option<String>,
    /// Diagnostic fields.
    pub context: BTreeMap<String, String>,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Critical alert for a classified error.
    #[must_use]
    pub fn from_error(error: &TradingError) -> Self {
        let mut context = error.context().clone();
        if let Some(original) = error.original_error() {
            context.insert("original_error".to_string(), original.to_string());
        }
        Self {
            id: error
                .alert_id()
                .map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
            severity: AlertSeverity::Critical,
            category: error.category(),
            message: error.message().to_string(),
            account_id: error.account_id().map(str::to_string),
            context,
            timestamp: error.timestamp(),
        }
    }

    /// Downgrade to a warning.
    #[must_use]
    pub fn warning(self) -> Self {
        Self {
            severity: AlertSeverity::Warning,
            ..self
        }
    }
}

/// Alert delivery error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("alert delivery failed: {message}")]
pub struct AlertError {
    /// Error details.
    pub message: String,
}

/// Alert sink.
#[async_trait]
pub trait AlertPort: Send + Sync {
    /// Deliver an alert.
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError>;
}
