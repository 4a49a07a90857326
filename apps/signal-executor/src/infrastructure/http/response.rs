//! HTTP response DTOs and the outcome to status mapping.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::ports::{DeadLetter, StoredOrder};
use crate::application::use_cases::{ExecutionOutcome, ExecutionStage, FailureDisposition};
use crate::domain::order_execution::Order;
use crate::error::{ErrorCategory, ErrorResponse, TradingError, format_error_response};
use crate::resilience::CircuitBreakerStats;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` while any circuit is open.
    pub status: String,
    /// Application version.
    pub version: String,
    /// Circuits currently open.
    pub open_circuits: Vec<String>,
    /// Jobs waiting in the retry queue.
    pub queue_depth: usize,
}

/// Result of one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Queue job id assigned to the webhook.
    pub job_id: Uuid,
    /// `filled`, `open`, `already_executed`, `in_flight`, `rescheduled`,
    /// `rejected` or `dead_lettered`.
    pub status: String,
    /// Stage the execution reached or failed at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<ExecutionStage>,
    /// Order, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    /// Failure, when execution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Breaker snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakersResponse {
    /// One entry per exchange account that has been called.
    pub breakers: Vec<CircuitBreakerStats>,
}

/// A dead letter as shown to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterResponse {
    /// Dead letter id, used for replay.
    pub id: Uuid,
    /// Original job id.
    pub job_id: Uuid,
    /// Account the webhook was for.
    pub account_id: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Classified message.
    pub message: String,
    /// Alert id, for alerting categories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    /// Attempts made before giving up.
    pub retry_count: u32,
    /// When the job was dead-lettered.
    pub timestamp: DateTime<Utc>,
}

impl From<&DeadLetter> for DeadLetterResponse {
    fn from(letter: &DeadLetter) -> Self {
        Self {
            id: letter.id,
            job_id: letter.job.id,
            account_id: letter.job.account_id.to_string(),
            category: letter.error.category(),
            message: letter.error.message().to_string(),
            alert_id: letter.error.alert_id().map(str::to_string),
            retry_count: letter.retry_count,
            timestamp: letter.timestamp,
        }
    }
}

/// Dead letter listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLettersResponse {
    /// Dead letters, oldest first.
    pub dead_letters: Vec<DeadLetterResponse>,
}

/// Replay acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponse {
    /// Replayed dead letter.
    pub dead_letter_id: Uuid,
    /// Job id now on the queue.
    pub job_id: Uuid,
}

/// Stored orders matching a client order id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersResponse {
    /// Matching orders, newest first.
    pub orders: Vec<StoredOrder>,
}

/// Plain error body for operator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// What went wrong.
    pub error: String,
}

/// HTTP status for a classified failure.
#[must_use]
pub const fn status_for_category(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::AuthenticationError => StatusCode::UNAUTHORIZED,
        ErrorCategory::ValidationError | ErrorCategory::PositionSizeError => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorCategory::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
        ErrorCategory::AccountNotFound => StatusCode::NOT_FOUND,
        ErrorCategory::TemporaryUnavailable | ErrorCategory::RateLimit => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn failure_status(error: &TradingError, disposition: FailureDisposition) -> StatusCode {
    match disposition {
        FailureDisposition::Rescheduled { .. } => StatusCode::ACCEPTED,
        _ => status_for_category(error.category()),
    }
}

/// Render a pipeline outcome.
#[must_use]
pub fn webhook_response(job_id: Uuid, outcome: ExecutionOutcome) -> Response {
    let (status, retry_after, body) = match outcome {
        ExecutionOutcome::Executed { order, stage } => (
            StatusCode::OK,
            None,
            WebhookResponse {
                job_id,
                status: stage.as_str().to_string(),
                stage: Some(stage),
                order: Some(order),
                error: None,
            },
        ),
        ExecutionOutcome::AlreadyExecuted { order } => (
            StatusCode::OK,
            None,
            WebhookResponse {
                job_id,
                status: "already_executed".to_string(),
                stage: None,
                order: Some(order),
                error: None,
            },
        ),
        ExecutionOutcome::InFlight { client_order_id } => (
            StatusCode::CONFLICT,
            None,
            WebhookResponse {
                job_id,
                status: "in_flight".to_string(),
                stage: None,
                order: None,
                error: Some(ErrorResponse {
                    error: format!("order {client_order_id} is already executing"),
                    category: ErrorCategory::ValidationError,
                    is_recoverable: false,
                    retry_after: None,
                }),
            },
        ),
        ExecutionOutcome::Failed {
            stage,
            error,
            disposition,
        } => {
            let status = failure_status(&error, disposition);
            let rendered = format_error_response(&error);
            let retry_after = match disposition {
                FailureDisposition::Rescheduled { delay } => Some(delay.as_secs().max(1)),
                _ if status == StatusCode::SERVICE_UNAVAILABLE => rendered.retry_after,
                _ => None,
            };
            (
                status,
                retry_after,
                WebhookResponse {
                    job_id,
                    status: disposition.as_str().to_string(),
                    stage: Some(stage),
                    order: None,
                    error: Some(rendered),
                },
            )
        }
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(ErrorCategory::AuthenticationError, StatusCode::UNAUTHORIZED)]
    #[test_case(ErrorCategory::ValidationError, StatusCode::UNPROCESSABLE_ENTITY)]
    #[test_case(ErrorCategory::PositionSizeError, StatusCode::UNPROCESSABLE_ENTITY)]
    #[test_case(ErrorCategory::InsufficientBalance, StatusCode::PAYMENT_REQUIRED)]
    #[test_case(ErrorCategory::AccountNotFound, StatusCode::NOT_FOUND)]
    #[test_case(ErrorCategory::RateLimit, StatusCode::SERVICE_UNAVAILABLE)]
    #[test_case(ErrorCategory::TemporaryUnavailable, StatusCode::SERVICE_UNAVAILABLE)]
    #[test_case(ErrorCategory::NetworkError, StatusCode::BAD_GATEWAY)]
    #[test_case(ErrorCategory::ExchangeRejected, StatusCode::BAD_GATEWAY)]
    fn category_status(category: ErrorCategory, expected: StatusCode) {
        assert_eq!(status_for_category(category), expected);
    }

    #[test]
    fn rescheduled_failure_is_accepted_with_retry_after() {
        let error = crate::error::ErrorClassifier::default().error(
            ErrorCategory::TemporaryUnavailable,
            "circuit open",
            crate::error::ErrorContext::new(),
        );
        let response = webhook_response(
            Uuid::new_v4(),
            ExecutionOutcome::Failed {
                stage: ExecutionStage::Submitted,
                error,
                disposition: FailureDisposition::Rescheduled {
                    delay: std::time::Duration::from_millis(2_500),
                },
            },
        );

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
