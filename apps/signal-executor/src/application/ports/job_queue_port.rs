//! Job Queue Port (Driven Port)
//!
//! Deferred webhook executions and the dead-letter store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::shared::AccountId;
use crate::error::{Classify, ErrorCategory, ErrorClassifier, ErrorContext, TradingError};

/// A webhook waiting to be executed.
///
/// Carries the raw body and signature so the worker re-runs the full
/// pipeline, signature check included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionJob {
    /// Job id.
    pub id: Uuid,
    /// Target account.
    pub account_id: AccountId,
    /// Raw webhook body.
    pub body: Vec<u8>,
    /// Signature header value.
    pub signature: Option<String>,
    /// Executions already attempted through the queue.
    pub attempt: u32,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Not visible to workers before this instant.
    pub not_before: DateTime<Utc>,
    /// An earlier attempt sent the order and got no answer; look it up
    /// before placing it again.
    #[serde(default)]
    pub submission_unconfirmed: bool,
}

impl ExecutionJob {
    /// Job runnable immediately.
    #[must_use]
    pub fn new(account_id: AccountId, body: Vec<u8>, signature: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            body,
            signature,
            attempt: 0,
            enqueued_at: now,
            not_before: now,
            submission_unconfirmed: false,
        }
    }

    /// The next attempt of this job, visible after `delay`.
    #[must_use]
    pub fn rescheduled(&self, delay: std::time::Duration, now: DateTime<Utc>) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        Self {
            attempt: self.attempt + 1,
            not_before: now + delay,
            ..self.clone()
        }
    }

    /// Whether a worker may pick the job up at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }
}

/// A job that will not be retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Dead letter id.
    pub id: Uuid,
    /// The failed job, replayable as is.
    pub job: ExecutionJob,
    /// Final classified failure.
    pub error: TradingError,
    /// When the job was dead-lettered.
    pub timestamp: DateTime<Utc>,
    /// Retries spent before giving up.
    pub retry_count: u32,
}

impl DeadLetter {
    /// Dead letter for `job` failing with `error`.
    #[must_use]
    pub fn new(job: ExecutionJob, error: TradingError, retry_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            error,
            timestamp: Utc::now(),
            retry_count,
        }
    }
}

/// Queue error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Queue cannot accept or hand out jobs.
    #[error("queue temporarily unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Queue is at capacity.
    #[error("queue full: {capacity} jobs pending")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
}

impl Classify for QueueError {
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError {
        classifier.error(
            ErrorCategory::TemporaryUnavailable,
            self.to_string(),
            context.clone(),
        )
    }
}

/// Work queue with a dead-letter store.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job.
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError>;

    /// Remove and return the earliest due job, if any.
    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<ExecutionJob>, QueueError>;

    /// Jobs waiting, due or not.
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Store a dead letter.
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), QueueError>;

    /// All dead letters, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;

    /// Remove a dead letter for replay.
    async fn take_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetter>, QueueError>;
}
