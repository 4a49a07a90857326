//! Process Queue Use Case
//!
//! Drains due jobs from the queue through the execution pipeline. Jobs the
//! pipeline reschedules come back after their visibility delay; jobs it gives
//! up on end in the dead-letter store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::execute_webhook::{ExecutionOutcome, WebhookExecutionPipeline};
use crate::application::ports::{AccountResolver, AlertPort, JobQueue, OrderRepository};
use crate::observability::metrics;

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Jobs taken off the queue.
    pub processed: usize,
    /// Jobs that produced or found an order.
    pub executed: usize,
    /// Jobs that failed (rescheduled, dead-lettered or rejected).
    pub failed: usize,
}

/// Background worker for queued executions.
pub struct QueueWorker<C, R, Q, A>
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    pipeline: Arc<WebhookExecutionPipeline<C, R, Q, A>>,
    poll_interval: Duration,
}

impl<C, R, Q, A> QueueWorker<C, R, Q, A>
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    /// Worker polling every `poll_interval` when idle.
    pub const fn new(
        pipeline: Arc<WebhookExecutionPipeline<C, R, Q, A>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            poll_interval,
        }
    }

    /// Run every job due now. Jobs rescheduled during the pass are not
    /// picked up again until they become due.
    pub async fn drain_due(&self) -> DrainReport {
        let now = Utc::now();
        let queue = self.pipeline.queue();
        let mut report = DrainReport::default();

        loop {
            let job = match queue.dequeue(now).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Dequeue failed");
                    break;
                }
            };

            report.processed += 1;
            match self.pipeline.execute(&job).await {
                ExecutionOutcome::Executed { .. } | ExecutionOutcome::AlreadyExecuted { .. } => {
                    report.executed += 1;
                }
                ExecutionOutcome::InFlight { .. } => {}
                ExecutionOutcome::Failed { .. } => report.failed += 1,
            }
        }

        if let Ok(depth) = queue.depth().await {
            metrics::update_queue_depth(depth);
        }
        report
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Queue worker started"
        );

        loop {
            let report = self.drain_due().await;
            if report.processed > 0 {
                tracing::debug!(
                    processed = report.processed,
                    executed = report.executed,
                    failed = report.failed,
                    "Queue drained"
                );
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Queue worker stopped");
    }
}
