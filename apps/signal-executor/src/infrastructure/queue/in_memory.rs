//! In-memory job queue with a dead-letter store.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::application::ports::{DeadLetter, ExecutionJob, JobQueue, QueueError};

/// Bounded in-process queue.
///
/// Jobs become visible once `not_before` has passed; among due jobs the
/// earliest `not_before` is handed out first.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    capacity: usize,
    jobs: Mutex<VecDeque<ExecutionJob>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryJobQueue {
    /// Queue holding at most `capacity` pending jobs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            jobs: Mutex::new(VecDeque::new()),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of pending jobs.
    #[must_use]
    pub fn pending(&self) -> Vec<ExecutionJob> {
        self.jobs.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock();
        if jobs.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        tracing::debug!(job_id = %job.id, not_before = %job.not_before, "Job enqueued");
        jobs.push_back(job);
        Ok(())
    }

    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<ExecutionJob>, QueueError> {
        let mut jobs = self.jobs.lock();
        let next = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.is_due(now))
            .min_by_key(|(_, job)| job.not_before)
            .map(|(index, _)| index);
        Ok(next.and_then(|index| jobs.remove(index)))
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.jobs.lock().len())
    }

    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), QueueError> {
        tracing::warn!(
            dead_letter_id = %letter.id,
            job_id = %letter.job.id,
            category = %letter.error.category(),
            retry_count = letter.retry_count,
            "Job dead-lettered"
        );
        self.dead_letters.lock().push(letter);
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self.dead_letters.lock().clone())
    }

    async fn take_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetter>, QueueError> {
        let mut letters = self.dead_letters.lock();
        Ok(letters
            .iter()
            .position(|l| l.id == id)
            .map(|index| letters.remove(index)))
    }
}
