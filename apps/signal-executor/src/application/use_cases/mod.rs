//! Application Use Cases
//!
//! Use cases orchestrate domain logic to fulfill application requirements.

mod execute_webhook;
mod process_queue;

pub use execute_webhook::{
    ExecutionOutcome, ExecutionStage, FailureDisposition, PipelineConfig,
    WebhookExecutionPipeline,
};
pub use process_queue::{DrainReport, QueueWorker};
