//! Signal Bounded Context
//!
//! Webhook signature verification and the validated trading signal.

pub mod payload;
pub mod signature;

pub use payload::{ParseOptions, SignalError, WebhookPayload};
pub use signature::{SignatureError, WebhookSecret};
