//! Observability module for metrics.
//!
//! Tracing setup lives in `telemetry`; this module provides the Prometheus
//! exporter and the recording helpers used across the pipeline.

pub mod metrics;

pub use metrics::{MetricsConfig, MetricsError, init_metrics};
