//! Prometheus metrics for the signal executor.
//!
//! Covers webhook outcomes, order submissions, retries, dead letters, margin
//! rejections and circuit breakers.
//!
//! # Example
//!
//! ```ignore
//! use signal_executor::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! record_order_submission("binance", "filled", 0.042);
//! ```

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::ErrorCategory;
use crate::resilience::CircuitBreakerState;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for exchange latency (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // 5ms to 30s: exchange round trips, including retries
            latency_buckets: vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Default configuration listening on `addr`.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

/// Record the terminal outcome of a webhook.
///
/// # Arguments
///
/// * `outcome` - e.g. "filled", "open", "rejected", "dead_lettered", "duplicate"
/// * `stage` - Pipeline stage the webhook ended in
pub fn record_webhook_outcome(outcome: &str, stage: &str) {
    counter!(
        "webhook_outcomes_total",
        "outcome" => outcome.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Record a classified failure.
pub fn record_classified_error(category: ErrorCategory) {
    counter!(
        "classified_errors_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a scheduled retry.
pub fn record_retry_attempt(category: ErrorCategory) {
    counter!(
        "retry_attempts_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a job moved to the dead-letter store.
pub fn record_dead_letter(category: ErrorCategory) {
    counter!(
        "dead_letters_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record an order refused by the margin check.
pub fn record_balance_rejection(exchange: &str) {
    counter!(
        "balance_rejections_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

// ============================================================================
// Order Execution Metrics
// ============================================================================

/// Record an order submission.
///
/// # Arguments
///
/// * `exchange` - Exchange name (e.g., "binance", "paper")
/// * `status` - Submission status (e.g., "filled", "open", "error")
/// * `latency_seconds` - Time from first attempt to acknowledgement
pub fn record_order_submission(exchange: &str, status: &str, latency_seconds: f64) {
    counter!(
        "order_submissions_total",
        "exchange" => exchange.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        "order_latency_seconds",
        "exchange" => exchange.to_string()
    )
    .record(latency_seconds);
}

/// Record a bracket child order that could not be placed.
pub fn record_bracket_failure(exchange: &str, kind: &str) {
    counter!(
        "bracket_failures_total",
        "exchange" => exchange.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Update the queue depth gauge.
pub fn update_queue_depth(depth: usize) {
    gauge!("execution_queue_depth").set(depth as f64);
}

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker state values for the gauge.
pub mod circuit_breaker_state {
    use crate::resilience::CircuitBreakerState;

    /// Circuit is closed (healthy).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing).
    pub const HALF_OPEN: f64 = 2.0;

    /// Gauge value for a state.
    #[must_use]
    pub const fn value(state: CircuitBreakerState) -> f64 {
        match state {
            CircuitBreakerState::Closed => CLOSED,
            CircuitBreakerState::Open => OPEN,
            CircuitBreakerState::HalfOpen => HALF_OPEN,
        }
    }
}

/// Update circuit breaker state gauge.
///
/// # Arguments
///
/// * `resource` - Breaker name (`exchange:account`)
/// * `state` - New state
pub fn record_circuit_breaker_state(resource: &str, state: CircuitBreakerState) {
    gauge!(
        "circuit_breaker_state",
        "resource" => resource.to_string()
    )
    .set(circuit_breaker_state::value(state));
}

/// Record a circuit breaker failure.
pub fn record_circuit_breaker_failure(resource: &str) {
    counter!(
        "circuit_breaker_failures_total",
        "resource" => resource.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker success.
pub fn record_circuit_breaker_success(resource: &str) {
    counter!(
        "circuit_breaker_success_total",
        "resource" => resource.to_string()
    )
    .increment(1);
}

/// Record a call rejected due to open circuit.
pub fn record_circuit_breaker_rejected(resource: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "resource" => resource.to_string()
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================
