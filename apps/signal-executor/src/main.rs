//! Signal Executor Binary
//!
//! Serves the webhook endpoint and runs the retry queue worker.
//!
//! # Usage
//!
//! ```bash
//! SIGNAL_EXECUTOR_CONFIG=config.yaml cargo run --bin signal-executor
//! ```
//!
//! # Environment Variables
//!
//! - `SIGNAL_EXECUTOR_CONFIG`: Config file path (default: config.yaml)
//! - `RUST_LOG`: Log filter (default: `observability.logging.level`)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//!
//! Secrets are referenced from the config file as `${VAR}` and resolved from
//! the environment (and `.env`) at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use signal_executor::config::{Config, load_config};
use signal_executor::error::ErrorClassifier;
use signal_executor::infrastructure::accounts::StaticAccountRegistry;
use signal_executor::infrastructure::alerting::TracingAlertSink;
use signal_executor::infrastructure::http::{AppState, create_router};
use signal_executor::infrastructure::persistence::InMemoryOrderRepository;
use signal_executor::infrastructure::price_cache::TtlPriceCache;
use signal_executor::infrastructure::queue::InMemoryJobQueue;
use signal_executor::observability::init_metrics;
use signal_executor::resilience::RetryPolicyManager;
use signal_executor::telemetry::init_telemetry;
use signal_executor::{QueueWorker, WebhookExecutionPipeline};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Concrete pipeline wired from configuration.
type Pipeline = WebhookExecutionPipeline<
    StaticAccountRegistry,
    InMemoryOrderRepository,
    InMemoryJobQueue,
    TracingAlertSink,
>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = load_config(None).context("failed to load configuration")?;
    let _telemetry = init_telemetry(&config.observability.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Signal Executor");
    log_config(&config);

    if let Some(metrics_config) = config.observability.metrics.to_metrics_config() {
        init_metrics(&metrics_config).context("failed to start metrics exporter")?;
        tracing::info!(addr = %metrics_config.listen_addr, "Prometheus exporter listening");
    }

    let pipeline = Arc::new(create_pipeline(&config)?);
    let shutdown_token = CancellationToken::new();

    let worker = QueueWorker::new(Arc::clone(&pipeline), config.pipeline.worker_poll_interval());
    let worker_handle = tokio::spawn(worker.run(shutdown_token.child_token()));

    let state = AppState {
        pipeline,
        signature_header: config.server.signature_header.clone(),
        max_body_bytes: config.server.max_body_bytes,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let app = create_router(state);

    let http_addr = config.server.listen_address();
    let listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {http_addr}"))?;

    tracing::info!(%http_addr, "HTTP server starting");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  POST /api/v1/webhooks/{{account_id}}");
    tracing::info!("  GET  /api/v1/circuit-breakers");
    tracing::info!("  GET  /api/v1/dead-letters");
    tracing::info!("  POST /api/v1/dead-letters/{{id}}/replay");
    tracing::info!("  GET  /api/v1/orders/{{client_order_id}}");

    tracing::info!("Signal executor ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await
        .context("HTTP server error")?;

    shutdown_token.cancel();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, worker_handle).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Queue worker did not stop in time"
        );
    }

    tracing::info!("Signal executor stopped");
    Ok(())
}

/// Wire adapters, resilience policies and the pipeline from configuration.
fn create_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let accounts = StaticAccountRegistry::from_config(&config.accounts, &config.environment)
        .context("failed to build account registry")?;
    if config.accounts.is_empty() {
        tracing::warn!("No accounts configured; every webhook will be rejected");
    }

    let classifier = Arc::new(ErrorClassifier::default());
    let retry = Arc::new(RetryPolicyManager::with_overrides(
        classifier,
        config.retry.overrides.clone(),
    ));
    let breakers = Arc::new(config.circuit_breaker.build_registry());
    let price_cache = Arc::new(TtlPriceCache::new(config.pipeline.price_cache_ttl()));

    Ok(WebhookExecutionPipeline::new(
        Arc::new(accounts),
        Arc::new(InMemoryOrderRepository::new()),
        Arc::new(InMemoryJobQueue::new(config.pipeline.queue_capacity)),
        Arc::new(TracingAlertSink::default()),
        config.pipeline.to_pipeline_config(),
    )
    .with_resilience(retry, breakers)
    .with_price_cache(price_cache))
}

/// Log the parsed configuration.
fn log_config(config: &Config) {
    tracing::info!(
        environment = %config.environment.mode,
        http_port = config.server.http_port,
        accounts = config.accounts.len(),
        exchange_timeout_ms = config.pipeline.exchange_timeout_ms,
        breaker_failure_threshold = config.circuit_breaker.default.failure_threshold,
        retry_overrides = config.retry.overrides.len(),
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
#[allow(clippy::expect_used)]
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
