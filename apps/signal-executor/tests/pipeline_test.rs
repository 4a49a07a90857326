//! Webhook execution pipeline integration tests.
//!
//! Drives signed webhooks through the full pipeline against the paper
//! exchange: signature, parsing, margin check, submission, persistence,
//! dead letters and replay.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use signal_executor::application::ports::{
    ExchangeClient, ExchangeError, ExecutionJob, JobQueue, OrderRepository,
};
use signal_executor::application::services::ExchangeAdapterConfig;
use signal_executor::application::use_cases::{
    ExecutionOutcome, ExecutionStage, FailureDisposition, PipelineConfig, WebhookExecutionPipeline,
};
use signal_executor::domain::shared::{AccountId, ClientOrderId};
use signal_executor::domain::signal::{WebhookSecret, signature};
use signal_executor::error::ErrorCategory;
use signal_executor::infrastructure::accounts::StaticAccountRegistry;
use signal_executor::infrastructure::alerting::TracingAlertSink;
use signal_executor::infrastructure::exchange::PaperExchange;
use signal_executor::infrastructure::persistence::InMemoryOrderRepository;
use signal_executor::infrastructure::queue::InMemoryJobQueue;
use signal_executor::{OrderStatus, QueueWorker};

// =============================================================================
// Harness
// =============================================================================

type Pipeline = WebhookExecutionPipeline<
    StaticAccountRegistry,
    InMemoryOrderRepository,
    InMemoryJobQueue,
    TracingAlertSink,
>;

const ACCOUNT: &str = "main";

struct Harness {
    pipeline: Arc<Pipeline>,
    exchange: Arc<PaperExchange>,
    repository: Arc<InMemoryOrderRepository>,
    queue: Arc<InMemoryJobQueue>,
    alerts: Arc<TracingAlertSink>,
}

fn secret() -> WebhookSecret {
    WebhookSecret::new("integration-secret")
}

fn harness(exchange: PaperExchange) -> Harness {
    harness_with(exchange, PipelineConfig::default())
}

fn harness_with(exchange: PaperExchange, config: PipelineConfig) -> Harness {
    let exchange = Arc::new(exchange);
    let client: Arc<dyn ExchangeClient> = exchange.clone();
    let accounts = StaticAccountRegistry::new();
    accounts.register(AccountId::new(ACCOUNT), "paper", secret(), true, client);

    let repository = Arc::new(InMemoryOrderRepository::new());
    let queue = Arc::new(InMemoryJobQueue::default());
    let alerts = Arc::new(TracingAlertSink::default());
    let pipeline = WebhookExecutionPipeline::new(
        Arc::new(accounts),
        Arc::clone(&repository),
        Arc::clone(&queue),
        Arc::clone(&alerts),
        config,
    );

    Harness {
        pipeline: Arc::new(pipeline),
        exchange,
        repository,
        queue,
        alerts,
    }
}

fn funded(usdt: rust_decimal::Decimal) -> PaperExchange {
    PaperExchange::new("paper")
        .with_balance("USDT", usdt)
        .with_price("BTCUSDT", dec!(50000))
}

fn signed_job(body: &str) -> ExecutionJob {
    let sig = signature::sign(&secret(), body.as_bytes()).unwrap();
    ExecutionJob::new(AccountId::new(ACCOUNT), body.as_bytes().to_vec(), Some(sig))
}

fn buy_btc(client_order_id: &str) -> String {
    format!(
        r#"{{"action":"buy","symbol":"BTCUSDT","quantity":"0.001","client_order_id":"{client_order_id}"}}"#
    )
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn market_buy_fills_and_is_persisted() {
    let h = harness(funded(dec!(1000)));

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("e2e-1"))).await;

    let ExecutionOutcome::Executed { order, stage } = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::Filled);
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled, dec!(0.001));
    assert_eq!(order.client_order_id.as_str(), "e2e-1");

    let stored = h
        .repository
        .find_by_client_order_id(&AccountId::new(ACCOUNT), &ClientOrderId::new("e2e-1"))
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(stored.order.id, order.id);
    assert_eq!(stored.exchange, "paper");

    // 0.001 * 50000 at 1x moves 50 USDT into margin.
    assert_eq!(h.exchange.balance("USDT").used, dec!(50));
    assert_eq!(h.exchange.place_order_calls(), 1);
    assert!(h.alerts.recent().is_empty());
}

#[tokio::test]
async fn brackets_are_placed_after_the_entry() {
    let h = harness(funded(dec!(1000)));
    let body = r#"{"action":"buy","symbol":"BTCUSDT","quantity":"0.001","stop_loss":"48000","take_profit":"55000","client_order_id":"br-1"}"#;

    let outcome = h.pipeline.execute(&signed_job(body)).await;

    let order = outcome.order().expect("executed").clone();
    assert_eq!(order.brackets.len(), 2);
    assert!(order.brackets_complete());
    assert_eq!(h.exchange.orders_for("br-1-sl").len(), 1);
    assert_eq!(h.exchange.orders_for("br-1-tp").len(), 1);
}

#[tokio::test]
async fn failed_bracket_leg_alerts_without_failing_the_entry() {
    let exchange = funded(dec!(1000));
    exchange.fail_trigger_orders(ExchangeError::Rejected {
        reason: "stop price too close".to_string(),
    });
    let h = harness(exchange);
    let body = r#"{"action":"buy","symbol":"BTCUSDT","quantity":"0.001","stop_loss":"48000","client_order_id":"br-2"}"#;

    let outcome = h.pipeline.execute(&signed_job(body)).await;

    let order = outcome.order().expect("entry executed").clone();
    assert_eq!(order.bracket_failures.len(), 1);
    assert!(!order.brackets_complete());
    assert_eq!(h.alerts.recent().len(), 1);
}

// =============================================================================
// Refusals
// =============================================================================

#[tokio::test]
async fn insufficient_margin_halts_before_submission() {
    let h = harness(funded(dec!(10)));

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("poor-1"))).await;

    let ExecutionOutcome::Failed {
        stage,
        error,
        disposition,
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::BalanceChecked);
    assert_eq!(error.category(), ErrorCategory::InsufficientBalance);
    assert_eq!(disposition, FailureDisposition::DeadLettered);
    let required = error
        .context()
        .get("required_margin")
        .and_then(|v| v.parse::<rust_decimal::Decimal>().ok());
    assert_eq!(required, Some(dec!(50)));
    assert!(error.alert_id().is_some());

    assert_eq!(h.exchange.place_order_calls(), 0);
    let alerts = h.alerts.recent();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].category, ErrorCategory::InsufficientBalance);
    assert_eq!(h.queue.dead_letters().await.unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_limit_order_is_a_validation_failure() {
    let h = harness(funded(dec!(1000)));
    let body = r#"{"action":"buy","symbol":"BTCUSDT","quantity":"1000000000000000000000","price":"100000000000","order_type":"limit","client_order_id":"huge-1"}"#;

    let outcome = h.pipeline.execute(&signed_job(body)).await;

    let ExecutionOutcome::Failed { stage, error, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::BalanceChecked);
    assert_eq!(error.category(), ErrorCategory::ValidationError);
    assert!(!error.is_recoverable());
    assert_eq!(h.exchange.place_order_calls(), 0);
}

#[tokio::test]
async fn tampered_body_never_reaches_the_exchange() {
    let h = harness(funded(dec!(1000)));
    let mut job = signed_job(&buy_btc("tamper-1"));
    job.body = buy_btc("tamper-1").replace("0.001", "1.000").into_bytes();

    let outcome = h.pipeline.execute(&job).await;

    let ExecutionOutcome::Failed {
        stage,
        error,
        disposition,
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::SignatureVerified);
    assert_eq!(error.category(), ErrorCategory::AuthenticationError);
    assert_eq!(disposition, FailureDisposition::Rejected);
    assert_eq!(h.exchange.place_order_calls(), 0);
    assert_eq!(h.queue.depth().await.unwrap(), 0);
    assert!(h.queue.dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_payload_is_rejected_at_parse() {
    let h = harness(funded(dec!(1000)));

    let outcome = h
        .pipeline
        .execute(&signed_job(r#"{"action":"buy","symbol":"BTCUSDT"}"#))
        .await;

    let ExecutionOutcome::Failed { stage, error, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::Parsed);
    assert_eq!(error.category(), ErrorCategory::ValidationError);
    assert!(error.message().contains("quantity"));
}

#[tokio::test]
async fn inactive_account_is_rejected() {
    let h = harness(funded(dec!(1000)));
    let client: Arc<dyn ExchangeClient> = h.exchange.clone();
    let registry = StaticAccountRegistry::new();
    registry.register(AccountId::new(ACCOUNT), "paper", secret(), false, client);
    let pipeline = WebhookExecutionPipeline::new(
        Arc::new(registry),
        Arc::clone(&h.repository),
        Arc::clone(&h.queue),
        Arc::clone(&h.alerts),
        PipelineConfig::default(),
    );

    let outcome = pipeline.execute(&signed_job(&buy_btc("off-1"))).await;

    let error = outcome.error().expect("failed");
    assert_eq!(error.category(), ErrorCategory::AccountNotFound);
    assert_eq!(h.exchange.place_order_calls(), 0);
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_duplicates_place_one_order() {
    let h = harness(funded(dec!(1000)).with_latency(Duration::from_millis(50)));
    let first = signed_job(&buy_btc("dup-1"));
    let second = signed_job(&buy_btc("dup-1"));

    let (a, b) = tokio::join!(h.pipeline.execute(&first), h.pipeline.execute(&second));

    let executed = [&a, &b]
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Executed { .. }))
        .count();
    let in_flight = [&a, &b]
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::InFlight { .. }))
        .count();
    assert_eq!((executed, in_flight), (1, 1));
    assert_eq!(h.exchange.orders_for("dup-1").len(), 1);

    // A later redelivery is answered from the repository.
    let replay = h.pipeline.execute(&signed_job(&buy_btc("dup-1"))).await;
    assert!(matches!(replay, ExecutionOutcome::AlreadyExecuted { .. }));
    assert_eq!(h.exchange.orders_for("dup-1").len(), 1);
    assert!(h.pipeline.locks().is_empty());
}

#[tokio::test]
async fn identical_bodies_without_client_id_deduplicate() {
    let h = harness(funded(dec!(1000)));
    let body = r#"{"action":"buy","symbol":"BTCUSDT","quantity":"0.001"}"#;

    let first = h.pipeline.execute(&signed_job(body)).await;
    let second = h.pipeline.execute(&signed_job(body)).await;

    assert!(matches!(first, ExecutionOutcome::Executed { .. }));
    assert!(matches!(second, ExecutionOutcome::AlreadyExecuted { .. }));
    assert_eq!(h.exchange.place_order_calls(), 1);
}

// =============================================================================
// Retry queue and dead letters
// =============================================================================

#[tokio::test]
async fn long_rate_limit_is_rescheduled_then_executed_by_the_worker() {
    let exchange = funded(dec!(1000));
    exchange.fail_next_orders([ExchangeError::RateLimited {
        message: "too many orders".to_string(),
        retry_after_ms: Some(20_000),
    }]);
    let h = harness(exchange);

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("rl-1"))).await;

    let ExecutionOutcome::Failed {
        stage,
        error,
        disposition,
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::Submitted);
    assert_eq!(error.category(), ErrorCategory::RateLimit);
    let FailureDisposition::Rescheduled { delay } = disposition else {
        panic!("expected reschedule, got {disposition:?}");
    };
    assert!(delay >= Duration::from_secs(20));
    assert_eq!(h.queue.depth().await.unwrap(), 1);

    let pending = h.queue.pending();
    assert_eq!(pending[0].attempt, 1);
    assert!(pending[0].not_before > Utc::now());

    // Not due yet: the worker leaves it alone.
    let worker = QueueWorker::new(Arc::clone(&h.pipeline), Duration::from_millis(10));
    assert_eq!(worker.drain_due().await.processed, 0);

    let job = h
        .queue
        .dequeue(Utc::now() + chrono::Duration::minutes(5))
        .await
        .unwrap()
        .expect("job queued");
    let outcome = h.pipeline.execute(&job).await;
    assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));
    assert_eq!(h.exchange.place_order_calls(), 2);
    assert_eq!(h.exchange.orders_for("rl-1").len(), 1);
}

fn network_error() -> ExchangeError {
    ExchangeError::Network {
        message: "connection reset by peer".to_string(),
    }
}

/// Adapter deadline far shorter than a stalled exchange response.
fn impatient(max_inline_retry_delay: Option<Duration>) -> PipelineConfig {
    PipelineConfig {
        max_inline_retry_delay,
        adapter: ExchangeAdapterConfig {
            call_timeout: Duration::from_millis(100),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn network_error_is_retried_inline_once() {
    let exchange = funded(dec!(1000));
    exchange.fail_next_orders([network_error()]);
    let h = harness(exchange);

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("net-1"))).await;

    let ExecutionOutcome::Executed { order, stage } = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::Filled);
    assert_eq!(order.client_order_id.as_str(), "net-1");
    assert_eq!(h.exchange.orders_for("net-1").len(), 1);
    assert_eq!(h.exchange.place_order_calls(), 2);
    assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_inline_retries_dead_letter_with_retry_count() {
    let exchange = funded(dec!(1000));
    // Three retries allowed, so the fourth failure is final.
    exchange.fail_next_orders(std::iter::repeat_with(network_error).take(4));
    let h = harness(exchange);

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("net-2"))).await;

    let ExecutionOutcome::Failed {
        stage,
        error,
        disposition,
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::Submitted);
    assert_eq!(error.category(), ErrorCategory::NetworkError);
    assert_eq!(disposition, FailureDisposition::DeadLettered);
    assert_eq!(h.exchange.place_order_calls(), 4);
    assert!(h.exchange.orders_for("net-2").is_empty());

    let letters = h.queue.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].retry_count, 3);
    assert_eq!(letters[0].error.category(), ErrorCategory::NetworkError);
    assert!(letters[0].job.submission_unconfirmed);
}

#[tokio::test(start_paused = true)]
async fn timed_out_fill_is_recovered_not_resent() {
    let exchange = funded(dec!(1000));
    exchange.stall_next_response(Duration::from_secs(60));
    let h = harness_with(exchange, impatient(Some(Duration::from_secs(5))));

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("slow-1"))).await;

    let ExecutionOutcome::Executed { order, stage } = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!(stage, ExecutionStage::Filled);
    assert_eq!(order.filled, dec!(0.001));
    assert_eq!(h.exchange.place_order_calls(), 1);
    assert_eq!(h.exchange.orders_for("slow-1").len(), 1);

    let stored = h
        .repository
        .find_by_client_order_id(&AccountId::new(ACCOUNT), &ClientOrderId::new("slow-1"))
        .await
        .unwrap()
        .expect("recovered order persisted");
    assert_eq!(stored.order.id, order.id);
    assert!(h.alerts.recent().is_empty());
    assert!(h.queue.dead_letters().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rescheduled_timeout_looks_the_order_up_first() {
    let exchange = funded(dec!(1000));
    exchange.stall_next_response(Duration::from_secs(60));
    let h = harness_with(exchange, impatient(Some(Duration::ZERO)));

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("slow-2"))).await;

    let ExecutionOutcome::Failed {
        error, disposition, ..
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.category(), ErrorCategory::Timeout);
    assert!(matches!(disposition, FailureDisposition::Rescheduled { .. }));
    let pending = h.queue.pending();
    assert!(pending[0].submission_unconfirmed);

    let job = h
        .queue
        .dequeue(Utc::now() + chrono::Duration::minutes(5))
        .await
        .unwrap()
        .expect("job queued");
    let outcome = h.pipeline.execute(&job).await;

    assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));
    assert_eq!(h.exchange.place_order_calls(), 1);
    assert_eq!(h.exchange.orders_for("slow-2").len(), 1);
    assert!(h.queue.dead_letters().await.unwrap().is_empty());
    assert!(h
        .alerts
        .recent()
        .iter()
        .all(|a| a.category != ErrorCategory::ExchangeRejected));
}

#[tokio::test]
async fn exchange_rejection_is_dead_lettered_and_replayable() {
    let exchange = funded(dec!(1000));
    exchange.fail_next_orders([ExchangeError::Rejected {
        reason: "market closed".to_string(),
    }]);
    let h = harness(exchange);

    let outcome = h.pipeline.execute(&signed_job(&buy_btc("dl-1"))).await;

    let ExecutionOutcome::Failed {
        error, disposition, ..
    } = outcome
    else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.category(), ErrorCategory::ExchangeRejected);
    assert_eq!(disposition, FailureDisposition::DeadLettered);
    assert_eq!(h.alerts.recent().len(), 1);

    let letters = h.queue.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].error.category(), ErrorCategory::ExchangeRejected);
    assert_eq!(letters[0].retry_count, 0);

    let job = h
        .pipeline
        .requeue_dead_letter(letters[0].id)
        .await
        .unwrap()
        .expect("dead letter exists");
    assert_eq!(job.attempt, 0);
    assert!(h.queue.dead_letters().await.unwrap().is_empty());

    let worker = QueueWorker::new(Arc::clone(&h.pipeline), Duration::from_millis(10));
    let report = worker.drain_due().await;
    assert_eq!((report.processed, report.executed), (1, 1));
    assert_eq!(h.exchange.orders_for("dl-1").len(), 1);
}

#[tokio::test]
async fn replaying_an_unknown_dead_letter_is_none() {
    let h = harness(funded(dec!(1000)));
    let replayed = h
        .pipeline
        .requeue_dead_letter(uuid::Uuid::new_v4())
        .await
        .unwrap();
    assert!(replayed.is_none());
}
