//! HTTP Controller (Driver Adapter)
//!
//! Axum-based webhook ingress and operator API. Webhook bodies are taken as
//! raw bytes so the signature is checked over exactly what was sent.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::application::ports::{
    AccountResolver, AlertPort, ExecutionJob, JobQueue, OrderRepository,
};
use crate::application::use_cases::WebhookExecutionPipeline;
use crate::domain::shared::{AccountId, ClientOrderId};
use crate::resilience::CircuitBreakerState;

use super::response::{
    CircuitBreakersResponse, DeadLetterResponse, DeadLettersResponse, HealthResponse,
    MessageResponse, OrdersResponse, ReplayResponse, webhook_response,
};

/// Application state shared across handlers.
pub struct AppState<C, R, Q, A>
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    /// Execution pipeline.
    pub pipeline: Arc<WebhookExecutionPipeline<C, R, Q, A>>,
    /// Header carrying the webhook signature.
    pub signature_header: String,
    /// Largest accepted webhook body.
    pub max_body_bytes: usize,
    /// Application version.
    pub version: String,
}

impl<C, R, Q, A> Clone for AppState<C, R, Q, A>
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            signature_header: self.signature_header.clone(),
            max_body_bytes: self.max_body_bytes,
            version: self.version.clone(),
        }
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router<C, R, Q, A>(state: AppState<C, R, Q, A>) -> Router
where
    C: AccountResolver + 'static,
    R: OrderRepository + 'static,
    Q: JobQueue + 'static,
    A: AlertPort + 'static,
{
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/webhooks/{account_id}",
            post(receive_webhook).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/v1/circuit-breakers", get(circuit_breakers))
        .route("/api/v1/dead-letters", get(dead_letters))
        .route("/api/v1/dead-letters/{id}/replay", post(replay_dead_letter))
        .route("/api/v1/orders/{client_order_id}", get(get_orders))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check<C, R, Q, A>(State(state): State<AppState<C, R, Q, A>>) -> impl IntoResponse
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    let open_circuits: Vec<String> = state
        .pipeline
        .breakers()
        .all_stats()
        .into_iter()
        .filter(|s| s.state == CircuitBreakerState::Open)
        .map(|s| s.name)
        .collect();
    let queue_depth = state.pipeline.queue().depth().await.unwrap_or_default();

    Json(HealthResponse {
        status: if open_circuits.is_empty() {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        version: state.version.clone(),
        open_circuits,
        queue_depth,
    })
}

/// Webhook endpoint.
async fn receive_webhook<C, R, Q, A>(
    State(state): State<AppState<C, R, Q, A>>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    let signature = headers
        .get(state.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let job = ExecutionJob::new(AccountId::new(account_id), body.to_vec(), signature);
    tracing::debug!(
        job_id = %job.id,
        account_id = %job.account_id,
        bytes = body.len(),
        "Webhook received"
    );

    let outcome = state.pipeline.execute(&job).await;
    webhook_response(job.id, outcome)
}

/// Circuit breaker snapshot endpoint.
async fn circuit_breakers<C, R, Q, A>(
    State(state): State<AppState<C, R, Q, A>>,
) -> impl IntoResponse
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    Json(CircuitBreakersResponse {
        breakers: state.pipeline.breakers().all_stats(),
    })
}

/// Dead letter listing endpoint.
async fn dead_letters<C, R, Q, A>(State(state): State<AppState<C, R, Q, A>>) -> Response
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    match state.pipeline.queue().dead_letters().await {
        Ok(letters) => Json(DeadLettersResponse {
            dead_letters: letters.iter().map(DeadLetterResponse::from).collect(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list dead letters");
            unavailable(e.to_string())
        }
    }
}

/// Dead letter replay endpoint.
async fn replay_dead_letter<C, R, Q, A>(
    State(state): State<AppState<C, R, Q, A>>,
    Path(id): Path<Uuid>,
) -> Response
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    match state.pipeline.requeue_dead_letter(id).await {
        Ok(Some(job)) => (
            StatusCode::ACCEPTED,
            Json(ReplayResponse {
                dead_letter_id: id,
                job_id: job.id,
            }),
        )
            .into_response(),
        Ok(None) => not_found(format!("dead letter {id} not found")),
        Err(e) => {
            tracing::error!(dead_letter_id = %id, error = %e, "Dead letter replay failed");
            unavailable(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderQuery {
    account_id: Option<String>,
}

/// Order lookup endpoint.
async fn get_orders<C, R, Q, A>(
    State(state): State<AppState<C, R, Q, A>>,
    Path(client_order_id): Path<String>,
    Query(query): Query<OrderQuery>,
) -> Response
where
    C: AccountResolver,
    R: OrderRepository,
    Q: JobQueue,
    A: AlertPort,
{
    let client_order_id = ClientOrderId::new(client_order_id);
    let repository = state.pipeline.repository();

    let found = match query.account_id.map(AccountId::new) {
        Some(account_id) => repository
            .find_by_client_order_id(&account_id, &client_order_id)
            .await
            .map(|order| order.into_iter().collect::<Vec<_>>()),
        None => repository.list_orders(None).await.map(|orders| {
            orders
                .into_iter()
                .filter(|o| o.client_order_id() == &client_order_id)
                .collect()
        }),
    };

    match found {
        Ok(orders) if orders.is_empty() => {
            not_found(format!("no order with client order id {client_order_id}"))
        }
        Ok(orders) => Json(OrdersResponse { orders }).into_response(),
        Err(e) => {
            tracing::error!(client_order_id = %client_order_id, error = %e, "Order lookup failed");
            unavailable(e.to_string())
        }
    }
}

fn not_found(error: String) -> Response {
    (StatusCode::NOT_FOUND, Json(MessageResponse { error })).into_response()
}

fn unavailable(error: String) -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, Json(MessageResponse { error })).into_response()
}
