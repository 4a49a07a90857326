// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Signal Executor - Rust Core Library
//!
//! Turns signed trading-signal webhooks into exchange orders without losing
//! or duplicating them.
//!
//! # Architecture (Clean Architecture + DDD + Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: Core business logic
//!   - `signal`: HMAC webhook signatures, payload parsing and validation
//!   - `order_execution`: Order intents, normalized orders, bracket legs
//!   - `margin`: Positions and the pre-trade margin check
//!
//! - **Application**: Use cases and orchestration
//!   - `ports`: Exchange, repository, queue, alert, account and price cache interfaces
//!   - `services`: Exchange adapter, balance snapshots, execution locks
//!   - `use_cases`: Webhook execution pipeline and the retry queue worker
//!
//! - **Infrastructure**: Adapters (implementations)
//!   - `http`: Webhook ingress and operator API (axum)
//!   - `exchange`: Paper exchange
//!   - `persistence`, `queue`, `alerting`, `price_cache`, `accounts`
//!
//! ## Cross-cutting
//!
//! - `error`: Error taxonomy and classifier
//! - `resilience`: Per-category retry policies and per-account circuit breakers
//! - `config`: YAML configuration with env interpolation
//! - `observability`, `telemetry`: Prometheus metrics and tracing

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Core business logic with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Cross-cutting Concerns
// =============================================================================

/// Configuration loading and validation.
pub mod config;

/// Error taxonomy and classification.
pub mod error;

/// Prometheus metrics.
pub mod observability;

/// Retry policies and circuit breakers.
pub mod resilience;

/// Tracing initialization.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

// Domain re-exports
pub use domain::order_execution::{Order, OrderRequest, OrderSide, OrderStatus, OrderType};
pub use domain::shared::{AccountId, ClientOrderId, Symbol};
pub use domain::signal::{WebhookPayload, WebhookSecret};

// Application re-exports
pub use application::ports::{
    AccountResolver, AlertPort, ExchangeClient, ExecutionJob, JobQueue, OrderRepository,
};
pub use application::use_cases::{
    ExecutionOutcome, ExecutionStage, PipelineConfig, QueueWorker, WebhookExecutionPipeline,
};

// Infrastructure re-exports
pub use infrastructure::accounts::StaticAccountRegistry;
pub use infrastructure::exchange::PaperExchange;
pub use infrastructure::http::{AppState, create_router};
pub use infrastructure::persistence::InMemoryOrderRepository;
pub use infrastructure::queue::InMemoryJobQueue;

// Cross-cutting re-exports
pub use error::{ErrorCategory, ErrorClassifier, TradingError};
pub use resilience::{CircuitBreakerRegistry, RetryPolicyManager};
