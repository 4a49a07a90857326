//! Application Ports (Driver and Driven)
//!
//! Ports define interfaces for interacting with external systems.
//! - **Driver Ports** (Primary/Inbound): How the world uses our application
//! - **Driven Ports** (Secondary/Outbound): How our application uses external systems

mod account_port;
mod alert_port;
mod exchange_port;
mod job_queue_port;
mod order_repository_port;
mod price_cache_port;

pub use account_port::{AccountError, AccountResolver, ResolvedAccount};
pub use alert_port::{Alert, AlertError, AlertPort, AlertSeverity};
pub use exchange_port::{
    AccountBalance, CurrencyBalance, ExchangeClient, ExchangeError, ExchangeOrder,
    ExchangePosition, PlaceOrderRequest, Ticker, Trade,
};
pub use job_queue_port::{DeadLetter, ExecutionJob, JobQueue, QueueError};
pub use order_repository_port::{BalanceSnapshot, OrderRepository, RepositoryError, StoredOrder};
pub use price_cache_port::PriceCache;
