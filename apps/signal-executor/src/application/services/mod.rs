//! Application Services
//!
//! Application services coordinate domain logic and infrastructure adapters.
//! They hold the shared state the use cases run against: exchange adapters,
//! balance snapshots and execution locks.

mod balance_cache;
mod exchange_adapter;
mod execution_locks;

pub use balance_cache::{BalanceSnapshotCache, MarginReservation};
pub use exchange_adapter::{AdapterError, ExchangeAdapter, ExchangeAdapterConfig};
pub use execution_locks::{ExecutionGuard, ExecutionLocks};
