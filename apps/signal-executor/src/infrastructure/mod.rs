//! Infrastructure Layer
//!
//! This module contains all adapters (implementations) for the ports defined
//! in the application layer. Following hexagonal architecture:
//!
//! - **Driven Adapters (Outbound)**: Implement ports for external systems
//!   - `accounts/`: Account registry built from configuration
//!   - `exchange/`: Exchange clients (paper trading)
//!   - `persistence/`: Order and balance snapshot storage
//!   - `queue/`: Retry queue and dead letters
//!   - `alerting/`: Alert sinks
//!   - `price_cache/`: Short-lived ticker cache
//!
//! - **Driver Adapters (Inbound)**: Expose application to external world
//!   - `http/`: Webhook ingress and operator API

pub mod accounts;
pub mod alerting;
pub mod exchange;
pub mod http;
pub mod persistence;
pub mod price_cache;
pub mod queue;
