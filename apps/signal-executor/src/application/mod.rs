//! Application Layer
//!
//! The application layer orchestrates domain logic through use cases.
//! It defines:
//!
//! - **Ports**: Interfaces for interacting with external systems
//! - **Services**: Exchange adapter, balance snapshots and execution locks
//! - **Use Cases**: The webhook execution pipeline and its queue worker

pub mod ports;
pub mod services;
pub mod use_cases;

pub use ports::*;
pub use services::*;
pub use use_cases::*;
