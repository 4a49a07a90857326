//! Queue Adapters
//!
//! Job queue and dead-letter store implementations.

pub mod in_memory;

pub use in_memory::InMemoryJobQueue;
