//! HTTP/REST API adapter.
//!
//! Inbound adapter: webhook ingress plus the operator endpoints for breakers,
//! dead letters and order lookup.

mod controller;
mod response;

pub use controller::{AppState, create_router};
pub use response::*;
