//! Domain Layer
//!
//! The innermost layer containing business logic with zero infrastructure dependencies.
//! This layer defines:
//!
//! - **Value Objects**: Immutable domain types with equality by value
//! - **Domain Services**: Stateless business logic (margin arithmetic, signatures)
//!
//! # Bounded Contexts
//!
//! - [`signal`]: Webhook signatures and signal payloads
//! - [`order_execution`]: Order intents and normalized exchange orders
//! - [`margin`]: Positions and the pre-trade margin check

pub mod margin;
pub mod order_execution;
pub mod shared;
pub mod signal;
