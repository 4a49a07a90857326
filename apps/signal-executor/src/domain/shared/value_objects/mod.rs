//! Shared Value Objects
//!
//! Immutable domain types compared by value.

mod identifiers;
mod symbol;

pub use identifiers::{AccountId, ClientOrderId, ExchangeOrderId};
pub use symbol::Symbol;
