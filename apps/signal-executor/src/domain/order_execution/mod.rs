//! Order Execution Bounded Context
//!
//! Order intents produced from signals and the normalized order records
//! returned by exchanges, including bracket legs.

pub mod order;
pub mod value_objects;

pub use order::{BracketFailure, BracketKind, BracketOrder, Order, OrderRequest};
pub use value_objects::{OrderSide, OrderStatus, OrderType};
