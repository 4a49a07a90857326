//! Margin Bounded Context
//!
//! Positions and the pre-trade margin check that refuses orders the
//! account's free margin cannot cover.

pub mod position;
pub mod validator;

pub use position::{Position, PositionSide};
pub use validator::{
    BalanceCheck, BalanceValidationResult, MarginError, MarginImpact, MarginParams, MarginValidator,
    OrderMargin,
};
