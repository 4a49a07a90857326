//! Open position snapshot.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::validator::{MarginError, checked_margin};
use crate::domain::order_execution::OrderSide;
use crate::domain::shared::Symbol;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    /// Net long.
    Long,
    /// Net short.
    Short,
}

impl PositionSide {
    /// Side of an order that adds to this position.
    #[must_use]
    pub const fn increasing_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Position side an order opens from flat.
    #[must_use]
    pub const fn opened_by(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::Long,
            OrderSide::Sell => Self::Short,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Read-only position as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument.
    pub symbol: Symbol,
    /// Long or short.
    pub side: PositionSide,
    /// Absolute size in base units.
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Leverage of the position.
    pub leverage: Decimal,
}

impl Position {
    /// Margin currently posted for the position.
    ///
    /// A non-positive leverage is treated as unleveraged.
    pub fn margin(&self) -> Result<Decimal, MarginError> {
        let leverage = if self.leverage > Decimal::ZERO {
            self.leverage
        } else {
            Decimal::ONE
        };
        checked_margin(self.size.abs(), self.entry_price, leverage, "position margin")
    }

    /// Whether an order on `side` adds to this position.
    #[must_use]
    pub fn is_increased_by(&self, side: OrderSide) -> bool {
        self.side.increasing_side() == side
    }
}
