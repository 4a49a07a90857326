//! Normalized order status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status after normalization of the exchange's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting on the book, nothing filled.
    Open,
    /// Resting with some quantity filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Canceled before completion.
    Canceled,
    /// Refused by the exchange.
    Rejected,
    /// Expired before completion.
    Expired,
}

impl OrderStatus {
    /// Map an exchange status string.
    #[must_use]
    pub fn from_exchange(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" | "new" | "accepted" | "pending" => Some(Self::Open),
            "partially_filled" | "partiallyfilled" | "partial" => Some(Self::PartiallyFilled),
            "closed" | "filled" => Some(Self::Filled),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether the order can still trade.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Open | Self::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}
