//! Order side (buy or sell).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
///
/// Serialized lowercase, as signal payloads carry it; uppercase is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy order.
    #[serde(alias = "BUY", alias = "Buy")]
    Buy,
    /// Sell order.
    #[serde(alias = "SELL", alias = "Sell")]
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Parse a side, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Some(Self::Buy),
            "sell" | "short" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}
