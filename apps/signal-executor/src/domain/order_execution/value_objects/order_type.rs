//! Order type (market, limit and bracket legs).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order type specifying execution behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Execute at best available price.
    #[serde(alias = "MARKET")]
    Market,
    /// Execute at the given price or better.
    #[serde(alias = "LIMIT")]
    Limit,
    /// Stop-loss leg: market order once the stop price trades.
    StopMarket,
    /// Take-profit leg: market order once the target price trades.
    TakeProfitMarket,
}

impl OrderType {
    /// Returns true if this order type requires a limit price.
    #[must_use]
    pub const fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Limit)
    }

    /// Returns true if this order type requires a trigger price.
    #[must_use]
    pub const fn requires_stop_price(&self) -> bool {
        matches!(self, Self::StopMarket | Self::TakeProfitMarket)
    }

    /// Parse a signal order type, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "market" => Some(Self::Market),
            "limit" => Some(Self::Limit),
            _ => None,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::StopMarket => write!(f, "STOP_MARKET"),
            Self::TakeProfitMarket => write!(f, "TAKE_PROFIT_MARKET"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_type_requirements() {
        assert!(OrderType::Limit.requires_limit_price());
        assert!(!OrderType::Market.requires_limit_price());
        assert!(OrderType::StopMarket.requires_stop_price());
    }

    #[test]
    fn order_type_parse_only_accepts_signal_types() {
        assert_eq!(OrderType::parse("Market"), Some(OrderType::Market));
        assert_eq!(OrderType::parse("LIMIT"), Some(OrderType::Limit));
        assert_eq!(OrderType::parse("stop_market"), None);
    }
}
