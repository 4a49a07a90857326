//! Order intent and the normalized order record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value_objects::{OrderSide, OrderStatus, OrderType};
use crate::domain::shared::{ClientOrderId, DomainError, ExchangeOrderId, Symbol};

/// An order the pipeline wants placed, with optional bracket legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Idempotency key, echoed back by the exchange.
    pub client_order_id: ClientOrderId,
    /// Instrument.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: OrderSide,
    /// Market or limit.
    pub order_type: OrderType,
    /// Quantity in base units.
    pub amount: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Leverage applied to the position.
    pub leverage: Decimal,
    /// Stop-loss trigger price.
    pub stop_loss: Option<Decimal>,
    /// Take-profit trigger price.
    pub take_profit: Option<Decimal>,
    /// Only reduce an existing position.
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), DomainError> {
        fn invalid(field: &str, message: &str) -> DomainError {
            DomainError::InvalidValue {
                field: field.to_string(),
                message: message.to_string(),
            }
        }

        self.symbol.validate()?;

        if self.amount <= Decimal::ZERO {
            return Err(invalid("quantity", "must be greater than zero"));
        }
        if self.leverage < Decimal::ONE {
            return Err(invalid("leverage", "must be at least 1"));
        }
        match (self.order_type.requires_limit_price(), self.price) {
            (true, None) => return Err(invalid("price", "required for limit orders")),
            (_, Some(p)) if p <= Decimal::ZERO => {
                return Err(invalid("price", "must be greater than zero"));
            }
            _ => {}
        }
        if self.stop_loss.is_some_and(|p| p <= Decimal::ZERO) {
            return Err(invalid("stop_loss", "must be greater than zero"));
        }
        if self.take_profit.is_some_and(|p| p <= Decimal::ZERO) {
            return Err(invalid("take_profit", "must be greater than zero"));
        }
        if let (Some(sl), Some(tp)) = (self.stop_loss, self.take_profit) {
            let ordered = match self.side {
                OrderSide::Buy => sl < tp,
                OrderSide::Sell => sl > tp,
            };
            if !ordered {
                return Err(DomainError::BusinessRuleViolation {
                    rule: "BRACKET_ORDERING".to_string(),
                    message: format!(
                        "stop_loss {sl} and take_profit {tp} are on the wrong sides for a {} order",
                        self.side
                    ),
                });
            }
        }
        Ok(())
    }

    /// Whether stop-loss or take-profit legs were requested.
    #[must_use]
    pub const fn has_brackets(&self) -> bool {
        self.stop_loss.is_some() || self.take_profit.is_some()
    }
}

/// Bracket leg kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BracketKind {
    /// Protective stop.
    StopLoss,
    /// Profit target.
    TakeProfit,
}

impl BracketKind {
    /// Suffix appended to the parent client order id.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::StopLoss => "sl",
            Self::TakeProfit => "tp",
        }
    }

    /// Exchange order type of the leg.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        match self {
            Self::StopLoss => OrderType::StopMarket,
            Self::TakeProfit => OrderType::TakeProfitMarket,
        }
    }

    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
        }
    }
}

/// A bracket leg the exchange accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketOrder {
    /// Leg kind.
    pub kind: BracketKind,
    /// Exchange id of the leg.
    pub exchange_order_id: ExchangeOrderId,
    /// Client id of the leg.
    pub client_order_id: ClientOrderId,
    /// Trigger price.
    pub trigger_price: Decimal,
}

/// A bracket leg that could not be placed. The primary order stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketFailure {
    /// Leg kind.
    pub kind: BracketKind,
    /// Requested trigger price.
    pub trigger_price: Decimal,
    /// Exchange error message.
    pub error: String,
}

/// Normalized order as reported by an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange order id.
    pub id: ExchangeOrderId,
    /// Client order id echoed by the exchange.
    pub client_order_id: ClientOrderId,
    /// Instrument.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Requested quantity.
    pub amount: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Average fill price.
    pub average_price: Option<Decimal>,
    /// Filled quantity.
    pub filled: Decimal,
    /// Normalized status.
    pub status: OrderStatus,
    /// Reduce-only flag.
    pub reduce_only: bool,
    /// Leverage the order was placed with.
    pub leverage: Decimal,
    /// Exchange timestamp.
    pub created_at: DateTime<Utc>,
    /// Accepted bracket legs.
    #[serde(default)]
    pub brackets: Vec<BracketOrder>,
    /// Bracket legs that failed.
    #[serde(default)]
    pub bracket_failures: Vec<BracketFailure>,
}

impl Order {
    /// Quantity still to be filled.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.filled).max(Decimal::ZERO)
    }

    /// Whether every bracket leg was placed.
    #[must_use]
    pub fn brackets_complete(&self) -> bool {
        self.bracket_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> OrderRequest {
        OrderRequest {
            client_order_id: ClientOrderId::new("sig-1"),
            symbol: Symbol::new("BTCUSDT"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            amount: dec!(0.001),
            price: None,
            leverage: dec!(10),
            stop_loss: None,
            take_profit: None,
            reduce_only: false,
        }
    }

    #[test]
    fn market_request_is_valid() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn limit_without_price_is_rejected() {
        let req = OrderRequest {
            order_type: OrderType::Limit,
            ..request()
        };
        assert!(matches!(
            req.validate(),
            Err(DomainError::InvalidValue { field, .. }) if field == "price"
        ));
    }

    #[test]
    fn brackets_must_straddle_entry() {
        let ok = OrderRequest {
            stop_loss: Some(dec!(49000)),
            take_profit: Some(dec!(52000)),
            ..request()
        };
        assert!(ok.validate().is_ok());
        assert!(ok.has_brackets());

        let crossed = OrderRequest {
            side: OrderSide::Sell,
            ..ok
        };
        assert!(matches!(
            crossed.validate(),
            Err(DomainError::BusinessRuleViolation { .. })
        ));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let req = OrderRequest {
            amount: Decimal::ZERO,
            ..request()
        };
        assert!(req.validate().is_err());
    }
}
