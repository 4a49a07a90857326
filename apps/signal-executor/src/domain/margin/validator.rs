//! Margin arithmetic and pre-trade balance validation.
//!
//! ```text
//! required = amount * price / leverage
//! used     = Σ position.size * position.entry_price / position.leverage
//! free     = max(0, available - used)
//! valid    = free >= margin_delta
//! ```
//!
//! Against an existing position on the same symbol:
//!
//! | Order vs position | new margin | margin delta |
//! |-------------------|------------|--------------|
//! | none | required | required |
//! | same direction | existing + required | required |
//! | opposite, amount ≥ size | margin on the net remainder | remainder margin |
//! | opposite, amount < size | margin on what is left | left − existing (≤ 0) |
//!
//! A reversal is validated on the remainder alone. The margin released by the
//! closed leg is not credited, since its realized PnL is unknown until fill.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Position;
use crate::domain::order_execution::OrderSide;
use crate::domain::shared::Symbol;

/// Margin computation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarginError {
    /// An input that must be positive was not.
    #[error("invalid margin input: {field} must be positive (got {value})")]
    NonPositive {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },

    /// A product or sum left the representable range.
    #[error("margin arithmetic overflowed computing {operation}")]
    Overflow {
        /// Quantity being computed.
        operation: &'static str,
    },
}

/// `amount * price / leverage` without panicking on overflow.
pub(super) fn checked_margin(
    amount: Decimal,
    price: Decimal,
    leverage: Decimal,
    operation: &'static str,
) -> Result<Decimal, MarginError> {
    amount
        .checked_mul(price)
        .and_then(|notional| notional.checked_div(leverage))
        .ok_or(MarginError::Overflow { operation })
}

/// Inputs of a required-margin computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginParams {
    /// Quantity in base units.
    pub amount: Decimal,
    /// Reference price.
    pub price: Decimal,
    /// Leverage.
    pub leverage: Decimal,
}

/// An order as seen by the margin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderMargin {
    /// Quantity, price and leverage.
    pub params: MarginParams,
    /// Order side.
    pub side: OrderSide,
}

/// Margin effect of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginImpact {
    /// Margin of the symbol's position after the order.
    pub new_margin: Decimal,
    /// Additional margin the order consumes. Negative when margin is freed.
    pub margin_delta: Decimal,
}

/// Inputs of a balance validation.
#[derive(Debug, Clone, Copy)]
pub struct BalanceCheck<'a> {
    /// Free balance in the quote currency.
    pub available_balance: Decimal,
    /// Order being validated.
    pub order: OrderMargin,
    /// Instrument of the order.
    pub symbol: &'a Symbol,
    /// All open positions of the account.
    pub existing_positions: &'a [Position],
}

/// Outcome of a balance validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceValidationResult {
    /// Whether free margin covers the order.
    pub is_valid: bool,
    /// Balance the check started from.
    pub available_balance: Decimal,
    /// Margin the order needs on its own.
    pub required_margin: Decimal,
    /// Margin posted for open positions.
    pub used_margin: Decimal,
    /// `max(0, available - used)`.
    pub free_margin: Decimal,
    /// Margin the order consumes given the existing position.
    pub margin_delta: Decimal,
    /// Explanation when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Stateless margin calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarginValidator;

impl MarginValidator {
    /// Create a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// `amount * price / leverage`.
    pub fn calculate_required_margin(&self, params: &MarginParams) -> Result<Decimal, MarginError> {
        for (field, value) in [
            ("amount", params.amount),
            ("price", params.price),
            ("leverage", params.leverage),
        ] {
            if value <= Decimal::ZERO {
                return Err(MarginError::NonPositive { field, value });
            }
        }
        checked_margin(params.amount, params.price, params.leverage, "required margin")
    }

    /// Margin posted across all positions.
    pub fn calculate_used_margin(&self, positions: &[Position]) -> Result<Decimal, MarginError> {
        positions.iter().try_fold(Decimal::ZERO, |total, position| {
            total
                .checked_add(position.margin()?)
                .ok_or(MarginError::Overflow {
                    operation: "used margin",
                })
        })
    }

    /// Open position on `symbol`, if any.
    #[must_use]
    pub fn find_existing_position<'a>(
        &self,
        positions: &'a [Position],
        symbol: &Symbol,
    ) -> Option<&'a Position> {
        positions
            .iter()
            .find(|p| &p.symbol == symbol && !p.size.is_zero())
    }

    /// Margin effect of `order` given the symbol's existing position.
    pub fn calculate_margin_impact(
        &self,
        order: &OrderMargin,
        existing: Option<&Position>,
    ) -> Result<MarginImpact, MarginError> {
        let required = self.calculate_required_margin(&order.params)?;

        let Some(position) = existing else {
            return Ok(MarginImpact {
                new_margin: required,
                margin_delta: required,
            });
        };

        let existing_margin = position.margin()?;

        if position.is_increased_by(order.side) {
            let new_margin = existing_margin
                .checked_add(required)
                .ok_or(MarginError::Overflow {
                    operation: "position margin",
                })?;
            return Ok(MarginImpact {
                new_margin,
                margin_delta: required,
            });
        }

        let size = position.size.abs();
        if order.params.amount >= size {
            let remainder = order.params.amount - size;
            let remainder_margin = checked_margin(
                remainder,
                order.params.price,
                order.params.leverage,
                "remainder margin",
            )?;
            Ok(MarginImpact {
                new_margin: remainder_margin,
                margin_delta: remainder_margin,
            })
        } else {
            let left = Position {
                size: size - order.params.amount,
                ..position.clone()
            };
            let new_margin = left.margin()?;
            Ok(MarginImpact {
                new_margin,
                margin_delta: new_margin - existing_margin,
            })
        }
    }

    /// Whether the account's free margin covers the order.
    pub fn validate_balance(
        &self,
        check: &BalanceCheck<'_>,
    ) -> Result<BalanceValidationResult, MarginError> {
        let required_margin = self.calculate_required_margin(&check.order.params)?;
        let used_margin = self.calculate_used_margin(check.existing_positions)?;
        let free_margin = (check.available_balance - used_margin).max(Decimal::ZERO);

        let existing = self.find_existing_position(check.existing_positions, check.symbol);
        let impact = self.calculate_margin_impact(&check.order, existing)?;

        let is_valid = free_margin >= impact.margin_delta;
        let message = (!is_valid).then(|| {
            format!(
                "Insufficient margin for {}: requires {} but only {} free (available {}, used {})",
                check.symbol,
                impact.margin_delta.round_dp(8).normalize(),
                free_margin.round_dp(8).normalize(),
                check.available_balance.normalize(),
                used_margin.round_dp(8).normalize(),
            )
        });

        Ok(BalanceValidationResult {
            is_valid,
            available_balance: check.available_balance,
            required_margin,
            used_margin,
            free_margin,
            margin_delta: impact.margin_delta,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::margin::PositionSide;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT")
    }

    fn order(side: OrderSide, amount: Decimal) -> OrderMargin {
        OrderMargin {
            params: MarginParams {
                amount,
                price: dec!(50000),
                leverage: dec!(10),
            },
            side,
        }
    }

    fn long(size: Decimal) -> Position {
        Position {
            symbol: btc(),
            side: PositionSide::Long,
            size,
            entry_price: dec!(50000),
            leverage: dec!(10),
        }
    }

    #[test]
    fn required_margin_example() {
        let margin = MarginValidator::new()
            .calculate_required_margin(&order(OrderSide::Buy, dec!(0.01)).params)
            .unwrap();
        assert_eq!(margin, dec!(50));
    }

    #[test]
    fn required_margin_rejects_non_positive_inputs() {
        let params = MarginParams {
            amount: dec!(1),
            price: dec!(100),
            leverage: Decimal::ZERO,
        };
        assert_eq!(
            MarginValidator::new().calculate_required_margin(&params),
            Err(MarginError::NonPositive {
                field: "leverage",
                value: Decimal::ZERO
            })
        );
    }

    #[test]
    fn validate_balance_passes_with_100_and_fails_with_40() {
        let validator = MarginValidator::new();
        let symbol = btc();
        let check = |available| BalanceCheck {
            available_balance: available,
            order: order(OrderSide::Buy, dec!(0.01)),
            symbol: &symbol,
            existing_positions: &[],
        };

        let ok = validator.validate_balance(&check(dec!(100))).unwrap();
        assert!(ok.is_valid);
        assert_eq!(ok.required_margin, dec!(50));
        assert!(ok.message.is_none());

        let low = validator.validate_balance(&check(dec!(40))).unwrap();
        assert!(!low.is_valid);
        assert_eq!(low.free_margin, dec!(40));
        assert!(low.message.unwrap().contains("Insufficient margin"));
    }

    #[test]
    fn same_direction_adds_margin() {
        let impact = MarginValidator::new()
            .calculate_margin_impact(&order(OrderSide::Buy, dec!(0.01)), Some(&long(dec!(0.02))))
            .unwrap();
        assert_eq!(impact.new_margin, dec!(150));
        assert_eq!(impact.margin_delta, dec!(50));
    }

    #[test]
    fn partial_close_frees_margin() {
        let impact = MarginValidator::new()
            .calculate_margin_impact(&order(OrderSide::Sell, dec!(0.01)), Some(&long(dec!(0.02))))
            .unwrap();
        assert_eq!(impact.new_margin, dec!(50));
        assert_eq!(impact.margin_delta, dec!(-50));
    }

    #[test]
    fn reversal_charges_only_the_remainder() {
        let impact = MarginValidator::new()
            .calculate_margin_impact(&order(OrderSide::Sell, dec!(0.03)), Some(&long(dec!(0.02))))
            .unwrap();
        assert_eq!(impact.new_margin, dec!(50));
        assert_eq!(impact.margin_delta, dec!(50));
    }

    #[test]
    fn used_margin_reduces_free_margin() {
        let validator = MarginValidator::new();
        let symbol = Symbol::new("ETHUSDT");
        let positions = [long(dec!(0.02))];
        let result = validator
            .validate_balance(&BalanceCheck {
                available_balance: dec!(120),
                order: order(OrderSide::Buy, dec!(0.01)),
                symbol: &symbol,
                existing_positions: &positions,
            })
            .unwrap();

        assert_eq!(result.used_margin, dec!(100));
        assert_eq!(result.free_margin, dec!(20));
        assert!(!result.is_valid);
    }

    #[test]
    fn free_margin_never_negative() {
        let validator = MarginValidator::new();
        let symbol = btc();
        let positions = [long(dec!(1))];
        let result = validator
            .validate_balance(&BalanceCheck {
                available_balance: dec!(10),
                order: order(OrderSide::Sell, dec!(0.5)),
                symbol: &symbol,
                existing_positions: &positions,
            })
            .unwrap();

        assert_eq!(result.free_margin, Decimal::ZERO);
        assert!(result.is_valid, "partial close must pass with no free margin");
    }

    #[test]
    fn oversized_notional_is_an_error_not_a_panic() {
        let params = MarginParams {
            amount: dec!(1000000000000000000000),
            price: dec!(100000000000),
            leverage: Decimal::ONE,
        };
        assert_eq!(
            MarginValidator::new().calculate_required_margin(&params),
            Err(MarginError::Overflow {
                operation: "required margin"
            })
        );
    }

    #[test]
    fn overflowing_position_fails_balance_validation() {
        let symbol = btc();
        let positions = [Position {
            entry_price: Decimal::MAX,
            ..long(dec!(2))
        }];
        let result = MarginValidator::new().validate_balance(&BalanceCheck {
            available_balance: dec!(100),
            order: order(OrderSide::Buy, dec!(0.01)),
            symbol: &symbol,
            existing_positions: &positions,
        });
        assert!(matches!(result, Err(MarginError::Overflow { .. })));
    }

    #[test]
    fn signed_short_position_is_found() {
        let short = Position {
            side: PositionSide::Short,
            ..long(dec!(-0.02))
        };
        let positions = [short];
        let validator = MarginValidator::new();

        let found = validator.find_existing_position(&positions, &btc());
        assert_eq!(found.map(|p| p.size), Some(dec!(-0.02)));

        let impact = validator
            .calculate_margin_impact(&order(OrderSide::Buy, dec!(0.01)), found)
            .unwrap();
        assert_eq!(impact.new_margin, dec!(50));
        assert_eq!(impact.margin_delta, dec!(-50));
    }
}
