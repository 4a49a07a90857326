//! Exchange Port (Driven Port)
//!
//! Transport-level interface to one exchange account. Implementations return
//! exchange-shaped records; `ExchangeAdapter` normalizes them into domain
//! types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order_execution::{OrderSide, OrderType};
use crate::domain::shared::Symbol;
use crate::error::{
    Classify, ErrorCategory, ErrorClassifier, ErrorContext, RETRY_AFTER_MS, TradingError,
};

/// Request to place one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Client order id the exchange must echo back.
    pub client_order_id: String,
    /// Instrument.
    pub symbol: Symbol,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity.
    pub amount: Decimal,
    /// Limit price (for limit orders).
    pub price: Option<Decimal>,
    /// Trigger price (for stop and take-profit legs).
    pub stop_price: Option<Decimal>,
    /// Only reduce an existing position.
    pub reduce_only: bool,
}

/// Order as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Exchange order id.
    pub id: String,
    /// Client order id, when echoed.
    pub client_order_id: Option<String>,
    /// Exchange symbol.
    pub symbol: String,
    /// Exchange side string.
    pub side: String,
    /// Exchange order type string.
    pub order_type: String,
    /// Requested quantity.
    pub amount: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Trigger price.
    pub stop_price: Option<Decimal>,
    /// Average fill price.
    pub average: Option<Decimal>,
    /// Filled quantity.
    pub filled: Decimal,
    /// Exchange status string.
    pub status: String,
    /// Reduce-only flag.
    pub reduce_only: bool,
    /// Exchange timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Position as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePosition {
    /// Exchange symbol.
    pub symbol: String,
    /// "long" / "short", when reported.
    pub side: Option<String>,
    /// Size; negative means short when `side` is absent.
    pub contracts: Decimal,
    /// Average entry price.
    pub entry_price: Option<Decimal>,
    /// Leverage.
    pub leverage: Option<Decimal>,
}

/// Balance of one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurrencyBalance {
    /// Available for new orders.
    pub free: Decimal,
    /// Locked in orders and positions.
    pub used: Decimal,
    /// `free + used`.
    pub total: Decimal,
}

/// Balances keyed by currency code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Per-currency balances.
    pub balances: HashMap<String, CurrencyBalance>,
}

impl AccountBalance {
    /// Balance of `currency`; zero when absent.
    #[must_use]
    pub fn currency(&self, currency: &str) -> CurrencyBalance {
        self.balances
            .get(&currency.to_ascii_uppercase())
            .copied()
            .unwrap_or_default()
    }
}

/// Last traded price and top of book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Instrument.
    pub symbol: Symbol,
    /// Last traded price.
    pub last: Decimal,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
}

/// One of the account's own trades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Trade id.
    pub id: String,
    /// Order the trade belongs to.
    pub order_id: String,
    /// Exchange symbol.
    pub symbol: String,
    /// Exchange side string.
    pub side: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub amount: Decimal,
    /// Fee charged.
    pub fee: Option<Decimal>,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

/// Exchange port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// Transport failure.
    #[error("network error: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Call exceeded its deadline.
    #[error("exchange {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Throttled by the exchange.
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        /// Error details.
        message: String,
        /// Reset hint from the exchange.
        retry_after_ms: Option<u64>,
    },

    /// Exchange down or in maintenance.
    #[error("exchange service unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Credentials refused.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Error details.
        message: String,
    },

    /// Not enough balance or margin on the exchange side.
    #[error("insufficient balance: {message}")]
    InsufficientBalance {
        /// Error details.
        message: String,
    },

    /// Quantity outside exchange limits.
    #[error("order size out of range: {message}")]
    OrderSize {
        /// Error details.
        message: String,
    },

    /// Order refused for business reasons.
    #[error("order rejected: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// Symbol not listed.
    #[error("invalid symbol {symbol}")]
    InvalidSymbol {
        /// The unknown symbol.
        symbol: String,
    },

    /// Anything else; classified by message.
    #[error("{message}")]
    Other {
        /// Error details.
        message: String,
    },
}

impl ExchangeError {
    /// Category for variants that carry one.
    #[must_use]
    pub const fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Network { .. } => Some(ErrorCategory::NetworkError),
            Self::Timeout { .. } => Some(ErrorCategory::Timeout),
            Self::RateLimited { .. } => Some(ErrorCategory::RateLimit),
            Self::Unavailable { .. } => Some(ErrorCategory::TemporaryUnavailable),
            Self::Unauthorized { .. } => Some(ErrorCategory::AuthenticationError),
            Self::InsufficientBalance { .. } => Some(ErrorCategory::InsufficientBalance),
            Self::OrderSize { .. } => Some(ErrorCategory::PositionSizeError),
            Self::Rejected { .. } => Some(ErrorCategory::ExchangeRejected),
            Self::InvalidSymbol { .. } => Some(ErrorCategory::ValidationError),
            Self::Other { .. } => None,
        }
    }

    /// The request may have reached the exchange even though no response came back.
    #[must_use]
    pub const fn outcome_unknown(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

impl Classify for ExchangeError {
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError {
        let mut context = context.clone();
        if let Self::RateLimited {
            retry_after_ms: Some(ms),
            ..
        } = self
        {
            context = context.with(RETRY_AFTER_MS, ms);
        }

        match self.category() {
            Some(category) => classifier.error(category, self.to_string(), context),
            None => classifier.classify(&self.to_string(), Some("ExchangeError"), context),
        }
    }
}

/// Port for one exchange account.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Exchange name, e.g. "binance".
    fn exchange_name(&self) -> &str;

    /// Place an order.
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<ExchangeOrder, ExchangeError>;

    /// Open positions.
    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;

    /// Account balances.
    async fn fetch_balance(&self) -> Result<AccountBalance, ExchangeError>;

    /// Ticker for a symbol.
    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker, ExchangeError>;

    /// Set leverage for a symbol.
    async fn set_leverage(&self, symbol: &Symbol, leverage: Decimal) -> Result<(), ExchangeError>;

    /// Open orders, optionally for one symbol.
    async fn fetch_open_orders(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError>;

    /// Order placed with `client_order_id`, open or not.
    async fn fetch_order_by_client_id(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> Result<Option<ExchangeOrder>, ExchangeError>;

    /// The account's recent trades on a symbol.
    async fn fetch_my_trades(&self, symbol: &Symbol, limit: usize)
    -> Result<Vec<Trade>, ExchangeError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_variants_classify_without_patterns() {
        let classifier = ErrorClassifier::default();
        let error = ExchangeError::Rejected {
            reason: "connection-less order".to_string(),
        };
        assert_eq!(
            error.classify_with(&classifier, &ErrorContext::new()).category(),
            ErrorCategory::ExchangeRejected
        );
    }

    #[test]
    fn other_is_classified_by_message() {
        let classifier = ErrorClassifier::default();
        let error = ExchangeError::Other {
            message: "ECONNREFUSED 10.0.0.1:443".to_string(),
        };
        assert_eq!(
            error.classify_with(&classifier, &ErrorContext::new()).category(),
            ErrorCategory::NetworkError
        );
    }

    #[test]
    fn rate_limit_hint_is_carried() {
        let classifier = ErrorClassifier::default();
        let error = ExchangeError::RateLimited {
            message: "weight exceeded".to_string(),
            retry_after_ms: Some(30_000),
        };
        let classified = error.classify_with(&classifier, &ErrorContext::new());
        assert_eq!(
            classified.context().get(RETRY_AFTER_MS).map(String::as_str),
            Some("30000")
        );
    }

    #[test]
    fn balance_lookup_is_case_insensitive() {
        let mut balance = AccountBalance::default();
        balance.balances.insert(
            "USDT".to_string(),
            CurrencyBalance {
                free: Decimal::TEN,
                used: Decimal::ZERO,
                total: Decimal::TEN,
            },
        );
        assert_eq!(balance.currency("usdt").free, Decimal::TEN);
        assert_eq!(balance.currency("BTC").free, Decimal::ZERO);
    }
}
