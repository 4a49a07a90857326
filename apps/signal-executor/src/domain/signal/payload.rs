//! Trading signal payload parsing and validation.
//!
//! Payloads arrive as JSON from charting or alerting tools. Field names are
//! accepted in snake_case and camelCase; numbers may be JSON numbers or
//! strings. `action`, `symbol` and a positive `quantity` are mandatory.
//!
//! When the sender supplies no `client_order_id`, one is derived from the
//! SHA-256 of the raw body, so redelivery of the same payload deduplicates.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::order_execution::{OrderRequest, OrderSide, OrderType};
use crate::domain::shared::{ClientOrderId, Symbol};

/// Longest accepted client order id.
pub const MAX_CLIENT_ORDER_ID_LEN: usize = 64;

/// Payload validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// Body is not a JSON object of the expected shape.
    #[error("payload validation failed: malformed JSON ({0})")]
    InvalidJson(String),
    /// Required fields are absent.
    #[error("payload validation failed: missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    /// A field has an unusable value.
    #[error("payload validation failed: invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What is wrong.
        reason: String,
    },
    /// Signal timestamp is older than the accepted age.
    #[error("payload validation failed: signal is {age_secs}s old (limit {max_age_secs}s)")]
    Stale {
        /// Age of the signal.
        age_secs: i64,
        /// Accepted age.
        max_age_secs: i64,
    },
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    #[serde(default, alias = "side")]
    action: Option<String>,
    #[serde(default, alias = "ticker")]
    symbol: Option<String>,
    #[serde(default, alias = "qty", alias = "amount")]
    quantity: Option<Decimal>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default, alias = "orderType", alias = "type")]
    order_type: Option<String>,
    #[serde(default)]
    leverage: Option<Decimal>,
    #[serde(default, alias = "stopLoss")]
    stop_loss: Option<Decimal>,
    #[serde(default, alias = "takeProfit")]
    take_profit: Option<Decimal>,
    #[serde(default, alias = "reduceOnly")]
    reduce_only: Option<bool>,
    #[serde(default, alias = "clientOrderId")]
    client_order_id: Option<String>,
}

/// A validated trading signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// When the signal was emitted (receive time if absent).
    pub timestamp: DateTime<Utc>,
    /// Buy or sell.
    pub action: OrderSide,
    /// Instrument.
    pub symbol: Symbol,
    /// Quantity in base units.
    pub quantity: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Market or limit.
    pub order_type: OrderType,
    /// Requested leverage.
    pub leverage: Option<Decimal>,
    /// Stop-loss trigger.
    pub stop_loss: Option<Decimal>,
    /// Take-profit trigger.
    pub take_profit: Option<Decimal>,
    /// Only reduce an existing position.
    pub reduce_only: bool,
    /// Idempotency key.
    pub client_order_id: ClientOrderId,
}

/// Parsing knobs.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Reference time for defaults and staleness.
    pub now: DateTime<Utc>,
    /// Reject signals older than this.
    pub max_age: Option<chrono::Duration>,
}

impl WebhookPayload {
    /// Parse and validate a raw webhook body.
    pub fn parse(body: &[u8], options: ParseOptions) -> Result<Self, SignalError> {
        let raw: RawPayload =
            serde_json::from_slice(body).map_err(|e| SignalError::InvalidJson(e.to_string()))?;

        let mut missing = Vec::new();
        if raw.action.as_deref().is_none_or(|s| s.trim().is_empty()) {
            missing.push("action");
        }
        if raw.symbol.as_deref().is_none_or(|s| s.trim().is_empty()) {
            missing.push("symbol");
        }
        if raw.quantity.is_none() {
            missing.push("quantity");
        }
        let (Some(action), Some(symbol), Some(quantity)) = (raw.action, raw.symbol, raw.quantity)
        else {
            return Err(SignalError::MissingFields(missing));
        };
        if !missing.is_empty() {
            return Err(SignalError::MissingFields(missing));
        }

        let action = OrderSide::parse(&action).ok_or_else(|| SignalError::InvalidField {
            field: "action",
            reason: format!("expected buy or sell, got {action:?}"),
        })?;

        let symbol = Symbol::new(&symbol);
        symbol.validate().map_err(|e| SignalError::InvalidField {
            field: "symbol",
            reason: e.to_string(),
        })?;

        positive("quantity", Some(quantity))?;
        positive("price", raw.price)?;
        positive("stop_loss", raw.stop_loss)?;
        positive("take_profit", raw.take_profit)?;
        if let Some(leverage) = raw.leverage
            && leverage < Decimal::ONE
        {
            return Err(SignalError::InvalidField {
                field: "leverage",
                reason: format!("must be at least 1, got {leverage}"),
            });
        }

        let order_type = match raw.order_type.as_deref() {
            None => OrderType::Market,
            Some(value) => OrderType::parse(value).ok_or_else(|| SignalError::InvalidField {
                field: "order_type",
                reason: format!("expected market or limit, got {value:?}"),
            })?,
        };
        if order_type.requires_limit_price() && raw.price.is_none() {
            return Err(SignalError::InvalidField {
                field: "price",
                reason: "required for limit orders".to_string(),
            });
        }

        let timestamp = match raw.timestamp {
            None | Some(serde_json::Value::Null) => options.now,
            Some(value) => parse_timestamp(&value)?,
        };
        if let Some(max_age) = options.max_age {
            let age = options.now - timestamp;
            if age > max_age {
                return Err(SignalError::Stale {
                    age_secs: age.num_seconds(),
                    max_age_secs: max_age.num_seconds(),
                });
            }
        }

        let client_order_id = match raw.client_order_id.map(|s| s.trim().to_string()) {
            Some(id) if !id.is_empty() => validate_client_order_id(id)?,
            _ => derive_client_order_id(body),
        };

        Ok(Self {
            timestamp,
            action,
            symbol,
            quantity,
            price: raw.price,
            order_type,
            leverage: raw.leverage,
            stop_loss: raw.stop_loss,
            take_profit: raw.take_profit,
            reduce_only: raw.reduce_only.unwrap_or(false),
            client_order_id,
        })
    }

    /// Order intent for this signal.
    #[must_use]
    pub fn to_order_request(&self, default_leverage: Decimal) -> OrderRequest {
        OrderRequest {
            client_order_id: self.client_order_id.clone(),
            symbol: self.symbol.clone(),
            side: self.action,
            order_type: self.order_type,
            amount: self.quantity,
            price: self.price,
            leverage: self.leverage.unwrap_or(default_leverage),
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            reduce_only: self.reduce_only,
        }
    }
}

fn positive(field: &'static str, value: Option<Decimal>) -> Result<(), SignalError> {
    match value {
        Some(v) if v <= Decimal::ZERO => Err(SignalError::InvalidField {
            field,
            reason: format!("must be greater than zero, got {v}"),
        }),
        _ => Ok(()),
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Result<DateTime<Utc>, SignalError> {
    let invalid = || SignalError::InvalidField {
        field: "timestamp",
        reason: format!("unrecognised timestamp {value}"),
    };

    let from_number = |n: i64| {
        // Values past year 2286 in seconds are taken as milliseconds
        if n.abs() >= 10_000_000_000 {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        }
    };

    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(from_number).ok_or_else(invalid),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(from_number))
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn validate_client_order_id(id: String) -> Result<ClientOrderId, SignalError> {
    if id.len() > MAX_CLIENT_ORDER_ID_LEN {
        return Err(SignalError::InvalidField {
            field: "client_order_id",
            reason: format!("longer than {MAX_CLIENT_ORDER_ID_LEN} characters"),
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
    {
        return Err(SignalError::InvalidField {
            field: "client_order_id",
            reason: "only letters, digits and - _ : . are allowed".to_string(),
        });
    }
    Ok(ClientOrderId::new(id))
}

fn derive_client_order_id(body: &[u8]) -> ClientOrderId {
    let digest = hex::encode(Sha256::digest(body));
    ClientOrderId::new(format!("wh-{}", &digest[..32]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn options() -> ParseOptions {
        ParseOptions {
            now: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            max_age: None,
        }
    }

    #[test]
    fn parses_minimal_market_signal() {
        let body = br#"{"action":"buy","symbol":"BTC/USDT","quantity":0.001}"#;
        let payload = WebhookPayload::parse(body, options()).unwrap();

        assert_eq!(payload.action, OrderSide::Buy);
        assert_eq!(payload.symbol.as_str(), "BTCUSDT");
        assert_eq!(payload.quantity, dec!(0.001));
        assert_eq!(payload.order_type, OrderType::Market);
        assert_eq!(payload.timestamp, options().now);
        assert!(payload.client_order_id.as_str().starts_with("wh-"));
    }

    #[test]
    fn derived_client_order_id_is_stable() {
        let body = br#"{"action":"sell","symbol":"ETHUSDT","quantity":"1"}"#;
        let a = WebhookPayload::parse(body, options()).unwrap();
        let b = WebhookPayload::parse(body, options()).unwrap();
        assert_eq!(a.client_order_id, b.client_order_id);
    }

    #[test]
    fn camel_case_fields_are_accepted() {
        let body = br#"{
            "action": "SELL", "symbol": "ETHUSDT", "quantity": "0.5",
            "orderType": "limit", "price": "3100", "stopLoss": 3200, "takeProfit": 2900,
            "reduceOnly": true, "clientOrderId": "tv-123", "leverage": 5,
            "timestamp": 1772366400000
        }"#;
        let payload = WebhookPayload::parse(body, options()).unwrap();

        assert_eq!(payload.order_type, OrderType::Limit);
        assert_eq!(payload.price, Some(dec!(3100)));
        assert_eq!(payload.stop_loss, Some(dec!(3200)));
        assert!(payload.reduce_only);
        assert_eq!(payload.client_order_id.as_str(), "tv-123");
        assert_eq!(payload.timestamp, options().now);

        let request = payload.to_order_request(dec!(1));
        assert_eq!(request.leverage, dec!(5));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn reports_all_missing_fields() {
        let err = WebhookPayload::parse(br#"{"symbol":"BTCUSDT"}"#, options()).unwrap_err();
        assert_eq!(err, SignalError::MissingFields(vec!["action", "quantity"]));
        assert!(err.to_string().contains("action, quantity"));
    }

    #[test]
    fn rejects_bad_values() {
        let zero = br#"{"action":"buy","symbol":"BTCUSDT","quantity":0}"#;
        assert!(matches!(
            WebhookPayload::parse(zero, options()),
            Err(SignalError::InvalidField { field: "quantity", .. })
        ));

        let hold = br#"{"action":"hold","symbol":"BTCUSDT","quantity":1}"#;
        assert!(matches!(
            WebhookPayload::parse(hold, options()),
            Err(SignalError::InvalidField { field: "action", .. })
        ));

        let limit = br#"{"action":"buy","symbol":"BTCUSDT","quantity":1,"order_type":"limit"}"#;
        assert!(matches!(
            WebhookPayload::parse(limit, options()),
            Err(SignalError::InvalidField { field: "price", .. })
        ));

        assert!(matches!(
            WebhookPayload::parse(b"not json", options()),
            Err(SignalError::InvalidJson(_))
        ));
    }

    #[test]
    fn stale_signals_are_rejected() {
        let body = br#"{"action":"buy","symbol":"BTCUSDT","quantity":1,"timestamp":"2026-03-01T11:00:00Z"}"#;
        let opts = ParseOptions {
            max_age: Some(chrono::Duration::minutes(5)),
            ..options()
        };
        assert!(matches!(
            WebhookPayload::parse(body, opts),
            Err(SignalError::Stale { age_secs: 3600, .. })
        ));
    }
}
