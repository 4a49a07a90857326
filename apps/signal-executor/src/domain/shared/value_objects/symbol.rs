//! Symbol value object for exchange instruments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::shared::DomainError;

/// A trading symbol in exchange-neutral form.
///
/// Examples: "BTCUSDT", "ETHUSDT". Unified forms such as "BTC/USDT" or
/// "BTC/USDT:USDT" normalize to "BTCUSDT".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol.
    ///
    /// The symbol is normalized to uppercase and stripped of separators and
    /// any settlement suffix.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        let raw = value.as_ref().trim();
        let pair = raw.split_once(':').map_or(raw, |(pair, _settle)| pair);
        Self(
            pair.chars()
                .filter(|c| !matches!(c, '/' | '-' | '_' | ' '))
                .collect::<String>()
                .to_uppercase(),
        )
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quote currency, when the symbol ends with a known one.
    #[must_use]
    pub fn quote_currency(&self) -> Option<&'static str> {
        const QUOTES: [&str; 6] = ["USDT", "USDC", "BUSD", "USD", "BTC", "ETH"];
        QUOTES
            .into_iter()
            .find(|q| self.0.len() > q.len() && self.0.ends_with(q))
    }

    /// Validate the symbol for order submission.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.0.is_empty() {
            return Err(DomainError::InvalidValue {
                field: "symbol".to_string(),
                message: "Symbol cannot be empty".to_string(),
            });
        }

        if self.0.len() > 32 {
            return Err(DomainError::InvalidValue {
                field: "symbol".to_string(),
                message: "Symbol exceeds maximum length".to_string(),
            });
        }

        if !self.0.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidValue {
                field: "symbol".to_string(),
                message: "Symbol contains invalid characters".to_string(),
            });
        }

        Ok(())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_new_normalizes_unified_forms() {
        assert_eq!(Symbol::new("btcusdt").as_str(), "BTCUSDT");
        assert_eq!(Symbol::new("BTC/USDT").as_str(), "BTCUSDT");
        assert_eq!(Symbol::new("btc/usdt:usdt").as_str(), "BTCUSDT");
        assert_eq!(Symbol::new(" eth-usdt ").as_str(), "ETHUSDT");
    }

    #[test]
    fn symbol_quote_currency() {
        assert_eq!(Symbol::new("BTCUSDT").quote_currency(), Some("USDT"));
        assert_eq!(Symbol::new("ETHBTC").quote_currency(), Some("BTC"));
        assert_eq!(Symbol::new("USDT").quote_currency(), None);
    }

    #[test]
    fn symbol_validate() {
        assert!(Symbol::new("BTCUSDT").validate().is_ok());
        assert!(Symbol::new("").validate().is_err());
        assert!(Symbol::new("BTC$USDT").validate().is_err());
        assert!(Symbol::new("A".repeat(40)).validate().is_err());
    }
}
