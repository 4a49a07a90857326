//! Exchange account configuration.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::signal::WebhookSecret;

/// One exchange account that may receive webhooks.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Account id used in the webhook URL.
    pub id: String,
    /// Exchange name, also the circuit breaker override key.
    pub exchange: String,
    /// Shared HMAC secret for this account's webhooks.
    pub webhook_secret: WebhookSecret,
    /// Inactive accounts reject every webhook.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Paper exchange seed state.
    #[serde(default)]
    pub paper: PaperAccountConfig,
}

/// Initial state of a paper trading account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperAccountConfig {
    /// Free balance per currency.
    #[serde(default)]
    pub balances: HashMap<String, Decimal>,
    /// Last price per symbol.
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
}

const fn default_active() -> bool {
    true
}
