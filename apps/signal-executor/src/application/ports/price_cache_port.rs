//! Price Cache Port (Driven Port)
//!
//! Short-lived ticker cache consulted before hitting the exchange.

use super::exchange_port::Ticker;
use crate::domain::shared::Symbol;

/// Ticker cache shared by all adapters of an exchange.
pub trait PriceCache: Send + Sync {
    /// Fresh ticker for `(exchange, symbol)`, if cached.
    fn get(&self, exchange: &str, symbol: &Symbol) -> Option<Ticker>;

    /// Store a ticker.
    fn put(&self, exchange: &str, ticker: Ticker);
}
