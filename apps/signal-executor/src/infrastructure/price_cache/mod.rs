//! TTL ticker cache.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::application::ports::{PriceCache, Ticker};
use crate::domain::shared::Symbol;

/// Tickers kept for a fixed time-to-live.
#[derive(Debug)]
pub struct TtlPriceCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, Symbol), (Ticker, Instant)>>,
}

impl TtlPriceCache {
    /// Cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .retain(|_, (_, stored)| stored.elapsed() <= ttl);
    }
}

impl PriceCache for TtlPriceCache {
    fn get(&self, exchange: &str, symbol: &Symbol) -> Option<Ticker> {
        let entries = self.entries.read();
        entries
            .get(&(exchange.to_string(), symbol.clone()))
            .filter(|(_, stored)| stored.elapsed() <= self.ttl)
            .map(|(ticker, _)| ticker.clone())
    }

    fn put(&self, exchange: &str, ticker: Ticker) {
        self.entries.write().insert(
            (exchange.to_string(), ticker.symbol.clone()),
            (ticker, Instant::now()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ticker() -> Ticker {
        Ticker {
            symbol: Symbol::new("BTCUSDT"),
            last: dec!(50000),
            bid: None,
            ask: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TtlPriceCache::new(Duration::from_secs(2));
        cache.put("paper", ticker());
        assert!(cache.get("paper", &Symbol::new("BTCUSDT")).is_some());
        assert!(cache.get("other", &Symbol::new("BTCUSDT")).is_none());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(cache.get("paper", &Symbol::new("BTCUSDT")).is_none());
        cache.purge_expired();
        assert!(cache.entries.read().is_empty());
    }
}
