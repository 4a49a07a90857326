//! Balance Snapshot Cache
//!
//! Per-account quote balance with a max-age bound, plus margin reservations
//! held by orders between their balance check and their exchange result.
//!
//! Reservations make concurrent orders on one account see each other's
//! margin: the second order only passes if free margin covers both.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::domain::shared::AccountId;

#[derive(Debug, Clone, Copy)]
struct CachedBalance {
    available: Decimal,
    fetched_at: Instant,
}

type Reservations = Arc<Mutex<HashMap<AccountId, HashMap<u64, Decimal>>>>;

/// Cached balances and outstanding margin reservations.
#[derive(Debug)]
pub struct BalanceSnapshotCache {
    max_age: Duration,
    entries: Mutex<HashMap<AccountId, CachedBalance>>,
    reservations: Reservations,
    next_id: AtomicU64,
}

impl BalanceSnapshotCache {
    /// Cache whose entries go stale after `max_age`.
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: Mutex::new(HashMap::new()),
            reservations: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Cached balance if younger than the max age.
    #[must_use]
    pub fn get_fresh(&self, account_id: &AccountId) -> Option<Decimal> {
        let entries = self.entries.lock();
        entries
            .get(account_id)
            .filter(|e| e.fetched_at.elapsed() <= self.max_age)
            .map(|e| e.available)
    }

    /// Record a freshly fetched balance.
    pub fn store(&self, account_id: &AccountId, available: Decimal) {
        self.entries.lock().insert(
            account_id.clone(),
            CachedBalance {
                available,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop the cached balance so the next read refetches.
    pub fn invalidate(&self, account_id: &AccountId) {
        self.entries.lock().remove(account_id);
    }

    /// Balance from cache, or from `fetch` when missing or stale.
    ///
    /// Returns the balance and whether it came from the cache.
    pub async fn get_or_fetch<E, F>(&self, account_id: &AccountId, fetch: F) -> Result<(Decimal, bool), E>
    where
        F: Future<Output = Result<Decimal, E>>,
    {
        if let Some(available) = self.get_fresh(account_id) {
            return Ok((available, true));
        }
        let available = fetch.await?;
        self.store(account_id, available);
        Ok((available, false))
    }

    /// Margin currently reserved by in-flight orders.
    #[must_use]
    pub fn reserved(&self, account_id: &AccountId) -> Decimal {
        self.reservations
            .lock()
            .get(account_id)
            .map_or(Decimal::ZERO, |r| r.values().copied().sum())
    }

    /// Reserve `amount` if `free_margin` still covers it after existing
    /// reservations. Non-positive amounts always succeed and reserve nothing.
    #[must_use]
    pub fn try_reserve(
        &self,
        account_id: &AccountId,
        amount: Decimal,
        free_margin: Decimal,
    ) -> Option<MarginReservation> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let amount = amount.max(Decimal::ZERO);

        let mut reservations = self.reservations.lock();
        let account = reservations.entry(account_id.clone()).or_default();
        let reserved: Decimal = account.values().copied().sum();
        if amount > Decimal::ZERO && reserved + amount > free_margin {
            return None;
        }
        account.insert(id, amount);
        drop(reservations);

        Some(MarginReservation {
            id,
            account_id: account_id.clone(),
            amount,
            reservations: Arc::clone(&self.reservations),
        })
    }
}

/// Margin held for an in-flight order; released on drop.
#[derive(Debug)]
pub struct MarginReservation {
    id: u64,
    account_id: AccountId,
    amount: Decimal,
    reservations: Reservations,
}

impl MarginReservation {
    /// Reserved amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.amount
    }
}

impl Drop for MarginReservation {
    fn drop(&mut self) {
        let mut reservations = self.reservations.lock();
        if let Some(account) = reservations.get_mut(&self.account_id) {
            account.remove(&self.id);
            if account.is_empty() {
                reservations.remove(&self.account_id);
            }
        }
    }
}
