//! Per-signal execution locks.
//!
//! At most one execution per `account:client_order_id` runs at a time. A
//! second arrival while the first holds the lock is refused, not queued.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::shared::{AccountId, ClientOrderId};

/// In-flight execution keys.
#[derive(Debug, Default, Clone)]
pub struct ExecutionLocks {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ExecutionLocks {
    /// Empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock key for a signal.
    #[must_use]
    pub fn key(account_id: &AccountId, client_order_id: &ClientOrderId) -> String {
        format!("{account_id}:{client_order_id}")
    }

    /// Take the lock, or `None` if the signal is already executing.
    #[must_use]
    pub fn try_acquire(
        &self,
        account_id: &AccountId,
        client_order_id: &ClientOrderId,
    ) -> Option<ExecutionGuard> {
        let key = Self::key(account_id, client_order_id);
        if !self.in_flight.lock().insert(key.clone()) {
            return None;
        }
        Some(ExecutionGuard {
            key,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Whether a signal is executing.
    #[must_use]
    pub fn is_held(&self, account_id: &AccountId, client_order_id: &ClientOrderId) -> bool {
        self.in_flight
            .lock()
            .contains(&Self::key(account_id, client_order_id))
    }

    /// Executions in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Whether nothing is executing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

/// Held execution lock; released on drop.
#[derive(Debug)]
pub struct ExecutionGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ExecutionGuard {
    /// The locked key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let locks = ExecutionLocks::new();
        let account = AccountId::new("acct-1");
        let cid = ClientOrderId::new("sig-1");

        let guard = locks.try_acquire(&account, &cid).unwrap();
        assert_eq!(guard.key(), "acct-1:sig-1");
        assert!(locks.try_acquire(&account, &cid).is_none());
        assert!(locks.is_held(&account, &cid));

        drop(guard);
        assert!(locks.is_empty());
        assert!(locks.try_acquire(&account, &cid).is_some());
    }

    #[test]
    fn keys_are_scoped_per_account() {
        let locks = ExecutionLocks::new();
        let cid = ClientOrderId::new("sig-1");
        let _a = locks.try_acquire(&AccountId::new("a"), &cid).unwrap();
        assert!(locks.try_acquire(&AccountId::new("b"), &cid).is_some());
    }
}
