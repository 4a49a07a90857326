//! In-memory order repository.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{BalanceSnapshot, OrderRepository, RepositoryError, StoredOrder};
use crate::domain::shared::{AccountId, ClientOrderId};

type OrderKey = (AccountId, ClientOrderId);

/// In-memory implementation of [`OrderRepository`].
///
/// Suitable for paper trading and tests. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<OrderKey, StoredOrder>>,
    snapshots: RwLock<HashMap<AccountId, BalanceSnapshot>>,
}

impl InMemoryOrderRepository {
    /// Create a new empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    /// Whether no orders are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save_order(&self, order: &StoredOrder) -> Result<(), RepositoryError> {
        let key = (order.account_id.clone(), order.client_order_id().clone());
        let mut orders = self.orders.write();

        if let Some(existing) = orders.get(&key)
            && existing.order.id != order.order.id
        {
            return Err(RepositoryError::Conflict {
                account_id: key.0,
                client_order_id: key.1,
            });
        }
        orders.insert(key, order.clone());
        Ok(())
    }

    async fn find_by_client_order_id(
        &self,
        account_id: &AccountId,
        client_order_id: &ClientOrderId,
    ) -> Result<Option<StoredOrder>, RepositoryError> {
        let key = (account_id.clone(), client_order_id.clone());
        Ok(self.orders.read().get(&key).cloned())
    }

    async fn list_orders(
        &self,
        account_id: Option<&AccountId>,
    ) -> Result<Vec<StoredOrder>, RepositoryError> {
        let mut orders: Vec<StoredOrder> = self
            .orders
            .read()
            .values()
            .filter(|o| account_id.is_none_or(|id| &o.account_id == id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(orders)
    }

    async fn save_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<(), RepositoryError> {
        let mut snapshots = self.snapshots.write();
        let newer = snapshots
            .get(&snapshot.account_id)
            .is_none_or(|s| s.captured_at <= snapshot.captured_at);
        if newer {
            snapshots.insert(snapshot.account_id.clone(), snapshot.clone());
        }
        Ok(())
    }

    async fn latest_balance_snapshot(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<BalanceSnapshot>, RepositoryError> {
        Ok(self.snapshots.read().get(account_id).cloned())
    }
}
