//! Order Repository Port (Driven Port)
//!
//! Persistence of executed orders and account balance snapshots. Lookup by
//! client order id backs the idempotency check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order_execution::Order;
use crate::domain::shared::{AccountId, ClientOrderId};
use crate::error::{Classify, ErrorCategory, ErrorClassifier, ErrorContext, TradingError};

/// An executed order together with the account it was placed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOrder {
    /// Owning account.
    pub account_id: AccountId,
    /// Exchange the order was placed on.
    pub exchange: String,
    /// The normalized order.
    pub order: Order,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl StoredOrder {
    /// Client order id of the stored order.
    #[must_use]
    pub const fn client_order_id(&self) -> &ClientOrderId {
        &self.order.client_order_id
    }
}

/// Quote-currency balance of an account at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Account.
    pub account_id: AccountId,
    /// Currency code, e.g. "USDT".
    pub currency: String,
    /// Available for new orders.
    pub free: Decimal,
    /// Locked in orders and positions.
    pub used: Decimal,
    /// `free + used`.
    pub total: Decimal,
    /// When the balance was fetched.
    pub captured_at: DateTime<Utc>,
}

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// Storage failed.
    #[error("database error: {message}")]
    Storage {
        /// Error details.
        message: String,
    },

    /// A different order is already recorded under the same key.
    #[error("database conflict: order {client_order_id} already recorded for account {account_id}")]
    Conflict {
        /// Account.
        account_id: AccountId,
        /// Conflicting client order id.
        client_order_id: ClientOrderId,
    },
}

impl Classify for RepositoryError {
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError {
        classifier.error(ErrorCategory::DatabaseError, self.to_string(), context.clone())
    }
}

/// Order and balance persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist an order. Saving the same order twice is a no-op.
    async fn save_order(&self, order: &StoredOrder) -> Result<(), RepositoryError>;

    /// Order recorded for `client_order_id` on `account_id`.
    async fn find_by_client_order_id(
        &self,
        account_id: &AccountId,
        client_order_id: &ClientOrderId,
    ) -> Result<Option<StoredOrder>, RepositoryError>;

    /// Orders, newest first, optionally for one account.
    async fn list_orders(
        &self,
        account_id: Option<&AccountId>,
    ) -> Result<Vec<StoredOrder>, RepositoryError>;

    /// Persist a balance snapshot.
    async fn save_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<(), RepositoryError>;

    /// Most recent snapshot for an account.
    async fn latest_balance_snapshot(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<BalanceSnapshot>, RepositoryError>;
}
