//! Account registry built from configuration.
//!
//! Each configured account is bound to an exchange client at startup. In
//! `PAPER` mode every account trades against its own [`PaperExchange`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{AccountError, AccountResolver, ExchangeClient, ResolvedAccount};
use crate::config::{AccountConfig, EnvironmentConfig};
use crate::domain::shared::AccountId;
use crate::domain::signal::WebhookSecret;
use crate::infrastructure::exchange::PaperExchange;

/// Registry construction error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountRegistryError {
    /// No exchange transport exists for the requested mode.
    #[error("account '{account_id}': no {mode} transport for exchange '{exchange}'")]
    UnsupportedExchange {
        /// Account being built.
        account_id: String,
        /// Configured exchange.
        exchange: String,
        /// Trading mode.
        mode: String,
    },
}

#[derive(Clone)]
struct AccountEntry {
    exchange: String,
    webhook_secret: WebhookSecret,
    active: bool,
    client: Arc<dyn ExchangeClient>,
}

/// In-memory account registry.
#[derive(Default)]
pub struct StaticAccountRegistry {
    accounts: RwLock<HashMap<AccountId, AccountEntry>>,
}

impl std::fmt::Debug for StaticAccountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticAccountRegistry")
            .field("accounts", &self.accounts.read().len())
            .finish()
    }
}

impl StaticAccountRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured account.
    ///
    /// # Errors
    ///
    /// Fails in `LIVE` mode, where no exchange transport is compiled in.
    pub fn from_config(
        accounts: &[AccountConfig],
        environment: &EnvironmentConfig,
    ) -> Result<Self, AccountRegistryError> {
        let registry = Self::new();
        for account in accounts {
            if !environment.is_paper() {
                return Err(AccountRegistryError::UnsupportedExchange {
                    account_id: account.id.clone(),
                    exchange: account.exchange.clone(),
                    mode: environment.mode.clone(),
                });
            }

            let mut paper = PaperExchange::new(account.exchange.clone());
            for (currency, amount) in &account.paper.balances {
                paper = paper.with_balance(currency, *amount);
            }
            for (symbol, price) in &account.paper.prices {
                paper = paper.with_price(symbol, *price);
            }

            registry.register(
                AccountId::new(account.id.clone()),
                account.exchange.clone(),
                account.webhook_secret.clone(),
                account.active,
                Arc::new(paper),
            );
            tracing::info!(
                account_id = %account.id,
                exchange = %account.exchange,
                active = account.active,
                mode = %environment.mode,
                "Account registered"
            );
        }
        Ok(registry)
    }

    /// Add or replace an account.
    pub fn register(
        &self,
        account_id: AccountId,
        exchange: impl Into<String>,
        webhook_secret: WebhookSecret,
        active: bool,
        client: Arc<dyn ExchangeClient>,
    ) {
        self.accounts.write().insert(
            account_id,
            AccountEntry {
                exchange: exchange.into(),
                webhook_secret,
                active,
                client,
            },
        );
    }

    /// Switch an account on or off. Returns `false` for unknown accounts.
    pub fn set_active(&self, account_id: &AccountId, active: bool) -> bool {
        self.accounts
            .write()
            .get_mut(account_id)
            .map(|entry| entry.active = active)
            .is_some()
    }

    /// Registered account ids, sorted.
    #[must_use]
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<_> = self.accounts.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl AccountResolver for StaticAccountRegistry {
    async fn resolve(&self, account_id: &AccountId) -> Result<ResolvedAccount, AccountError> {
        let entry = self
            .accounts
            .read()
            .get(account_id)
            .cloned()
            .ok_or_else(|| AccountError::NotFound {
                account_id: account_id.clone(),
            })?;

        if !entry.active {
            return Err(AccountError::Inactive {
                account_id: account_id.clone(),
            });
        }

        Ok(ResolvedAccount {
            account_id: account_id.clone(),
            exchange: entry.exchange,
            webhook_secret: entry.webhook_secret,
            client: entry.client,
        })
    }
}
