//! Account Port (Driven Port)
//!
//! Resolves an account id to its exchange, webhook secret and a ready-to-use
//! exchange client. Credentials are decrypted behind this port.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::exchange_port::ExchangeClient;
use crate::domain::shared::AccountId;
use crate::domain::signal::WebhookSecret;
use crate::error::{Classify, ErrorCategory, ErrorClassifier, ErrorContext, TradingError};

/// Everything the pipeline needs to act for one account.
#[derive(Clone)]
pub struct ResolvedAccount {
    /// Account id.
    pub account_id: AccountId,
    /// Exchange name.
    pub exchange: String,
    /// Secret the webhook body is signed with.
    pub webhook_secret: WebhookSecret,
    /// Client bound to the account's credentials.
    pub client: Arc<dyn ExchangeClient>,
}

impl fmt::Debug for ResolvedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedAccount")
            .field("account_id", &self.account_id)
            .field("exchange", &self.exchange)
            .field("webhook_secret", &self.webhook_secret)
            .finish_non_exhaustive()
    }
}

/// Account resolution error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    /// Unknown account id.
    #[error("account not found: {account_id}")]
    NotFound {
        /// Requested account.
        account_id: AccountId,
    },

    /// Account exists but is switched off.
    #[error("account inactive: {account_id}")]
    Inactive {
        /// Requested account.
        account_id: AccountId,
    },
}

impl Classify for AccountError {
    fn classify_with(&self, classifier: &ErrorClassifier, context: &ErrorContext) -> TradingError {
        classifier.error(ErrorCategory::AccountNotFound, self.to_string(), context.clone())
    }
}

/// Account lookup.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    /// Resolve an active account.
    async fn resolve(&self, account_id: &AccountId) -> Result<ResolvedAccount, AccountError>;
}
