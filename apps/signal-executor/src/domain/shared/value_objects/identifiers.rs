//! Strongly-typed identifiers.
//!
//! These prevent mixing up account ids, client order ids and exchange ids.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_id!(AccountId, "Identifier of a trading account.");
define_id!(
    ClientOrderId,
    "Caller-chosen order identifier; the idempotency key of a signal."
);
define_id!(ExchangeOrderId, "Exchange's identifier for an order.");

impl ClientOrderId {
    /// Derive the id of a bracket child order.
    #[must_use]
    pub fn child(&self, suffix: &str) -> Self {
        Self(format!("{}-{suffix}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_ids_are_deterministic() {
        let parent = ClientOrderId::new("sig-42");
        assert_eq!(parent.child("sl"), parent.child("sl"));
        assert_eq!(parent.child("tp").as_str(), "sig-42-tp");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = AccountId::new("acct-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acct-1\"");
    }
}
