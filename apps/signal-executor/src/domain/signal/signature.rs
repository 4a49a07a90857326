//! HMAC-SHA256 webhook signatures.
//!
//! The signature is the hex-encoded HMAC-SHA256 of the raw request body keyed
//! with the account's webhook secret. An optional `sha256=` prefix is
//! accepted. Comparison is constant-time.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Shared secret used to sign webhooks for one account.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// Wrap a secret.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Whether the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn mac(&self) -> Result<HmacSha256, SignatureError> {
        HmacSha256::new_from_slice(self.0.as_bytes()).map_err(|_| SignatureError::InvalidKey)
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(***)")
    }
}

/// Signature verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No signature header.
    #[error("webhook signature missing")]
    Missing,
    /// Header is not hex.
    #[error("webhook signature is not valid hex")]
    Malformed,
    /// Signature does not match the body.
    #[error("webhook signature mismatch")]
    Mismatch,
    /// Secret cannot key the MAC.
    #[error("webhook signature key unusable")]
    InvalidKey,
}

/// Hex HMAC-SHA256 of `body`.
pub fn sign(secret: &WebhookSecret, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = secret.mac()?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex signature over `body`.
pub fn verify(
    secret: &WebhookSecret,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;

    let mut mac = secret.mac()?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"action":"buy","symbol":"BTCUSDT","quantity":"0.001"}"#;

    fn secret() -> WebhookSecret {
        WebhookSecret::new("s3cr3t")
    }

    #[test]
    fn signed_body_verifies() {
        let signature = sign(&secret(), BODY).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify(&secret(), BODY, Some(&signature)).is_ok());
        assert!(verify(&secret(), BODY, Some(&format!("sha256={signature}"))).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign(&secret(), BODY).unwrap();
        let tampered = br#"{"action":"buy","symbol":"BTCUSDT","quantity":"10"}"#;
        assert_eq!(
            verify(&secret(), tampered, Some(&signature)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signature = sign(&WebhookSecret::new("other"), BODY).unwrap();
        assert_eq!(
            verify(&secret(), BODY, Some(&signature)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn missing_and_malformed() {
        assert_eq!(verify(&secret(), BODY, None), Err(SignatureError::Missing));
        assert_eq!(verify(&secret(), BODY, Some("  ")), Err(SignatureError::Missing));
        assert_eq!(
            verify(&secret(), BODY, Some("not-hex")),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", secret()), "WebhookSecret(***)");
    }
}
