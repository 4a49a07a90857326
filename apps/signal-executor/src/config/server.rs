//! Server configuration for the webhook HTTP endpoint.

use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server port for webhooks and the operations API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Header carrying the hex HMAC-SHA256 of the request body.
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Largest accepted webhook body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            signature_header: default_signature_header(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// `bind_address:http_port`.
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }
}

pub(crate) const fn default_http_port() -> u16 {
    8080
}

pub(crate) fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_signature_header() -> String {
    "x-signature".to_string()
}

const fn default_max_body_bytes() -> usize {
    64 * 1024
}
