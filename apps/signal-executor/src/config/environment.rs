//! Environment configuration for trading mode.

use serde::{Deserialize, Serialize};

/// Environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Trading mode, `PAPER` or `LIVE`.
    #[serde(default = "default_environment_mode")]
    pub mode: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mode: default_environment_mode(),
        }
    }
}

impl EnvironmentConfig {
    /// Recognised modes.
    pub const MODES: [&'static str; 2] = ["PAPER", "LIVE"];

    /// Orders go to the in-process paper exchange.
    #[must_use]
    pub fn is_paper(&self) -> bool {
        self.mode == "PAPER"
    }
}

fn default_environment_mode() -> String {
    "PAPER".to_string()
}
