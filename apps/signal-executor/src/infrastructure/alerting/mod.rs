//! Alert sink that writes alerts to the log.
//!
//! Keeps the most recent alerts in memory for the operator API and tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{Alert, AlertError, AlertPort, AlertSeverity};

/// Logs every alert and remembers the last `capacity`.
#[derive(Debug)]
pub struct TracingAlertSink {
    capacity: usize,
    recent: Mutex<VecDeque<Alert>>,
}

impl Default for TracingAlertSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TracingAlertSink {
    /// Sink remembering up to `capacity` alerts.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Remembered alerts, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<Alert> {
        self.recent.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl AlertPort for TracingAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                alert_id = %alert.id,
                category = %alert.category,
                account_id = alert.account_id.as_deref().unwrap_or(""),
                context = ?alert.context,
                "ALERT: {}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                alert_id = %alert.id,
                category = %alert.category,
                account_id = alert.account_id.as_deref().unwrap_or(""),
                context = ?alert.context,
                "ALERT: {}",
                alert.message
            ),
        }

        let mut recent = self.recent.lock();
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(alert.clone());
        Ok(())
    }
}
