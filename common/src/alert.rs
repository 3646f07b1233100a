// Alert Channel Interface
// Outbound notifications for emitted signals and market warnings

use crate::types::Severity;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Urgency attached to an outbound alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl From<Severity> for AlertLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => AlertLevel::Warning,
            Severity::Critical => AlertLevel::Critical,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Trait for alert delivery backends
///
/// Delivery is fire-and-forget from the caller's point of view. Retries and
/// timeouts belong to the implementation.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    /// Deliver a formatted message
    async fn deliver(&self, message: &str, level: AlertLevel) -> Result<()>;

    /// Channel name used in logs
    fn name(&self) -> &str;
}

/// Deliver through `channel`, logging and swallowing any failure.
///
/// Returns whether the delivery succeeded.
pub async fn deliver_best_effort(channel: &dyn AlertChannel, message: &str, level: AlertLevel) -> bool {
    match channel.deliver(message, level).await {
        Ok(()) => {
            debug!(channel = channel.name(), level = %level, "Alert delivered");
            true
        }
        Err(e) => {
            warn!(channel = channel.name(), level = %level, error = %e, "Alert delivery failed");
            false
        }
    }
}

/// In-memory alert channel (for testing and development)
pub struct MemoryAlertChannel {
    delivered: Mutex<Vec<(String, AlertLevel)>>,
    fail: bool,
}

impl MemoryAlertChannel {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A channel whose every delivery fails
    pub fn failing() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn delivered(&self) -> Vec<(String, AlertLevel)> {
        self.delivered.lock().await.clone()
    }
}

impl Default for MemoryAlertChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AlertChannel for MemoryAlertChannel {
    async fn deliver(&self, message: &str, level: AlertLevel) -> Result<()> {
        if self.fail {
            anyhow::bail!("alert channel unavailable");
        }
        self.delivered.lock().await.push((message.to_string(), level));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        let channel = MemoryAlertChannel::failing();
        assert!(!deliver_best_effort(&channel, "hello", AlertLevel::Info).await);
        assert!(channel.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_channel_records() {
        let channel = MemoryAlertChannel::new();
        assert!(deliver_best_effort(&channel, "shock", Severity::Critical.into()).await);
        let delivered = channel.delivered().await;
        assert_eq!(delivered, vec![("shock".to_string(), AlertLevel::Critical)]);
    }
}
