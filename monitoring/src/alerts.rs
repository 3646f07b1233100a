// Alert channels for the scanner service

use anyhow::{Context, Result};
use common::{AlertChannel, AlertLevel};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

/// Writes alerts to the log. Used when no webhook is configured.
pub struct LogAlertChannel;

#[async_trait::async_trait]
impl AlertChannel for LogAlertChannel {
    async fn deliver(&self, message: &str, level: AlertLevel) -> Result<()> {
        match level {
            AlertLevel::Info => info!(alert = %message, "Alert"),
            AlertLevel::Warning => warn!(alert = %message, "Alert"),
            AlertLevel::Critical => error!(alert = %message, "Alert"),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Posts `{"text": ..}` to a chat webhook
pub struct WebhookAlertChannel {
    client: Client,
    url: String,
}

impl WebhookAlertChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self { client, url: url.into() })
    }

    /// Request body for one alert
    pub fn payload(message: &str, level: AlertLevel) -> serde_json::Value {
        let prefix = match level {
            AlertLevel::Info => "",
            AlertLevel::Warning => "[WARNING] ",
            AlertLevel::Critical => "[CRITICAL] ",
        };
        json!({ "text": format!("{}{}", prefix, message) })
    }
}

#[async_trait::async_trait]
impl AlertChannel for WebhookAlertChannel {
    async fn deliver(&self, message: &str, level: AlertLevel) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&Self::payload(message, level))
            .send()
            .await
            .context("Webhook request failed")?
            .error_for_status()
            .context("Webhook rejected alert")?;
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::deliver_best_effort;

    #[test]
    fn test_payload_prefixes_severity() {
        let info = WebhookAlertChannel::payload("LONG ETHUSDT 1h", AlertLevel::Info);
        assert_eq!(info["text"], "LONG ETHUSDT 1h");

        let critical = WebhookAlertChannel::payload("BTCUSDT price down by 8.10% on 1h", AlertLevel::Critical);
        assert_eq!(critical["text"], "[CRITICAL] BTCUSDT price down by 8.10% on 1h");
    }

    #[tokio::test]
    async fn test_log_channel_always_delivers() {
        assert!(deliver_best_effort(&LogAlertChannel, "hello", AlertLevel::Warning).await);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_swallowed() {
        let channel = WebhookAlertChannel::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        assert!(!deliver_best_effort(&channel, "hello", AlertLevel::Info).await);
    }
}
