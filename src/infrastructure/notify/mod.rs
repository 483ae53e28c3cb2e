//! Operator notification sinks. `TracingNotifier` is the default; when a
//! webhook URL is configured alerts are also posted as Discord-style JSON.

use crate::domain::ports::{AlertLevel, Notifier};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use std::time::Duration;
use tracing::{error, info, warn};

/// Logs alerts through the tracing pipeline.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, level: AlertLevel, title: &str, body: &str) {
        match level {
            AlertLevel::Info => info!("[ALERT] {}: {}", title, body),
            AlertLevel::Warning => warn!("[ALERT] {}: {}", title, body),
            AlertLevel::Critical => error!("[ALERT] {}: {}", title, body),
        }
    }
}

/// Posts alerts to a webhook (Discord-compatible payload) and mirrors them to
/// the log. Delivery failures are logged and swallowed; alerting must never
/// take the trading path down.
pub struct WebhookNotifier {
    client: ClientWithMiddleware,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: crate::infrastructure::exchange::http::create_client(Duration::from_secs(10)),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, level: AlertLevel, title: &str, body: &str) {
        TracingNotifier.notify(level, title, body).await;

        let payload = serde_json::json!({
            "content": format!("[{}] {}: {}", level.as_str(), title, body),
        });
        if let Err(e) = self.client.post(&self.url).json(&payload).send().await {
            warn!("WebhookNotifier: delivery failed: {}", e);
        }
    }
}
