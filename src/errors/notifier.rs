//! Outbound notification sinks
//!
//! Notifiers enforce their own minimum spacing between sends. This is a second
//! layer underneath the classifier's cooldown and hourly budget.

use crate::config::NotifierConfig;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Something that can deliver an operator-facing message
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers `message`, returning whether delivery succeeded
    async fn send(&self, message: &str) -> bool;
}

/// Notifier that only writes to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> bool {
        tracing::error!(target: "adcrawl::notify", "{}", message);
        true
    }
}

/// Posts `{"text": message}` to a webhook endpoint
pub struct WebhookNotifier {
    client: Client,
    url: String,
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, min_interval: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            min_interval,
            last_sent: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) -> bool {
        // Held across the wait so concurrent senders queue up behind each other
        let mut last_sent = self.last_sent.lock().await;

        if let Some(previous) = *last_sent {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        let result = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await;

        *last_sent = Some(Instant::now());

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!("Notification webhook answered HTTP {}", response.status());
                false
            }
            Err(e) => {
                tracing::warn!("Failed to deliver notification: {}", e);
                false
            }
        }
    }
}

/// Builds the notifier described by the configuration
///
/// Falls back to [`LogNotifier`] when no webhook is configured or the HTTP
/// client cannot be built.
pub fn notifier_from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    match &config.webhook_url {
        Some(url) => match WebhookNotifier::new(url, Duration::from_secs(config.min_interval_secs))
        {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                tracing::warn!("Webhook notifier unavailable, logging only: {}", e);
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    }
}
