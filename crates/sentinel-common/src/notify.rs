//! Outbound notification sink.
//!
//! One-way `send(text)` abstraction over whatever transport carries alerts.
//! Ships with a webhook implementation and a stdout fallback used when no
//! webhook URL is configured, so a missing credential never crashes the
//! service.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors from the notification transport.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// One-way alert sink. Implementations may fail; callers decide whether a
/// failure blocks acceptance.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Webhook notifier: POSTs `{"text": ...}` as JSON.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({ "text": text });
        self.http
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        debug!("Webhook notification delivered");
        Ok(())
    }
}

/// Stdout notifier, the downgrade path when no webhook is configured.
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        println!("{}", text);
        Ok(())
    }
}
