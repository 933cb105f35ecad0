//! Webhook alerts
//!
//! One payload satisfies both DingTalk/WeCom style bots (`msgtype` + `text`)
//! and Feishu style bots (`content.text`), so no provider setting is needed.
//! Delivery is best effort: the caller logs failures and moves on.

use crate::error::NotifyError;
use crate::http::HttpClient;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
pub const MESSAGE_TAG: &str = "[Dr.COM] ";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

pub struct WebhookNotifier {
    url: String,
    client: HttpClient,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> reqwest::Result<Self> {
        Ok(Self {
            url: url.trim().to_string(),
            client: HttpClient::new(WEBHOOK_TIMEOUT)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }
}

pub fn webhook_payload(message: &str) -> serde_json::Value {
    let text = format!("{}{}", MESSAGE_TAG, message);
    json!({
        "msgtype": "text",
        "text": { "content": text },
        "content": { "text": text },
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let resp = self
            .client
            .post_json(&self.url, &webhook_payload(message))
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        tracing::debug!("Webhook delivered ({})", status);
        Ok(())
    }
}
