//! Notification boundary. `notify(chat_id, text)` is the only contract
//! the core depends on (spec §6); delivery transport is swappable.

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, chat_id: i64, text: String) -> anyhow::Result<()>;
}

/// Posts `{"chat_id": ..., "text": ...}` to a configured webhook. Used for
/// wiring into whatever chat transport the deployment has (Telegram bot
/// API, a Slack incoming webhook, etc.) — the core is agnostic.
pub struct HttpNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl HttpNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, chat_id: i64, text: String) -> anyhow::Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// No-op notifier for tests and offline runs.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, chat_id: i64, text: String) -> anyhow::Result<()> {
        debug!(chat_id, text, "null notifier: discarding");
        Ok(())
    }
}
