//! Chat channel publisher
//!
//! Posts an item as a single media group to a Telegram-style bot API: every
//! photo by its remote URL, with the localized caption (markdown parse mode)
//! attached to the first photo.

use crate::config::ChatConfig;
use crate::dispatch::Publisher;
use crate::error::{Error, Result};
use crate::types::MediaAsset;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

/// Publisher posting media groups to a chat channel
pub struct ChatPublisher {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    channel_id: i64,
}

impl ChatPublisher {
    /// Create a chat publisher from configuration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("crosspost chat publisher")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            bot_token: config.bot_token.clone(),
            channel_id: config.channel_id,
        })
    }

    fn publish_error(&self, message: impl Into<String>, retryable: bool) -> Error {
        Error::Publish {
            target: "chat".to_string(),
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<SentMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[async_trait]
impl Publisher for ChatPublisher {
    async fn publish(&self, text: &str, media: &[MediaAsset], _tags: &[String]) -> Result<String> {
        if media.is_empty() {
            return Err(self.publish_error("item has no media to post", false));
        }

        let group: Vec<serde_json::Value> = media
            .iter()
            .enumerate()
            .map(|(index, asset)| {
                let url = asset
                    .source_url
                    .as_ref()
                    .ok_or_else(|| self.publish_error("media asset without remote URL", false))?;
                let mut entry = json!({ "type": "photo", "media": url });
                if index == 0 {
                    entry["caption"] = json!(text);
                    entry["parse_mode"] = json!("Markdown");
                }
                Ok(entry)
            })
            .collect::<Result<_>>()?;

        debug!(
            channel = self.channel_id,
            media_count = group.len(),
            "Sending media group"
        );
        let response = self
            .http
            .post(format!(
                "{}/bot{}/sendMediaGroup",
                self.api_base, self.bot_token
            ))
            .json(&json!({ "chat_id": self.channel_id, "media": group }))
            .send()
            .await
            .map_err(|e| self.publish_error(format!("send failed: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status.as_u16() == 429;
            let body = response.text().await.unwrap_or_default();
            return Err(self.publish_error(format!("HTTP {status}: {body}"), retryable));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| self.publish_error(format!("malformed send response: {e}"), false))?;
        if !sent.ok {
            return Err(self.publish_error(
                sent.description
                    .unwrap_or_else(|| "send rejected without description".to_string()),
                false,
            ));
        }
        let first = sent
            .result
            .first()
            .ok_or_else(|| self.publish_error("send response without messages", false))?;

        info!(
            channel = self.channel_id,
            media_count = media.len(),
            message_id = first.message_id,
            "Media group posted to chat channel"
        );
        Ok(first.message_id.to_string())
    }
}
