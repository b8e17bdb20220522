//! Text translation client
//!
//! Translates localized text through a LibreTranslate-style `/translate`
//! endpoint. Used only for targets configured with a language pair.

use crate::config::TranslationConfig;
use crate::enrich::Translator;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Translation collaborator over an HTTP translation API
pub struct TranslationClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl TranslationClient {
    /// Create a translation client from configuration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("crosspost translation client")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn enrichment_error(&self, message: impl Into<String>, retryable: bool) -> Error {
        Error::Enrichment {
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[async_trait]
impl Translator for TranslationClient {
    async fn translate(&self, text: &str, src: &str, dst: &str) -> Result<String> {
        let mut body = json!({
            "q": text,
            "source": src,
            "target": dst,
            "format": "text",
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = json!(key);
        }

        let response = self
            .http
            .post(format!("{}/translate", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.enrichment_error(format!("translation request failed: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status.as_u16() == 429;
            return Err(self.enrichment_error(format!("translation HTTP {status}"), retryable));
        }

        let parsed: TranslateResponse = response.json().await.map_err(|e| {
            self.enrichment_error(format!("malformed translation response: {e}"), false)
        })?;

        info!(src = src, dst = dst, "Text translated");
        Ok(parsed.translated_text)
    }
}
