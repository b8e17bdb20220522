//! Image tagging client
//!
//! Uploads an image to an imagga-style `/tags` endpoint (multipart, basic
//! auth) and returns the proposed labels with their confidences. Network and
//! server-side failures are retryable; malformed responses are not.

use crate::config::TaggingConfig;
use crate::enrich::{ScoredLabel, Tagger};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Tagging collaborator over an HTTP labeling API
pub struct ImageTagClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    api_secret: String,
}

impl ImageTagClient {
    /// Create a tagging client from configuration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: &TaggingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("crosspost tagging client")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
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
struct TagEnvelope {
    result: TagResult,
}

#[derive(Debug, Deserialize)]
struct TagResult {
    #[serde(default)]
    tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    confidence: f64,
    tag: TagText,
}

#[derive(Debug, Deserialize)]
struct TagText {
    en: String,
}

#[async_trait]
impl Tagger for ImageTagClient {
    async fn tag(&self, image: &[u8]) -> Result<Vec<ScoredLabel>> {
        let part = reqwest::multipart::Part::bytes(image.to_vec()).file_name("image.jpg");
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .http
            .post(format!("{}/tags", self.api_base))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.enrichment_error(format!("tagging request failed: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status.as_u16() == 429;
            return Err(self.enrichment_error(format!("tagging HTTP {status}"), retryable));
        }

        let envelope: TagEnvelope = response
            .json()
            .await
            .map_err(|e| self.enrichment_error(format!("malformed tagging response: {e}"), false))?;

        let labels: Vec<ScoredLabel> = envelope
            .result
            .tags
            .into_iter()
            .map(|entry| ScoredLabel {
                label: entry.tag.en,
                confidence: entry.confidence,
            })
            .collect();
        debug!(label_count = labels.len(), "Labels received");
        Ok(labels)
    }
}
