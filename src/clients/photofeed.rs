//! Photo feed publisher
//!
//! Publishes an item through an Instagram-Graph-style container flow: look up
//! the account id, create one media container per photo (or a single
//! container), combine multi-photo items into a carousel container, then
//! publish. The API imports photos by URL only, so each staged original is
//! first run through the configured [`MediaTransform`] and referenced under
//! the web-visible media base.
//!
//! Consecutive container calls are paced with a fixed delay; the API rejects
//! bursts.

use crate::config::FeedConfig;
use crate::dispatch::Publisher;
use crate::error::{Error, Result};
use crate::staging::{MediaStore, MediaTransform};
use crate::types::MediaAsset;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Publisher posting photos/carousels to a photo feed
pub struct PhotoFeedPublisher {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    web_media_base: String,
    pacing_delay: Duration,
    store: Arc<MediaStore>,
    transform: Arc<dyn MediaTransform>,
}

impl PhotoFeedPublisher {
    /// Create a photo feed publisher from configuration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn new(
        config: &FeedConfig,
        store: Arc<MediaStore>,
        transform: Arc<dyn MediaTransform>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("crosspost feed publisher")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            access_token: config.access_token.clone(),
            web_media_base: config.web_media_base.trim_end_matches('/').to_string(),
            pacing_delay: config.pacing_delay,
            store,
            transform,
        })
    }

    fn publish_error(&self, message: impl Into<String>, retryable: bool) -> Error {
        Error::Publish {
            target: "feed".to_string(),
            message: message.into(),
            retryable,
        }
    }

    /// Look up the account id the containers are created under
    async fn account_id(&self) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/me", self.api_base))
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("fields", "user_id,username,account_type,name"),
            ])
            .send()
            .await
            .map_err(|e| self.publish_error(format!("account lookup failed: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status.as_u16() == 429;
            return Err(self.publish_error(format!("account lookup HTTP {status}"), retryable));
        }

        #[derive(Debug, Deserialize)]
        struct MeResponse {
            user_id: serde_json::Value,
        }
        let me: MeResponse = response
            .json()
            .await
            .map_err(|e| self.publish_error(format!("malformed account response: {e}"), false))?;

        let user_id = match me.user_id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(
                    self.publish_error(format!("unusable account id: {other}"), false)
                );
            }
        };
        debug!(account = %user_id, "Feed account resolved");
        Ok(user_id)
    }

    /// POST one API call and pull the `id` out of its response
    async fn post_for_id(&self, url: String, params: Vec<(String, String)>) -> Result<String> {
        let response = self
            .http
            .post(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| self.publish_error(format!("request failed: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status.as_u16() == 429;
            let body = response.text().await.unwrap_or_default();
            return Err(self.publish_error(format!("HTTP {status}: {body}"), retryable));
        }

        #[derive(Debug, Deserialize)]
        struct IdResponse {
            id: String,
        }
        let parsed: IdResponse = response
            .json()
            .await
            .map_err(|e| self.publish_error(format!("response without container id: {e}"), false))?;
        Ok(parsed.id)
    }

    /// Web-visible URL of a derived rendition
    ///
    /// Staged files live under `<root>/content/<item_key>/<file>`, and the
    /// same two trailing components are exposed under the web media base.
    fn web_url(&self, derived: &Path) -> Result<String> {
        let file = derived
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| self.publish_error("derived rendition without a file name", false))?;
        let item_key = derived
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|k| k.to_str())
            .ok_or_else(|| self.publish_error("staged path outside an item directory", false))?;
        Ok(format!("{}/{item_key}/{file}", self.web_media_base))
    }
}

#[async_trait]
impl Publisher for PhotoFeedPublisher {
    async fn publish(&self, text: &str, media: &[MediaAsset], tags: &[String]) -> Result<String> {
        if media.is_empty() {
            return Err(self.publish_error("item has no media to post", false));
        }

        let account = self.account_id().await?;

        let caption = if tags.is_empty() {
            text.to_string()
        } else {
            let hashtags: Vec<String> = tags.iter().map(|t| format!("#{t}")).collect();
            format!("{text}\n\n{}", hashtags.join(" "))
        };
        debug!(caption = %caption.replace('\n', "\\n"), "Feed caption prepared");

        let mut photo_urls = Vec::with_capacity(media.len());
        for asset in media {
            let derived = self.store.derive(&asset.local_path, self.transform.as_ref()).await?;
            photo_urls.push(self.web_url(&derived)?);
        }
        debug!(urls = ?photo_urls, "Feed photo URLs prepared");

        let media_endpoint = format!("{}/{account}/media", self.api_base);
        let creation_id = if photo_urls.len() > 1 {
            // Carousel: one child container per photo, then the carousel itself
            let mut children = Vec::with_capacity(photo_urls.len());
            for url in &photo_urls {
                let child = self
                    .post_for_id(
                        media_endpoint.clone(),
                        vec![
                            ("image_url".to_string(), url.clone()),
                            ("is_carousel_item".to_string(), "true".to_string()),
                            ("access_token".to_string(), self.access_token.clone()),
                        ],
                    )
                    .await?;
                children.push(child);
                tokio::time::sleep(self.pacing_delay).await;
            }

            let carousel = self
                .post_for_id(
                    media_endpoint.clone(),
                    vec![
                        ("caption".to_string(), caption.clone()),
                        ("media_type".to_string(), "CAROUSEL".to_string()),
                        ("children".to_string(), children.join(",")),
                        ("access_token".to_string(), self.access_token.clone()),
                    ],
                )
                .await?;
            tokio::time::sleep(self.pacing_delay).await;
            carousel
        } else {
            let container = self
                .post_for_id(
                    media_endpoint,
                    vec![
                        ("image_url".to_string(), photo_urls[0].clone()),
                        ("caption".to_string(), caption.clone()),
                        ("access_token".to_string(), self.access_token.clone()),
                    ],
                )
                .await?;
            tokio::time::sleep(self.pacing_delay).await;
            container
        };

        let post_id = self
            .post_for_id(
                format!("{}/{account}/media_publish", self.api_base),
                vec![
                    ("creation_id".to_string(), creation_id),
                    ("access_token".to_string(), self.access_token.clone()),
                ],
            )
            .await?;

        info!(
            media_count = media.len(),
            remote_id = %post_id,
            "Item published to photo feed"
        );
        Ok(post_id)
    }
}
