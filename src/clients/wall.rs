//! Wall content source client
//!
//! Polls a VK-style `wall.get` endpoint and maps posts with photo
//! attachments into source entries. The post's publish timestamp serves as
//! the monotonic sequence key; posts without photo attachments still come
//! back as entries (with empty media) and are filtered by the acquisition
//! stage.

use crate::acquire::{ContentSource, SourceEntry, SourceMedia};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::types::SequenceKey;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Content source backed by a wall-style HTTP API
pub struct WallSource {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    owner_id: i64,
    page_size: u32,
    api_version: String,
}

impl WallSource {
    /// Create a wall source from configuration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("crosspost wall client")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            access_token: config.access_token.clone(),
            owner_id: config.owner_id,
            page_size: config.page_size,
            api_version: config.api_version.clone(),
        })
    }
}

/// Envelope of every wall API response
#[derive(Debug, Deserialize)]
struct WallEnvelope {
    response: Option<WallPayload>,
    error: Option<WallApiError>,
}

#[derive(Debug, Deserialize)]
struct WallPayload {
    items: Vec<WallPost>,
}

#[derive(Debug, Deserialize)]
struct WallPost {
    id: i64,
    date: u64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<WallAttachment>,
}

#[derive(Debug, Deserialize)]
struct WallAttachment {
    #[serde(rename = "type")]
    kind: String,
    photo: Option<WallPhoto>,
}

#[derive(Debug, Deserialize)]
struct WallPhoto {
    id: i64,
    orig_photo: Option<OrigPhoto>,
}

#[derive(Debug, Deserialize)]
struct OrigPhoto {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WallApiError {
    error_code: i64,
    error_msg: String,
}

impl WallApiError {
    /// Rate limits and server-side hiccups clear up on their own; anything
    /// else (bad token, wrong owner id) needs operator attention
    fn is_transient(&self) -> bool {
        matches!(self.error_code, 1 | 6 | 9 | 10)
    }
}

#[async_trait]
impl ContentSource for WallSource {
    async fn fetch_entries(&self, since: SequenceKey) -> Result<Vec<SourceEntry>> {
        let response = self
            .http
            .get(format!("{}/wall.get", self.api_base))
            .query(&[
                ("owner_id", self.owner_id.to_string()),
                ("count", self.page_size.to_string()),
                ("filter", "owner".to_string()),
                ("v", self.api_version.clone()),
                ("access_token", self.access_token.clone()),
            ])
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("wall request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SourceUnavailable(format!(
                "wall API returned HTTP {status}"
            )));
        }

        let envelope: WallEnvelope = response
            .json()
            .await
            .map_err(|e| Error::SourceContract(format!("malformed wall response: {e}")))?;

        if let Some(api_error) = envelope.error {
            return if api_error.is_transient() {
                Err(Error::SourceUnavailable(format!(
                    "wall API error {}: {}",
                    api_error.error_code, api_error.error_msg
                )))
            } else {
                Err(Error::SourceContract(format!(
                    "wall API error {}: {}",
                    api_error.error_code, api_error.error_msg
                )))
            };
        }

        let payload = envelope
            .response
            .ok_or_else(|| Error::SourceContract("wall response without payload".to_string()))?;

        let mut entries = Vec::new();
        for post in payload.items {
            if post.date <= since {
                continue;
            }

            let media: Vec<SourceMedia> = post
                .attachments
                .iter()
                .filter(|a| a.kind == "photo")
                .filter_map(|a| {
                    let photo = a.photo.as_ref()?;
                    let orig = match &photo.orig_photo {
                        Some(orig) => orig,
                        None => {
                            warn!(
                                post = post.id,
                                photo = photo.id,
                                "Photo attachment without original rendition, skipped"
                            );
                            return None;
                        }
                    };
                    Some(SourceMedia {
                        id: photo.id,
                        url: orig.url.clone(),
                    })
                })
                .collect();

            debug!(
                post = post.id,
                date = post.date,
                media_count = media.len(),
                "Wall post fetched"
            );
            entries.push(SourceEntry {
                key: post.date,
                post_id: post.id,
                text: post.text,
                media,
            });
        }
        Ok(entries)
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("media download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SourceUnavailable(format!(
                "media download returned HTTP {status} for {url}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("media download truncated: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_for(server: &MockServer) -> WallSource {
        WallSource::new(&SourceConfig {
            api_base: server.uri(),
            access_token: "test-token".to_string(),
            owner_id: -123,
            ..SourceConfig::default()
        })
        .unwrap()
    }

    fn wall_body() -> serde_json::Value {
        json!({
            "response": {
                "items": [
                    {
                        "id": 11,
                        "date": 1700000100,
                        "text": "with photo",
                        "attachments": [
                            {
                                "type": "photo",
                                "photo": {
                                    "id": 501,
                                    "orig_photo": { "url": "https://cdn.example/501.jpg" }
                                }
                            },
                            { "type": "audio", "photo": null }
                        ]
                    },
                    {
                        "id": 12,
                        "date": 1700000200,
                        "text": "no attachments"
                    }
                ]
            }
        })
    }

    #[tokio::test]
    async fn maps_posts_and_keeps_only_photo_attachments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wall.get"))
            .and(query_param("filter", "owner"))
            .and(query_param("access_token", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(wall_body()))
            .mount(&server)
            .await;

        let entries = source_for(&server).fetch_entries(0).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, 1700000100);
        assert_eq!(entries[0].post_id, 11);
        assert_eq!(entries[0].media.len(), 1, "non-photo attachments dropped");
        assert_eq!(entries[0].media[0].url, "https://cdn.example/501.jpg");
        assert!(entries[1].media.is_empty());
    }

    #[tokio::test]
    async fn filters_posts_at_or_below_since() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wall.get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(wall_body()))
            .mount(&server)
            .await;

        let entries = source_for(&server)
            .fetch_entries(1700000100)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, 1700000200);
    }

    #[tokio::test]
    async fn http_error_maps_to_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wall.get"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_entries(0).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_body_maps_to_contract_violation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wall.get"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_entries(0).await.unwrap_err();
        assert!(matches!(err, Error::SourceContract(_)));
    }

    #[tokio::test]
    async fn rate_limit_api_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wall.get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": { "error_code": 6, "error_msg": "Too many requests per second" }
            })))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_entries(0).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn auth_api_error_is_a_contract_violation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wall.get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": { "error_code": 5, "error_msg": "User authorization failed" }
            })))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_entries(0).await.unwrap_err();
        assert!(matches!(err, Error::SourceContract(_)));
    }

    #[tokio::test]
    async fn fetch_media_returns_the_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/501.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let bytes = source_for(&server)
            .fetch_media(&format!("{}/501.jpg", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"jpeg");
    }

    #[tokio::test]
    async fn missing_media_maps_to_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = source_for(&server)
            .fetch_media(&format!("{}/gone.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }
}
