//! Configuration types for crosspost

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Main configuration for the syndication cycle
///
/// Fields are organized into logical sub-configs:
/// - [`source`](SourceConfig) — upstream wall API selection and credentials
/// - [`staging`](StagingConfig) — on-disk staging area and watermark location
/// - [`chat`](ChatConfig) / [`feed`](FeedConfig) — per-target delivery settings
/// - [`tagging`](TaggingConfig) / [`translation`](TranslationConfig) — enrichment collaborators
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Upstream content source
    #[serde(default)]
    pub source: SourceConfig,

    /// Staging directory and watermark persistence
    #[serde(default)]
    pub staging: StagingConfig,

    /// Chat channel target (media group + markdown caption)
    #[serde(default)]
    pub chat: ChatConfig,

    /// Photo feed target (container/carousel publishing)
    #[serde(default)]
    pub feed: FeedConfig,

    /// Image tagging collaborator
    #[serde(default)]
    pub tagging: TaggingConfig,

    /// Text translation collaborator
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Enrichment (tagging) retry policy, applied once per item
    #[serde(default = "default_enrichment_retry")]
    pub enrichment_retry: RetryPolicy,

    /// Delay between poll cycles when idle (default: 300 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Log verbosity surfaced to the embedding application (default: "info")
    ///
    /// The library itself only emits `tracing` events; installing a subscriber
    /// honoring this level is the embedder's responsibility.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            staging: StagingConfig::default(),
            chat: ChatConfig::default(),
            feed: FeedConfig::default(),
            tagging: TaggingConfig::default(),
            translation: TranslationConfig::default(),
            enrichment_retry: default_enrichment_retry(),
            poll_interval: default_poll_interval(),
            log_level: default_log_level(),
        }
    }
}

/// Kind of upstream source to poll
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A VK-style community wall API (default)
    #[default]
    Wall,
}

/// Upstream source configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Which source implementation to use
    #[serde(default)]
    pub kind: SourceKind,

    /// API base URL (default: "https://api.vk.com/method")
    #[serde(default = "default_source_api_base")]
    pub api_base: String,

    /// Access token for the source API
    #[serde(default)]
    pub access_token: String,

    /// Owner (community) identifier whose wall is polled
    #[serde(default)]
    pub owner_id: i64,

    /// Maximum entries fetched per poll (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Source API version string (default: "5.199")
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Base URL for mention fallback profile links (default: "https://vk.com")
    #[serde(default = "default_profile_base")]
    pub profile_base: String,

    /// HTTP timeout for source calls (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Wall,
            api_base: default_source_api_base(),
            access_token: String::new(),
            owner_id: 0,
            page_size: default_page_size(),
            api_version: default_api_version(),
            profile_base: default_profile_base(),
            timeout: default_http_timeout(),
        }
    }
}

/// Staging area configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Root directory for per-item staging and the watermark file (default: "./staging")
    #[serde(default = "default_staging_root")]
    pub root: PathBuf,
}

impl StagingConfig {
    /// Path of the durable watermark file
    pub fn watermark_path(&self) -> PathBuf {
        self.root.join(".last")
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: default_staging_root(),
        }
    }
}

/// Retry/backoff policy for one target's delivery loop
///
/// Two shapes are supported: a bounded policy that fails the target after
/// `max_attempts`, and an unbounded poll-style policy (`max_attempts: None`)
/// that keeps retrying with a fixed delay. Unbounded policies should carry a
/// `max_elapsed` wall-clock cap as a safety valve against persistent outages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts; `None` retries indefinitely (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Fixed delay between attempts (default: 5 seconds)
    #[serde(default = "default_backoff_delay", with = "duration_serde")]
    pub backoff_delay: Duration,

    /// Surface an error to the cycle controller when a bounded policy is
    /// exhausted, aborting the item instead of committing it with a failed
    /// target (default: false)
    #[serde(default)]
    pub fatal_on_exhaustion: bool,

    /// Wall-clock cap on the whole attempt loop; when exceeded the target
    /// goes terminal-failed as if exhausted (default: none)
    #[serde(default, with = "opt_duration_serde")]
    pub max_elapsed: Option<Duration>,

    /// Add random jitter to the backoff delay (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Bounded policy: at most `max_attempts` attempts, fixed `backoff_delay`
    pub fn bounded(max_attempts: u32, backoff_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff_delay,
            fatal_on_exhaustion: false,
            max_elapsed: None,
            jitter: false,
        }
    }

    /// Unbounded poll-style policy: retries forever with a fixed delay
    pub fn unbounded(backoff_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff_delay,
            fatal_on_exhaustion: false,
            max_elapsed: None,
            jitter: false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_delay: default_backoff_delay(),
            fatal_on_exhaustion: false,
            max_elapsed: None,
            jitter: false,
        }
    }
}

/// How to render a mention whose id has no configured replacement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionFallback {
    /// Markdown link to the mentioned entity's source profile (default)
    #[default]
    Link,
    /// Bare display name, for targets without link markup
    Plain,
}

/// Literal find/replace applied to the text before mention rewriting
///
/// The photo feed target uses this to shorten a source-language caption
/// prefix before translation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptionRewrite {
    /// Substring to look for
    pub find: String,
    /// Replacement
    pub replace: String,
}

/// Source/destination language pair for machine translation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LanguagePair {
    /// Source language code (e.g. "ru")
    pub src: String,
    /// Destination language code (e.g. "en")
    pub dst: String,
}

/// Delivery settings shared by all targets
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Whether this target participates in the cycle (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retry/backoff policy for this target's delivery loop
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Mandatory tags always included first in the merged tag set
    ///
    /// Immutable configuration: tag derivation copies this list per item and
    /// never mutates it.
    #[serde(default)]
    pub default_tags: Vec<String>,

    /// Cap on the merged tag set, mandatory tags included (default: 30)
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,

    /// Whether this target consumes the derived tag set (default: false)
    #[serde(default)]
    pub attach_tags: bool,

    /// Literal mention replacements keyed by mentioned entity id
    #[serde(default)]
    pub replacements: HashMap<String, String>,

    /// Fallback rendering for mentions with no configured replacement
    #[serde(default)]
    pub mention_fallback: MentionFallback,

    /// Optional literal caption rewrite applied before mention rewriting
    #[serde(default)]
    pub caption_rewrite: Option<CaptionRewrite>,

    /// Machine-translate the localized text with this language pair
    #[serde(default)]
    pub translate: Option<LanguagePair>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: RetryPolicy::default(),
            default_tags: Vec::new(),
            max_tags: default_max_tags(),
            attach_tags: false,
            replacements: HashMap::new(),
            mention_fallback: MentionFallback::default(),
            caption_rewrite: None,
            translate: None,
        }
    }
}

/// Chat channel target configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Shared delivery settings
    #[serde(flatten)]
    pub target: TargetConfig,

    /// Bot API base URL (default: "https://api.telegram.org")
    #[serde(default = "default_chat_api_base")]
    pub api_base: String,

    /// Bot token
    #[serde(default)]
    pub bot_token: String,

    /// Channel identifier the media group is posted to
    #[serde(default)]
    pub channel_id: i64,

    /// HTTP timeout for publish calls (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            api_base: default_chat_api_base(),
            bot_token: String::new(),
            channel_id: 0,
            timeout: default_http_timeout(),
        }
    }
}

/// Photo feed target configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Shared delivery settings
    #[serde(flatten)]
    pub target: TargetConfig,

    /// Graph API base URL (default: "https://graph.instagram.com/v21.0")
    #[serde(default = "default_feed_api_base")]
    pub api_base: String,

    /// App access token
    #[serde(default)]
    pub access_token: String,

    /// Web-visible base URL under which staged media is served
    ///
    /// The feed API imports photos by URL only, so the staging area must be
    /// exposed over HTTP; derived renditions are referenced as
    /// `<web_media_base>/<item_key>/<file_name>`.
    #[serde(default)]
    pub web_media_base: String,

    /// Letterbox fill color for square renditions (default: "white")
    #[serde(default = "default_fill_color")]
    pub fill_color: String,

    /// Square rendition edge length in pixels (default: 1280)
    #[serde(default = "default_square_size")]
    pub square_size: u32,

    /// Pause between consecutive container calls, the API rejects bursts
    /// (default: 3 seconds)
    #[serde(default = "default_pacing_delay", with = "duration_serde")]
    pub pacing_delay: Duration,

    /// HTTP timeout for publish calls (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig {
                attach_tags: true,
                mention_fallback: MentionFallback::Plain,
                ..TargetConfig::default()
            },
            api_base: default_feed_api_base(),
            access_token: String::new(),
            web_media_base: String::new(),
            fill_color: default_fill_color(),
            square_size: default_square_size(),
            pacing_delay: default_pacing_delay(),
            timeout: default_http_timeout(),
        }
    }
}

/// Image tagging collaborator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaggingConfig {
    /// Tagging API base URL (default: "https://api.imagga.com/v2")
    #[serde(default = "default_tagging_api_base")]
    pub api_base: String,

    /// API key (basic auth user)
    #[serde(default)]
    pub api_key: String,

    /// API secret (basic auth password)
    #[serde(default)]
    pub api_secret: String,

    /// HTTP timeout for tagging calls (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            api_base: default_tagging_api_base(),
            api_key: String::new(),
            api_secret: String::new(),
            timeout: default_http_timeout(),
        }
    }
}

/// Text translation collaborator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Translation API base URL (default: "https://libretranslate.com")
    #[serde(default = "default_translation_api_base")]
    pub api_base: String,

    /// Optional API key sent with each request
    #[serde(default)]
    pub api_key: Option<String>,

    /// HTTP timeout for translation calls (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_base: default_translation_api_base(),
            api_key: None,
            timeout: default_http_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_source_api_base() -> String {
    "https://api.vk.com/method".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_api_version() -> String {
    "5.199".to_string()
}

fn default_profile_base() -> String {
    "https://vk.com".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}

fn default_backoff_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_tags() -> usize {
    30
}

fn default_chat_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_feed_api_base() -> String {
    "https://graph.instagram.com/v21.0".to_string()
}

fn default_fill_color() -> String {
    "white".to_string()
}

fn default_square_size() -> u32 {
    1280
}

fn default_pacing_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_tagging_api_base() -> String {
    "https://api.imagga.com/v2".to_string()
}

fn default_translation_api_base() -> String {
    "https://libretranslate.com".to_string()
}

fn default_enrichment_retry() -> RetryPolicy {
    RetryPolicy::bounded(3, Duration::from_secs(5))
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_full_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.source.page_size, 100);
        assert!(config.chat.target.enabled);
        assert!(config.feed.target.enabled);
        assert!(config.feed.target.attach_tags);
        assert!(!config.chat.target.attach_tags);
        assert_eq!(config.feed.square_size, 1280);
        assert_eq!(config.feed.target.mention_fallback, MentionFallback::Plain);
    }

    #[test]
    fn durations_round_trip_as_seconds() {
        let config = Config {
            poll_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 60);

        let parsed: Config = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn unbounded_retry_parses_from_null_max_attempts() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": null, "backoff_delay": 2}"#).unwrap();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.backoff_delay, Duration::from_secs(2));
    }

    #[test]
    fn bounded_and_unbounded_constructors() {
        let bounded = RetryPolicy::bounded(3, Duration::from_millis(10));
        assert_eq!(bounded.max_attempts, Some(3));
        assert!(!bounded.fatal_on_exhaustion);

        let unbounded = RetryPolicy::unbounded(Duration::from_millis(10));
        assert_eq!(unbounded.max_attempts, None);
    }

    #[test]
    fn watermark_path_lives_under_staging_root() {
        let staging = StagingConfig {
            root: PathBuf::from("/var/lib/crosspost"),
        };
        assert_eq!(
            staging.watermark_path(),
            PathBuf::from("/var/lib/crosspost/.last")
        );
    }

    #[test]
    fn target_config_flattens_into_chat_section() {
        let json = r#"{
            "chat": {
                "enabled": false,
                "bot_token": "t0k",
                "channel_id": -100,
                "replacements": {"id1": "@someone"}
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(!config.chat.target.enabled);
        assert_eq!(config.chat.bot_token, "t0k");
        assert_eq!(config.chat.channel_id, -100);
        assert_eq!(
            config.chat.target.replacements.get("id1").unwrap(),
            "@someone"
        );
    }

    #[test]
    fn max_elapsed_round_trips() {
        let policy = RetryPolicy {
            max_elapsed: Some(Duration::from_secs(900)),
            ..RetryPolicy::unbounded(Duration::from_secs(5))
        };
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_elapsed, Some(Duration::from_secs(900)));
    }
}
