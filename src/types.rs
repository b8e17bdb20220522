//! Core types for crosspost

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Monotonic sequence key assigned by the upstream source
///
/// Used both as the item dedup/ordering key and as the watermark value.
/// The wall source uses the post's publish timestamp, which is monotonic
/// for a single owner feed.
pub type SequenceKey = u64;

/// One media file attached to an item
///
/// Owned exclusively by its parent [`Item`]; created during acquisition,
/// mutated only to attach tags during enrichment, deleted when the item's
/// staging directory is cleaned up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Source-assigned media identifier
    pub id: i64,

    /// Path of the staged file inside the item's staging directory
    pub local_path: PathBuf,

    /// Original remote URL, if the source exposed one
    pub source_url: Option<String>,

    /// Labels attached during enrichment (order-insignificant, deduplicated before use)
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Delivery progress of one item towards one target
///
/// A state with `terminal == true` will never be attempted again: the target
/// either succeeded or permanently failed for this item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    /// Number of publish attempts consumed so far
    pub attempts_used: u32,

    /// No further attempts will occur
    pub terminal: bool,

    /// The target accepted the item
    pub success: bool,

    /// Message of the most recent failed attempt
    pub last_error: Option<String>,
}

impl DeliveryState {
    /// Terminal successful state after `attempts_used` attempts
    pub fn delivered(attempts_used: u32) -> Self {
        Self {
            attempts_used,
            terminal: true,
            success: true,
            last_error: None,
        }
    }

    /// Terminal failed state after `attempts_used` attempts
    pub fn failed(attempts_used: u32, error: impl Into<String>) -> Self {
        Self {
            attempts_used,
            terminal: true,
            success: false,
            last_error: Some(error.into()),
        }
    }
}

/// One syndicated unit of content: text plus ordered media plus tags
///
/// Items are constructed once by the acquisition stage and processed strictly
/// one at a time; the media order defines the carousel/display order on every
/// target.
#[derive(Clone, Debug)]
pub struct Item {
    /// Source sequence key; identity, ordering key and watermark value
    pub key: SequenceKey,

    /// Raw text as returned by the source
    pub text: String,

    /// Ordered media attachments
    pub media: Vec<MediaAsset>,

    /// Merged tag set built during enrichment
    pub tags: Vec<String>,

    /// Per-target delivery progress, keyed by target name
    pub delivery: HashMap<String, DeliveryState>,
}

impl Item {
    /// Create an empty item for a freshly acquired source entry
    pub fn new(key: SequenceKey) -> Self {
        Self {
            key,
            text: String::new(),
            media: Vec::new(),
            tags: Vec::new(),
            delivery: HashMap::new(),
        }
    }

    /// Rebuild an item from its persisted staging record
    ///
    /// Used on crash resumption so that delivery progress from a previous
    /// process lifetime is preserved.
    pub fn from_record(record: ItemRecord) -> Self {
        Self {
            key: record.key,
            text: record.text,
            media: record.media,
            tags: record.tags,
            delivery: record.delivery,
        }
    }

    /// Snapshot the item into its persistable form
    pub fn to_record(&self) -> ItemRecord {
        ItemRecord {
            key: self.key,
            text: self.text.clone(),
            media: self.media.clone(),
            tags: self.tags.clone(),
            delivery: self.delivery.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Append a media attachment, preserving source order
    pub fn add_media(&mut self, id: i64, local_path: PathBuf, source_url: Option<String>) {
        self.media.push(MediaAsset {
            id,
            local_path,
            source_url,
            tags: Vec::new(),
        });
    }

    /// Delivery state for a target, if any attempt has been recorded
    pub fn state_for(&self, target: &str) -> Option<&DeliveryState> {
        self.delivery.get(target)
    }

    /// Record the delivery state for a target
    pub fn set_state(&mut self, target: &str, state: DeliveryState) {
        self.delivery.insert(target.to_string(), state);
    }

    /// Reopen targets that failed terminally in a previous run of this item
    ///
    /// Successful deliveries stay terminal so resumption never duplicates
    /// them. Failed targets get a fresh attempt budget: re-acquisition (next
    /// cycle or next process lifetime) is the recovery path for an item a
    /// fatal policy aborted, and without reopening it would stay aborted
    /// forever.
    pub fn reopen_failed_deliveries(&mut self) {
        for state in self.delivery.values_mut() {
            if state.terminal && !state.success {
                state.terminal = false;
                state.attempts_used = 0;
            }
        }
    }

    /// True once every named target has reached a terminal state
    ///
    /// An item is eligible for watermark commit iff this holds for the full
    /// set of enabled targets.
    pub fn all_terminal<'a>(&self, targets: impl IntoIterator<Item = &'a str>) -> bool {
        targets
            .into_iter()
            .all(|t| self.delivery.get(t).is_some_and(|s| s.terminal))
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} media)", self.key, self.media.len())
    }
}

/// Persisted form of an [`Item`], stored as `item.json` in its staging directory
///
/// Written after acquisition and after enrichment; per-target delivery states
/// are additionally persisted on every terminal transition so a restarted
/// process does not re-publish to a target that already succeeded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Source sequence key
    pub key: SequenceKey,
    /// Raw text
    pub text: String,
    /// Ordered media attachments with their staged paths
    pub media: Vec<MediaAsset>,
    /// Merged tag set
    #[serde(default)]
    pub tags: Vec<String>,
    /// Per-target delivery progress
    #[serde(default)]
    pub delivery: HashMap<String, DeliveryState>,
    /// When this snapshot was written; lets operators spot stale staging
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Events emitted by the syndication cycle
///
/// Consumers subscribe via [`crate::cycle::CycleController::subscribe`]. One
/// event is emitted per state transition and per delivery attempt.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A poll cycle started
    CycleStarted {
        /// Watermark the cycle resumes from
        since: SequenceKey,
    },

    /// The source returned nothing newer than the watermark
    NoNewItems,

    /// An item was acquired and its media fully staged
    ItemAcquired {
        /// Item sequence key
        key: SequenceKey,
        /// Number of staged media files
        media_count: usize,
    },

    /// Tag enrichment completed for an item
    ItemEnriched {
        /// Item sequence key
        key: SequenceKey,
        /// Size of the merged tag set
        tag_count: usize,
    },

    /// One delivery attempt is about to run
    DeliveryAttempt {
        /// Item sequence key
        key: SequenceKey,
        /// Target name
        target: String,
        /// 1-based attempt number
        attempt: u32,
    },

    /// A target accepted the item
    TargetDelivered {
        /// Item sequence key
        key: SequenceKey,
        /// Target name
        target: String,
        /// Attempts consumed
        attempts: u32,
        /// Identifier assigned by the target
        remote_id: String,
    },

    /// A target permanently failed for the item
    TargetFailed {
        /// Item sequence key
        key: SequenceKey,
        /// Target name
        target: String,
        /// Attempts consumed
        attempts: u32,
        /// Final error message
        error: String,
    },

    /// The watermark advanced past the item
    ItemCommitted {
        /// Item sequence key
        key: SequenceKey,
    },

    /// The item was aborted before reaching a terminal state on all targets
    ItemAborted {
        /// Item sequence key
        key: SequenceKey,
        /// Abort reason
        error: String,
    },

    /// Staging cleanup failed; the item is already committed
    CleanupFailed {
        /// Item sequence key
        key: SequenceKey,
        /// Failure message
        error: String,
    },

    /// The controller is shutting down
    ShuttingDown,
}
