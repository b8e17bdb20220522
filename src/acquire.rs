//! Acquisition stage: turn new source entries into fully staged items
//!
//! The acquirer asks the source collaborator for entries newer than the
//! watermark, filters out entries with no attachable media, stages every
//! media file into the per-item staging area, and returns [`Item`]s in
//! ascending sequence-key order. Downstream stages never touch the network
//! for an original asset again.
//!
//! If a staged item record already exists for a key (a previous process
//! lifetime crashed mid-item), the item is rebuilt from the record instead of
//! re-downloaded, preserving its delivery progress.

use crate::error::{Error, Result};
use crate::staging::MediaStore;
use crate::types::{Item, SequenceKey};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One media attachment as reported by the source
#[derive(Clone, Debug)]
pub struct SourceMedia {
    /// Source-assigned media identifier
    pub id: i64,
    /// URL the original can be retrieved from
    pub url: String,
}

/// One raw entry as reported by the source, before staging
#[derive(Clone, Debug)]
pub struct SourceEntry {
    /// Monotonic sequence key (identity and watermark value)
    pub key: SequenceKey,
    /// Source-side post identifier, for log correlation only
    pub post_id: i64,
    /// Raw text
    pub text: String,
    /// Photo attachments in display order
    pub media: Vec<SourceMedia>,
}

/// Trait for the upstream content source collaborator
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Return entries with sequence keys greater than `since`
    ///
    /// Transient upstream failures must map to [`Error::SourceUnavailable`];
    /// responses the model cannot represent must map to
    /// [`Error::SourceContract`].
    async fn fetch_entries(&self, since: SequenceKey) -> Result<Vec<SourceEntry>>;

    /// Retrieve one media file by URL
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>>;
}

/// The acquisition stage
pub struct Acquirer {
    source: Arc<dyn ContentSource>,
    store: Arc<MediaStore>,
}

impl Acquirer {
    /// Create an acquirer over a source collaborator and staging store
    pub fn new(source: Arc<dyn ContentSource>, store: Arc<MediaStore>) -> Self {
        Self { source, store }
    }

    /// Fetch, stage and build all items newer than `since`, ascending by key
    ///
    /// Entries without media are not syndicated and are skipped. A staging
    /// failure defers the affected item *and everything after it* to the next
    /// cycle, so no later item can ever be committed ahead of an unresolved
    /// earlier one.
    pub async fn fetch_new(&self, since: SequenceKey) -> Result<Vec<Item>> {
        let mut entries = self.source.fetch_entries(since).await?;

        // The source already filters, but the watermark contract is ours to
        // enforce: never hand back an item at or below the resume point.
        entries.retain(|entry| {
            if entry.key <= since {
                debug!(item = entry.key, since = since, "Dropping stale source entry");
                return false;
            }
            true
        });
        entries.sort_by_key(|entry| entry.key);

        let mut items = Vec::new();
        for entry in entries {
            if entry.media.is_empty() {
                debug!(
                    item = entry.key,
                    post = entry.post_id,
                    "Entry has no attachable media, not syndicated"
                );
                continue;
            }

            if let Some(record) = self.store.load_record(entry.key).await {
                info!(
                    item = entry.key,
                    "Resuming item from persisted staging record"
                );
                let mut item = Item::from_record(record);
                item.reopen_failed_deliveries();
                items.push(item);
                continue;
            }

            match self.build_item(entry).await {
                Ok(item) => items.push(item),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        error = %e,
                        staged = items.len(),
                        "Staging failed, deferring this item and the rest of the batch"
                    );
                    break;
                }
            }
        }
        Ok(items)
    }

    /// Download and stage every attachment of one entry, then persist its record
    async fn build_item(&self, entry: SourceEntry) -> Result<Item> {
        info!(
            item = entry.key,
            post = entry.post_id,
            media_count = entry.media.len(),
            text = %entry.text,
            "Processing source entry"
        );

        let mut item = Item::new(entry.key);
        item.text = entry.text;

        for media in entry.media {
            let bytes = self.source.fetch_media(&media.url).await?;
            let path = self.store.stage(entry.key, media.id, &bytes).await?;
            item.add_media(media.id, path, Some(media.url));
        }

        self.store.store_record(&item.to_record()).await?;
        Ok(item)
    }
}
