//! Per-item media staging
//!
//! Every acquired item gets its own directory under `<root>/content/<key>/`
//! holding the downloaded originals, any target-specific derived renditions,
//! the persisted item record, and per-target delivery state files. The
//! directory is removed after the item's watermark commit; stale directories
//! left by failed cleanups are an operational cost, never a correctness
//! hazard.
//!
//! Derived renditions (e.g. the letterboxed squares the photo feed needs) go
//! through the [`MediaTransform`] seam so the actual image processing stays
//! an external collaborator.

use crate::error::{Error, Result};
use crate::types::{DeliveryState, ItemRecord, SequenceKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the persisted item record inside a staging directory
const RECORD_FILE: &str = "item.json";

/// Trait for producing a target-specific rendition of a staged media file
///
/// Implementations must write the rendition to `derived` without mutating
/// `original`. The transform itself (resizing, letterboxing) is an external
/// collaborator; the library only owns the lifecycle of the derived file.
#[async_trait]
pub trait MediaTransform: Send + Sync {
    /// Short label used as the derived file's name suffix (e.g. "square")
    fn label(&self) -> &str;

    /// Produce the rendition at `derived` from `original`
    async fn apply(&self, original: &Path, derived: &Path) -> Result<()>;
}

/// Pass-through transform used when no image processing collaborator is wired
///
/// Copies the original byte-for-byte so URL-based publishers keep working,
/// at the cost of un-letterboxed output.
pub struct NoOpTransform;

#[async_trait]
impl MediaTransform for NoOpTransform {
    fn label(&self) -> &str {
        "copy"
    }

    async fn apply(&self, original: &Path, derived: &Path) -> Result<()> {
        tokio::fs::copy(original, derived)
            .await
            .map_err(Error::Staging)?;
        Ok(())
    }
}

/// On-disk staging area for item media and durable per-item state
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    /// Create a store rooted at the given directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Staging directory of one item, named by its sequence key
    pub fn item_dir(&self, key: SequenceKey) -> PathBuf {
        self.root.join("content").join(key.to_string())
    }

    /// Stage one media file into the item's directory
    ///
    /// Creates the directory if absent. Returns the staged path; downstream
    /// stages never touch the network for this asset again.
    pub async fn stage(
        &self,
        key: SequenceKey,
        asset_id: i64,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.item_dir(key);
        tokio::fs::create_dir_all(&dir).await.map_err(Error::Staging)?;

        let path = dir.join(format!("{asset_id}.jpg"));
        tokio::fs::write(&path, bytes).await.map_err(Error::Staging)?;
        debug!(item = key, asset = asset_id, path = %path.display(), "Media staged");
        Ok(path)
    }

    /// Produce a target-specific rendition next to the original
    ///
    /// The derived file is named `<stem>_<label>.<ext>`; the original is
    /// never mutated. Re-deriving over an existing rendition overwrites it.
    pub async fn derive(
        &self,
        local_path: &Path,
        transform: &dyn MediaTransform,
    ) -> Result<PathBuf> {
        let stem = local_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Other(format!("unusable media path {}", local_path.display())))?;
        let ext = local_path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("jpg");
        let derived = local_path.with_file_name(format!("{stem}_{}.{ext}", transform.label()));

        transform.apply(local_path, &derived).await?;
        debug!(original = %local_path.display(), derived = %derived.display(), "Rendition derived");
        Ok(derived)
    }

    /// Read a staged file back into memory
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(Error::Staging)
    }

    /// Remove the item's staging directory recursively
    ///
    /// Failures are logged and returned for event reporting but must never
    /// block watermark progress or the outer loop.
    pub async fn cleanup(&self, key: SequenceKey) -> std::io::Result<()> {
        let dir = self.item_dir(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(item = key, path = %dir.display(), "Staging directory removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(item = key, "Staging directory already gone");
                Ok(())
            }
            Err(e) => {
                warn!(item = key, path = %dir.display(), error = %e, "Failed to remove staging directory");
                Err(e)
            }
        }
    }

    /// Persist the item record to its staging directory
    pub async fn store_record(&self, record: &ItemRecord) -> Result<()> {
        let dir = self.item_dir(record.key);
        tokio::fs::create_dir_all(&dir).await.map_err(Error::Staging)?;

        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(dir.join(RECORD_FILE), bytes)
            .await
            .map_err(Error::Staging)?;
        debug!(item = record.key, "Item record persisted");
        Ok(())
    }

    /// Load a previously persisted item record, if one exists
    ///
    /// Per-target delivery state files written after the record are merged
    /// in, so the caller sees the most recent terminal transitions. Corrupt
    /// records are logged and treated as missing.
    pub async fn load_record(&self, key: SequenceKey) -> Option<ItemRecord> {
        let dir = self.item_dir(key);
        let raw = tokio::fs::read(dir.join(RECORD_FILE)).await.ok()?;

        let mut record: ItemRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(item = key, error = %e, "Corrupt item record, re-acquiring from source");
                return None;
            }
        };
        if record.key != key {
            warn!(
                item = key,
                recorded = record.key,
                "Item record key mismatch, re-acquiring from source"
            );
            return None;
        }

        for (target, state) in self.load_deliveries(key).await {
            record.delivery.insert(target, state);
        }
        Some(record)
    }

    /// Durably record one target's delivery state for an item
    ///
    /// Written on every terminal transition so a restarted process never
    /// re-publishes to a target that already succeeded.
    pub async fn store_delivery(
        &self,
        key: SequenceKey,
        target: &str,
        state: &DeliveryState,
    ) -> Result<()> {
        let dir = self.item_dir(key);
        tokio::fs::create_dir_all(&dir).await.map_err(Error::Staging)?;

        let bytes = serde_json::to_vec(state)?;
        tokio::fs::write(dir.join(format!("delivery.{target}.json")), bytes)
            .await
            .map_err(Error::Staging)?;
        debug!(item = key, target = target, "Delivery state persisted");
        Ok(())
    }

    /// Load all persisted delivery states for an item
    pub async fn load_deliveries(&self, key: SequenceKey) -> HashMap<String, DeliveryState> {
        let mut states = HashMap::new();
        let dir = self.item_dir(key);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return states,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(target) = name
                .strip_prefix("delivery.")
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };

            match tokio::fs::read(entry.path()).await {
                Ok(raw) => match serde_json::from_slice::<DeliveryState>(&raw) {
                    Ok(state) => {
                        states.insert(target.to_string(), state);
                    }
                    Err(e) => {
                        warn!(item = key, target = target, error = %e, "Corrupt delivery state file ignored");
                    }
                },
                Err(e) => {
                    warn!(item = key, target = target, error = %e, "Unreadable delivery state file ignored");
                }
            }
        }
        states
    }
}
