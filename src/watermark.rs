//! Durable watermark persistence
//!
//! The watermark is the single scalar resume point of the cycle: the sequence
//! key of the last item whose distribution fully completed. It is read at
//! cycle start and written only after an item reaches a terminal state on
//! every enabled target, so it is monotonically non-decreasing by
//! construction.
//!
//! Failure semantics are asymmetric: a missing or corrupt file degrades to
//! "start from zero", while a failed write is fatal to the cycle. The
//! operator must not silently lose the resume point.

use crate::error::{Error, Result};
use crate::types::SequenceKey;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// File-backed store for the cycle's resume point
///
/// The format is a single decimal number in a text file. Writes go through a
/// temp file, fsync, and an atomic rename so a crash mid-write can never
/// leave a torn value behind.
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    /// Create a store backed by the given file path
    ///
    /// The file does not have to exist yet; the first [`read`](Self::read)
    /// returns zero and the first [`write`](Self::write) creates it.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the current watermark
    ///
    /// Returns zero if the file is missing or unparseable; this method never
    /// fails. Starting over from zero re-delivers at most the items the
    /// source still reports, which the per-item delivery records absorb.
    pub async fn read(&self) -> SequenceKey {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No watermark file, starting from zero");
                return 0;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read watermark, starting from zero");
                return 0;
            }
        };

        match raw.trim().parse::<SequenceKey>() {
            Ok(key) => {
                debug!(watermark = key, "Loaded watermark");
                key
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt watermark file, starting from zero");
                0
            }
        }
    }

    /// Persist a new watermark value durably
    ///
    /// Safe to call repeatedly with a monotonically increasing value. The
    /// value is on disk before this returns; errors are
    /// [`Error::Watermark`] and must abort the cycle.
    pub async fn write(&self, key: SequenceKey) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Error::Watermark)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let contents = key.to_string();

        let file_write = async {
            tokio::fs::write(&tmp_path, contents.as_bytes()).await?;
            let file = tokio::fs::File::open(&tmp_path).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, &self.path).await
        };
        file_write.await.map_err(Error::Watermark)?;

        info!(watermark = key, path = %self.path.display(), "Watermark advanced");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_reads_as_zero() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::new(dir.path().join(".last"));
        assert_eq!(store.read().await, 0);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::new(dir.path().join(".last"));

        store.write(1730000000).await.unwrap();
        assert_eq!(store.read().await, 1730000000);
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".last");
        tokio::fs::write(&path, "not a number").await.unwrap();

        let store = WatermarkStore::new(path);
        assert_eq!(store.read().await, 0);
    }

    #[tokio::test]
    async fn repeated_writes_keep_the_latest_value() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::new(dir.path().join(".last"));

        for key in [10, 20, 30] {
            store.write(key).await.unwrap();
        }
        assert_eq!(store.read().await, 30);
    }

    #[tokio::test]
    async fn write_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::new(dir.path().join("nested/deeper/.last"));

        store.write(7).await.unwrap();
        assert_eq!(store.read().await, 7);
    }

    #[tokio::test]
    async fn surrounding_whitespace_is_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".last");
        tokio::fs::write(&path, "  42\n").await.unwrap();

        let store = WatermarkStore::new(path);
        assert_eq!(store.read().await, 42);
    }
}
