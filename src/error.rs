//! Error types for crosspost
//!
//! This module provides the error taxonomy for the syndication cycle:
//! - Source-side failures split into transient (`SourceUnavailable`) and
//!   contract-violating (`SourceContract`) classes
//! - Per-target publish failures carrying a retryability flag
//! - Enrichment (tagging/translation) failures, also retryable-aware
//! - Watermark persistence failures, which are fatal to the cycle

use thiserror::Error;

/// Result type alias for crosspost operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for crosspost
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "staging_dir")
        key: Option<String>,
    },

    /// Upstream source is temporarily unreachable; the current cycle is skipped
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source returned data the item model cannot represent
    ///
    /// This is fatal: silently skipping malformed source data would lose items.
    #[error("source contract violation: {0}")]
    SourceContract(String),

    /// Failed to stage media into the per-item staging directory
    ///
    /// Treated as `SourceUnavailable`-class by the acquisition stage: only the
    /// affected item is deferred, the process keeps running.
    #[error("staging error: {0}")]
    Staging(#[source] std::io::Error),

    /// Failed to persist the watermark; fatal, the resume point must not be lost
    #[error("watermark store error: {0}")]
    Watermark(#[source] std::io::Error),

    /// Tagging or translation failed during enrichment
    #[error("enrichment error: {message}")]
    Enrichment {
        /// Human-readable description of the failure
        message: String,
        /// Whether the failure is transient (network/timeout) or permanent (malformed response)
        retryable: bool,
    },

    /// A downstream publisher rejected or failed a delivery attempt
    #[error("publish error for target '{target}': {message}")]
    Publish {
        /// Name of the target that failed
        target: String,
        /// Human-readable description of the failure
        message: String,
        /// Whether the attempt may be retried
        retryable: bool,
    },

    /// HTTP transport error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation rejected because shutdown is in progress
    #[error("shutting down")]
    ShuttingDown,

    /// Generic error for cases not covered by other variants
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true if this error must abort the outer cycle loop
    ///
    /// Only watermark-write failures and source contract violations are
    /// process-fatal; everything else is retried in place or defers the
    /// current item to the next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::SourceContract(_) | Error::Watermark(_))
    }
}
