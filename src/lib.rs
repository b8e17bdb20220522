//! # crosspost
//!
//! Highly configurable backend library for content syndication applications.
//!
//! crosspost periodically pulls newly published items (posts with attached
//! photos) from one upstream content source and re-publishes each item,
//! unmodified in meaning but reformatted per destination, to one or more
//! downstream targets. It never loses an item, avoids unbounded reprocessing
//! after partial failures, and tolerates each target being temporarily
//! unavailable independently of the others.
//!
//! ## Design Philosophy
//!
//! crosspost is designed to be:
//! - **Highly configurable** - Almost every behavior can be customized
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## How progress is never lost
//!
//! A single durable watermark records the sequence key of the last item whose
//! distribution fully completed. The watermark only advances once every
//! enabled target has reached a terminal state for an item, and each
//! terminal transition is additionally persisted per item, so a restarted
//! process resumes exactly where it stopped without re-publishing to targets
//! that already succeeded. Delivery to a target remains at-least-once.
//!
//! ## Quick Start
//!
//! ```no_run
//! use crosspost::{Config, CycleController, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: Config = serde_json::from_str(&std::fs::read_to_string("config.json")?)?;
//!
//!     let controller = CycleController::from_config(config)?;
//!
//!     // Subscribe to events
//!     let mut events = controller.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Run with automatic signal handling
//!     run_with_shutdown(controller).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Acquisition stage and the content source seam
pub mod acquire;
/// HTTP collaborator clients (source, publishers, tagging, translation)
pub mod clients;
/// Configuration types
pub mod config;
/// Cycle controller and poll loop
pub mod cycle;
/// Dispatch engine and the publisher seam
pub mod dispatch;
/// Enrichment stage: tagging and per-target text rendering
pub mod enrich;
/// Error types
pub mod error;
/// Retry classification and the generic retry driver
pub mod retry;
/// Per-item media staging
pub mod staging;
/// Core types and events
pub mod types;
/// Durable watermark persistence
pub mod watermark;

// Re-export commonly used types
pub use acquire::{Acquirer, ContentSource, SourceEntry, SourceMedia};
pub use config::{Config, RetryPolicy, TargetConfig};
pub use cycle::CycleController;
pub use dispatch::{Dispatcher, Publisher, Target};
pub use enrich::{Enricher, ScoredLabel, Tagger, Translator};
pub use error::{Error, Result};
pub use staging::{MediaStore, MediaTransform, NoOpTransform};
pub use types::{DeliveryState, Event, Item, ItemRecord, MediaAsset, SequenceKey};
pub use watermark::WatermarkStore;

/// Helper function to run the controller with graceful signal handling.
///
/// Waits for a termination signal and then cancels the controller, which
/// stops at its next idle transition (never mid-item).
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use crosspost::{Config, CycleController, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let controller = CycleController::from_config(Config::default())?;
///     run_with_shutdown(controller).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(controller: CycleController) -> Result<()> {
    let cancel = controller.cancel_token();
    let handle = tokio::spawn(controller.run());

    wait_for_signal().await;
    cancel.cancel();

    handle
        .await
        .map_err(|e| Error::Other(format!("controller task panicked: {e}")))?
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
