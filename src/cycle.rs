//! Cycle controller: the outer poll loop and per-item state machine
//!
//! The controller orchestrates Acquisition → Enrichment → Dispatch →
//! watermark commit → staging cleanup, strictly one item at a time, inside an
//! endless poll loop. An item is fully resolved (every enabled target
//! terminal) before the watermark advances and before the next item is
//! touched, which bounds the blast radius of a crash to at most one item's
//! worth of re-delivery.
//!
//! An aborted item stops the remainder of the current batch: later items must
//! never be committed ahead of an unresolved earlier one, or resumption would
//! skip it forever.
//!
//! Shutdown is cooperative and takes effect at the next idle transition; the
//! controller never abandons an item mid-flight.
//!
//! # Example
//!
//! ```no_run
//! use crosspost::{Config, CycleController, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
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
//!     run_with_shutdown(controller).await?;
//!     Ok(())
//! }
//! ```

use crate::acquire::{Acquirer, ContentSource};
use crate::clients::chat::ChatPublisher;
use crate::clients::photofeed::PhotoFeedPublisher;
use crate::clients::tagger::ImageTagClient;
use crate::clients::translate::TranslationClient;
use crate::clients::wall::WallSource;
use crate::config::{Config, RetryPolicy, SourceKind};
use crate::dispatch::{Dispatcher, Target};
use crate::enrich::{Enricher, Tagger, Translator};
use crate::error::{Error, Result};
use crate::retry::retry_with_policy;
use crate::staging::{MediaStore, NoOpTransform};
use crate::types::{Event, Item};
use crate::watermark::WatermarkStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the chat channel target
pub const CHAT_TARGET: &str = "chat";
/// Name of the photo feed target
pub const FEED_TARGET: &str = "feed";

/// The syndication cycle controller
pub struct CycleController {
    acquirer: Acquirer,
    enricher: Arc<Enricher>,
    dispatcher: Dispatcher,
    watermark: WatermarkStore,
    store: Arc<MediaStore>,
    targets: Vec<Target>,
    enrichment_retry: RetryPolicy,
    poll_interval: Duration,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl CycleController {
    /// Wire a controller from explicit collaborators
    ///
    /// Use [`from_config`](Self::from_config) for the default HTTP-backed
    /// wiring; this constructor exists so embedders and tests can substitute
    /// any collaborator.
    pub fn new(
        config: &Config,
        source: Arc<dyn ContentSource>,
        tagger: Arc<dyn Tagger>,
        translator: Arc<dyn Translator>,
        targets: Vec<Target>,
        store: Arc<MediaStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let enricher = Arc::new(Enricher::new(
            tagger,
            translator,
            store.clone(),
            config.source.profile_base.clone(),
        ));
        let dispatcher = Dispatcher::new(enricher.clone(), store.clone(), events.clone());
        let acquirer = Acquirer::new(source, store.clone());

        Self {
            acquirer,
            enricher,
            dispatcher,
            watermark: WatermarkStore::new(config.staging.watermark_path()),
            store,
            targets,
            enrichment_retry: config.enrichment_retry.clone(),
            poll_interval: config.poll_interval,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire the default pipeline: wall source, chat and photo feed targets,
    /// HTTP tagging and translation collaborators
    ///
    /// The photo feed uses the pass-through [`NoOpTransform`]; embedders with
    /// an image processing collaborator should assemble targets themselves
    /// via [`new`](Self::new).
    pub fn from_config(config: Config) -> Result<Self> {
        let store = Arc::new(MediaStore::new(config.staging.root.clone()));

        let source: Arc<dyn ContentSource> = match config.source.kind {
            SourceKind::Wall => Arc::new(WallSource::new(&config.source)?),
        };
        let tagger = Arc::new(ImageTagClient::new(&config.tagging)?);
        let translator = Arc::new(TranslationClient::new(&config.translation)?);

        let targets = vec![
            Target::new(
                CHAT_TARGET,
                config.chat.target.clone(),
                Arc::new(ChatPublisher::new(&config.chat)?),
            ),
            Target::new(
                FEED_TARGET,
                config.feed.target.clone(),
                Arc::new(PhotoFeedPublisher::new(
                    &config.feed,
                    store.clone(),
                    Arc::new(NoOpTransform),
                )?),
            ),
        ];

        Ok(Self::new(
            &config, source, tagger, translator, targets, store,
        ))
    }

    /// Subscribe to cycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Token that requests a clean shutdown
    ///
    /// Cancellation takes effect at the next idle transition; the current
    /// item is always driven to a terminal state first.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the poll loop until cancelled
    ///
    /// Returns an error only for process-fatal conditions (watermark write
    /// failure, source contract violation); everything else is logged and the
    /// loop continues with the next cycle.
    pub async fn run(self) -> Result<()> {
        info!(
            poll_interval = ?self.poll_interval,
            targets = self.targets.len(),
            "Syndication controller started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal cycle error, stopping controller");
                    self.events.send(Event::ShuttingDown).ok();
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Cycle failed, will retry next poll");
                }
            }

            debug!(interval = ?self.poll_interval, "Idle");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.events.send(Event::ShuttingDown).ok();
        info!("Syndication controller stopped");
        Ok(())
    }

    /// One acquisition-to-commit pass over everything newer than the watermark
    async fn run_cycle(&self) -> Result<()> {
        let since = self.watermark.read().await;
        self.events.send(Event::CycleStarted { since }).ok();
        debug!(since = since, "Acquiring new items");

        let items = self.acquirer.fetch_new(since).await?;
        if items.is_empty() {
            debug!("No new items this cycle");
            self.events.send(Event::NoNewItems).ok();
            return Ok(());
        }
        info!(count = items.len(), "Items acquired");

        for mut item in items {
            self.events
                .send(Event::ItemAcquired {
                    key: item.key,
                    media_count: item.media.len(),
                })
                .ok();

            match self.process_item(&mut item).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        item = item.key,
                        error = %e,
                        "Item aborted, deferring it and the rest of the batch"
                    );
                    self.events
                        .send(Event::ItemAborted {
                            key: item.key,
                            error: e.to_string(),
                        })
                        .ok();
                    break;
                }
            }
        }
        Ok(())
    }

    /// Drive one item through Enriching → Dispatching → Committing → Cleanup
    async fn process_item(&self, item: &mut Item) -> Result<()> {
        // Enriching: tags are derived once per item, under the rules of the
        // first enabled tag-consuming target that still needs a delivery.
        let wants_tags = self.targets.iter().find(|t| {
            t.settings.enabled
                && t.settings.attach_tags
                && !item.state_for(&t.name).is_some_and(|s| s.terminal)
        });
        if let Some(target) = wants_tags {
            if item.tags.is_empty() {
                let rules = &target.settings;
                let item_ref = &*item;
                let derived = retry_with_policy(&self.enrichment_retry, || {
                    self.enricher.derive_tags(item_ref, rules)
                })
                .await?;
                derived.apply_to(item);
                self.events
                    .send(Event::ItemEnriched {
                        key: item.key,
                        tag_count: item.tags.len(),
                    })
                    .ok();
                // Keep the staged record current so a restart does not re-tag
                self.store.store_record(&item.to_record()).await?;
            }
        }

        // Dispatching: all enabled targets, each to a terminal state
        self.dispatcher.deliver_all(item, &self.targets).await?;

        let enabled = self
            .targets
            .iter()
            .filter(|t| t.settings.enabled)
            .map(|t| t.name.as_str());
        if !item.all_terminal(enabled) {
            return Err(Error::Other(format!(
                "item {} has non-terminal targets after dispatch",
                item.key
            )));
        }

        // Committing: the watermark is durable before cleanup is attempted
        self.watermark.write(item.key).await?;
        self.events.send(Event::ItemCommitted { key: item.key }).ok();

        // Cleanup: never blocks commit or the loop
        if let Err(e) = self.store.cleanup(item.key).await {
            self.events
                .send(Event::CleanupFailed {
                    key: item.key,
                    error: e.to_string(),
                })
                .ok();
        }
        Ok(())
    }
}
