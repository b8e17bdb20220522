//! Dispatch engine: per-target delivery attempt loops
//!
//! For each item the engine drives one attempt loop per enabled target until
//! every target has reached a terminal state (delivered or permanently
//! failed). Each loop is fully independent: one target's exhaustion or
//! success never affects another target's attempt counter, and targets run
//! concurrently since each future only ever produces its own state slot.
//!
//! Re-entry is idempotent: delivering to a target whose recorded state is
//! already terminal is a no-op returning the stored outcome. Terminal
//! transitions are persisted to the item's staging directory, so this holds
//! across process restarts too — a crashed-and-restarted cycle does not
//! re-publish to a target that already succeeded. The outer contract remains
//! at-least-once: a crash in the narrow window between a publish success and
//! the record write can still duplicate one post.

use crate::config::TargetConfig;
use crate::enrich::Enricher;
use crate::error::{Error, Result};
use crate::retry::{IsRetryable, backoff_delay};
use crate::staging::MediaStore;
use crate::types::{DeliveryState, Event, Item, MediaAsset};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Trait for a downstream publisher collaborator
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one rendered item; returns the remote post id
    ///
    /// Failures must map to [`Error::Publish`] with the retryable flag set
    /// for transient conditions (timeouts, server errors, rate limits) and
    /// cleared for rejections that will not change on retry.
    async fn publish(&self, text: &str, media: &[MediaAsset], tags: &[String]) -> Result<String>;
}

/// One enabled destination: name, delivery settings and publisher
pub struct Target {
    /// Target name, the key of the item's delivery state map
    pub name: String,
    /// Delivery settings (retry policy, localization, tag rules)
    pub settings: TargetConfig,
    /// The publisher collaborator
    pub publisher: Arc<dyn Publisher>,
}

impl Target {
    /// Bundle a named target from its settings and publisher
    pub fn new(
        name: impl Into<String>,
        settings: TargetConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            publisher,
        }
    }
}

/// The dispatch engine
pub struct Dispatcher {
    enricher: Arc<Enricher>,
    store: Arc<MediaStore>,
    events: broadcast::Sender<Event>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        enricher: Arc<Enricher>,
        store: Arc<MediaStore>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            enricher,
            store,
            events,
        }
    }

    /// Drive one target's delivery loop for an item until terminal
    ///
    /// The returned state is also persisted to the item's staging directory.
    /// Calling this again for a target whose recorded state is already
    /// terminal returns that state without invoking the publisher.
    pub async fn deliver(&self, item: &Item, target: &Target) -> DeliveryState {
        let prior = item.state_for(&target.name);
        if let Some(state) = prior {
            if state.terminal {
                debug!(
                    item = item.key,
                    target = %target.name,
                    success = state.success,
                    "Target already terminal, skipping"
                );
                return state.clone();
            }
        }

        let policy = &target.settings.retry;
        let started = Instant::now();
        let mut attempts_used = prior.map_or(0, |s| s.attempts_used);
        let mut last_error = prior.and_then(|s| s.last_error.clone());

        loop {
            if policy.max_attempts.is_some_and(|max| attempts_used >= max) {
                break;
            }
            if policy
                .max_elapsed
                .is_some_and(|cap| started.elapsed() >= cap)
            {
                warn!(
                    item = item.key,
                    target = %target.name,
                    attempts = attempts_used,
                    elapsed = ?started.elapsed(),
                    "Delivery exceeded the wall-clock cap"
                );
                last_error = Some(format!(
                    "wall-clock cap exceeded after {attempts_used} attempts"
                ));
                break;
            }

            attempts_used += 1;
            info!(
                item = item.key,
                target = %target.name,
                attempt = attempts_used,
                "Delivery attempt"
            );
            self.events
                .send(Event::DeliveryAttempt {
                    key: item.key,
                    target: target.name.clone(),
                    attempt: attempts_used,
                })
                .ok();

            match self.attempt(item, target).await {
                Ok(remote_id) => {
                    info!(
                        item = item.key,
                        target = %target.name,
                        attempts = attempts_used,
                        remote_id = %remote_id,
                        "Item delivered"
                    );
                    let state = DeliveryState::delivered(attempts_used);
                    self.persist(item, &target.name, &state).await;
                    self.events
                        .send(Event::TargetDelivered {
                            key: item.key,
                            target: target.name.clone(),
                            attempts: attempts_used,
                            remote_id,
                        })
                        .ok();
                    return state;
                }
                Err(e) => {
                    warn!(
                        item = item.key,
                        target = %target.name,
                        attempt = attempts_used,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    last_error = Some(e.to_string());
                    if !e.is_retryable() {
                        break;
                    }
                    tokio::time::sleep(backoff_delay(policy)).await;
                }
            }
        }

        let state = DeliveryState::failed(
            attempts_used,
            last_error.unwrap_or_else(|| "no attempts permitted by policy".to_string()),
        );
        warn!(
            item = item.key,
            target = %target.name,
            attempts = attempts_used,
            error = state.last_error.as_deref().unwrap_or_default(),
            "Target permanently failed for item"
        );
        self.persist(item, &target.name, &state).await;
        self.events
            .send(Event::TargetFailed {
                key: item.key,
                target: target.name.clone(),
                attempts: attempts_used,
                error: state.last_error.clone().unwrap_or_default(),
            })
            .ok();
        state
    }

    /// Deliver an item to every enabled target, concurrently
    ///
    /// Each target's future only produces its own state; the slots are merged
    /// into the item afterwards. Returns an error iff a target with
    /// `fatal_on_exhaustion` ended terminal-failed, in which case the caller
    /// decides whether the item aborts.
    pub async fn deliver_all(&self, item: &mut Item, targets: &[Target]) -> Result<()> {
        let enabled: Vec<&Target> = targets.iter().filter(|t| t.settings.enabled).collect();

        let item_ref = &*item;
        let futures = enabled.iter().map(|target| async move {
            let state = self.deliver(item_ref, target).await;
            (target, state)
        });
        let results = futures::future::join_all(futures).await;

        let mut fatal = None;
        for (target, state) in results {
            if state.terminal && !state.success && target.settings.retry.fatal_on_exhaustion {
                fatal = Some(Error::Publish {
                    target: target.name.clone(),
                    message: state
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "retries exhausted".to_string()),
                    retryable: false,
                });
            }
            item.set_state(&target.name, state);
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One publish attempt: localize for the target, then hand off
    async fn attempt(&self, item: &Item, target: &Target) -> Result<String> {
        let text = self.enricher.localize(item, &target.settings).await?;
        target.publisher.publish(&text, &item.media, &item.tags).await
    }

    /// Best-effort durable record of a terminal transition
    ///
    /// A failed write narrows resumption back to the watermark alone; it must
    /// not fail the delivery that already happened.
    async fn persist(&self, item: &Item, target: &str, state: &DeliveryState) {
        if let Err(e) = self.store.store_delivery(item.key, target, state).await {
            warn!(
                item = item.key,
                target = target,
                error = %e,
                "Failed to persist delivery state"
            );
        }
    }
}
