//! Common test utilities for crosspost end-to-end cycle tests

#![allow(dead_code)]

use async_trait::async_trait;
use crosspost::config::{StagingConfig, TargetConfig};
use crosspost::enrich::{ScoredLabel, Tagger, Translator};
use crosspost::{
    Config, ContentSource, CycleController, Error, Event, MediaAsset, MediaStore, Publisher,
    Result, RetryPolicy, SequenceKey, SourceEntry, SourceMedia, Target,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

/// In-memory content source serving a fixed batch of entries
pub struct ScriptedSource {
    entries: Vec<SourceEntry>,
    pub media_fetches: AtomicU32,
}

impl ScriptedSource {
    pub fn new(entries: Vec<SourceEntry>) -> Self {
        Self {
            entries,
            media_fetches: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch_entries(&self, since: SequenceKey) -> Result<Vec<SourceEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key > since)
            .cloned()
            .collect())
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>> {
        self.media_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(url.as_bytes().to_vec())
    }
}

/// What one publish call received
#[derive(Clone, Debug)]
pub struct PublishSeen {
    pub text: String,
    pub media_count: usize,
    pub tags: Vec<String>,
}

/// Publisher that fails its first `fail_first` calls, then succeeds
pub struct TestPublisher {
    name: &'static str,
    fail_first: u32,
    calls: AtomicU32,
    pub seen: Mutex<Vec<PublishSeen>>,
}

impl TestPublisher {
    pub fn succeeding(name: &'static str) -> Arc<Self> {
        Self::failing_first(name, 0)
    }

    pub fn failing_first(name: &'static str, fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_first,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing(name: &'static str) -> Arc<Self> {
        Self::failing_first(name, u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for TestPublisher {
    async fn publish(&self, text: &str, media: &[MediaAsset], tags: &[String]) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(Error::Publish {
                target: self.name.to_string(),
                message: format!("scripted failure {call}"),
                retryable: true,
            });
        }
        self.seen.lock().await.push(PublishSeen {
            text: text.to_string(),
            media_count: media.len(),
            tags: tags.to_vec(),
        });
        Ok(format!("{}-{call}", self.name))
    }
}

/// Tagger returning the same labels for every image
pub struct StaticTagger {
    labels: Vec<(&'static str, f64)>,
}

impl StaticTagger {
    pub fn new(labels: Vec<(&'static str, f64)>) -> Arc<Self> {
        Arc::new(Self { labels })
    }
}

#[async_trait]
impl Tagger for StaticTagger {
    async fn tag(&self, _image: &[u8]) -> Result<Vec<ScoredLabel>> {
        Ok(self
            .labels
            .iter()
            .map(|(label, confidence)| ScoredLabel {
                label: label.to_string(),
                confidence: *confidence,
            })
            .collect())
    }
}

/// Translator that passes text through unchanged
pub struct EchoTranslator;

#[async_trait]
impl Translator for EchoTranslator {
    async fn translate(&self, text: &str, _src: &str, _dst: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Source entry with `count` media attachments
pub fn entry(key: SequenceKey, text: &str, count: usize) -> SourceEntry {
    SourceEntry {
        key,
        post_id: key as i64,
        text: text.to_string(),
        media: (0..count as i64)
            .map(|id| SourceMedia {
                id,
                url: format!("https://media.test/{key}/{id}.jpg"),
            })
            .collect(),
    }
}

/// Target settings with a fast retry policy for tests
pub fn fast_target(retry: RetryPolicy) -> TargetConfig {
    TargetConfig {
        retry,
        ..TargetConfig::default()
    }
}

pub fn fast_bounded(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::bounded(max_attempts, Duration::from_millis(5))
}

pub fn fast_unbounded() -> RetryPolicy {
    RetryPolicy::unbounded(Duration::from_millis(5))
}

/// Controller over scripted collaborators, polling every 25ms
pub fn controller(
    staging_root: &std::path::Path,
    source: Arc<dyn ContentSource>,
    tagger: Arc<dyn Tagger>,
    targets: Vec<Target>,
) -> CycleController {
    let config = Config {
        staging: StagingConfig {
            root: staging_root.to_path_buf(),
        },
        poll_interval: Duration::from_millis(25),
        enrichment_retry: RetryPolicy::bounded(2, Duration::from_millis(5)),
        ..Config::default()
    };
    let store = Arc::new(MediaStore::new(config.staging.root.clone()));
    CycleController::new(&config, source, tagger, Arc::new(EchoTranslator), targets, store)
}

/// Await the first event matching `pred`, panicking after `timeout`
pub async fn wait_for(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for event"));
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => {
                if pred(&event) {
                    return event;
                }
            }
            Ok(Err(e)) => panic!("event channel closed: {e}"),
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}
