//! Enrichment stage: tag derivation and target-specific text rendering
//!
//! Tagging asks the tagging collaborator for labels per media asset and
//! merges them into the item's tag set under fixed rules: union, whitespace
//! tags dropped (destination platforms reject multi-word tags), mandatory
//! default tags first, truncated to the configured cap. The default tag list
//! is immutable configuration copied per item.
//!
//! Localization rewrites source-specific inline mention markup
//! (`[id123|Display Name]`) into either a configured literal replacement or a
//! markdown-style profile link, and machine-translates the result for targets
//! configured with a language pair.

use crate::config::{MentionFallback, TargetConfig};
use crate::error::Result;
use crate::staging::MediaStore;
use crate::types::Item;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

/// One label proposed by the tagging collaborator
#[derive(Clone, Debug)]
pub struct ScoredLabel {
    /// Label text
    pub label: String,
    /// Collaborator-reported confidence, higher is better
    pub confidence: f64,
}

/// Trait for the image tagging collaborator
#[async_trait]
pub trait Tagger: Send + Sync {
    /// Propose labels for one image
    ///
    /// Network/timeout failures must map to a retryable
    /// [`crate::Error::Enrichment`]; malformed responses to a non-retryable one.
    async fn tag(&self, image: &[u8]) -> Result<Vec<ScoredLabel>>;
}

/// Trait for the text translation collaborator
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` between the given language codes
    async fn translate(&self, text: &str, src: &str, dst: &str) -> Result<String>;
}

/// Result of tag derivation for one item
///
/// Kept separate from the item so derivation can be retried without
/// mutating shared state between attempts.
#[derive(Clone, Debug)]
pub struct DerivedTags {
    /// Labels per media asset, in media order
    pub per_asset: Vec<Vec<String>>,
    /// Merged item-level tag set
    pub merged: Vec<String>,
}

impl DerivedTags {
    /// Attach the derived labels and merged set to the item
    pub fn apply_to(self, item: &mut Item) {
        for (asset, labels) in item.media.iter_mut().zip(self.per_asset) {
            asset.tags = labels;
        }
        item.tags = self.merged;
    }
}

/// The enrichment stage
pub struct Enricher {
    tagger: Arc<dyn Tagger>,
    translator: Arc<dyn Translator>,
    store: Arc<MediaStore>,
    /// Base URL for mention fallback profile links
    profile_base: String,
    mention_re: Regex,
}

impl Enricher {
    /// Create an enricher over the tagging and translation collaborators
    pub fn new(
        tagger: Arc<dyn Tagger>,
        translator: Arc<dyn Translator>,
        store: Arc<MediaStore>,
        profile_base: impl Into<String>,
    ) -> Self {
        Self {
            tagger,
            translator,
            store,
            profile_base: profile_base.into(),
            mention_re: mention_regex(),
        }
    }

    /// Derive tags for every media asset without mutating the item
    ///
    /// Returns per-asset label lists (confidence-descending, in media order)
    /// plus the merged item-level set built under `rules`. The merged set is
    /// rebuilt from scratch, so re-running after a partial failure cannot
    /// double-count.
    pub async fn derive_tags(&self, item: &Item, rules: &TargetConfig) -> Result<DerivedTags> {
        let mut per_asset = Vec::with_capacity(item.media.len());
        for asset in &item.media {
            let bytes = self.store.read(&asset.local_path).await?;
            let mut labels = self.tagger.tag(&bytes).await?;
            labels.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            info!(
                item = item.key,
                asset = asset.id,
                label_count = labels.len(),
                "Labels received for media asset"
            );
            per_asset.push(labels.into_iter().map(|l| l.label).collect::<Vec<_>>());
        }

        let candidates: Vec<&String> = per_asset.iter().flatten().collect();
        let merged = merge_tags(&rules.default_tags, &candidates, rules.max_tags);
        info!(item = item.key, tags = ?merged, "Final tag set");
        Ok(DerivedTags { per_asset, merged })
    }

    /// Derive tags and apply them to the item in place
    pub async fn tag_item(&self, item: &mut Item, rules: &TargetConfig) -> Result<()> {
        let derived = self.derive_tags(item, rules).await?;
        derived.apply_to(item);
        Ok(())
    }

    /// Produce the target-specific text rendering of an item
    pub async fn localize(&self, item: &Item, target: &TargetConfig) -> Result<String> {
        if item.text.is_empty() {
            return Ok(String::new());
        }

        let mut text = item.text.clone();
        if let Some(rewrite) = &target.caption_rewrite {
            text = text.replace(&rewrite.find, &rewrite.replace);
        }
        text = self.rewrite_mentions(&text, target);

        if let Some(langs) = &target.translate {
            text = self.translator.translate(&text, &langs.src, &langs.dst).await?;
            info!(item = item.key, src = %langs.src, dst = %langs.dst, "Text translated");
        }
        Ok(text)
    }

    /// Replace `[id|display]` mention markup per the target's table
    fn rewrite_mentions(&self, text: &str, target: &TargetConfig) -> String {
        self.mention_re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let id = &caps[1];
                let display = &caps[2];
                match target.replacements.get(id) {
                    Some(literal) => {
                        debug!(mention = id, replacement = %literal, "Mention replaced from table");
                        literal.clone()
                    }
                    None => match target.mention_fallback {
                        MentionFallback::Link => {
                            format!("[{display}]({}/{id})", self.profile_base)
                        }
                        MentionFallback::Plain => display.to_string(),
                    },
                }
            })
            .into_owned()
    }
}

/// Pattern for `[id123|Display Name]` mention markup: id, then display text
/// up to the closing bracket
fn mention_regex() -> Regex {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"\[(id\d+)\|([^\]|]+)\]").unwrap();
    re
}

/// Merge candidate tags into the mandatory set under the configured cap
///
/// Mandatory tags come first and count against the cap; candidates containing
/// whitespace are dropped; duplicates are skipped while preserving first-seen
/// order.
fn merge_tags(mandatory: &[String], candidates: &[&String], max: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for tag in mandatory {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged.truncate(max);

    for tag in candidates {
        if merged.len() >= max {
            break;
        }
        if tag.chars().any(char::is_whitespace) {
            debug!(tag = %tag, "Dropping multi-word tag");
            continue;
        }
        if merged.contains(tag) {
            continue;
        }
        merged.push((*tag).clone());
    }
    merged
}
