//! The item record: one video in production.

use super::machine::{ItemState, Stage};
use crate::resilience::ErrorKind;
use crate::store::{ArtifactKind, ArtifactRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Where an item's idea came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    AiIdeation,
    SocialTrend,
}

impl ItemSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemSource::AiIdeation => "ai_ideation",
            ItemSource::SocialTrend => "social_trend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai_ideation" => Some(ItemSource::AiIdeation),
            "social_trend" => Some(ItemSource::SocialTrend),
            _ => None,
        }
    }
}

/// The last classified failure on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: ErrorKind,
    /// Human message, already redacted.
    pub message: String,
    pub stage: String,
    pub at: DateTime<Utc>,
}

/// One row of work: a single video moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub source: ItemSource,
    pub concept_text: String,
    pub state: ItemState,
    /// Execution count per stage, capped by each stage's attempt budget.
    #[serde(default)]
    pub stage_attempts: BTreeMap<String, u32>,
    /// Finalized artifacts keyed by artifact kind key.
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRecord>,
    #[serde(default)]
    pub error: Option<ItemFailure>,
    #[serde(default)]
    pub publication_url: Option<String>,
    /// Word timings captured during narration when the provider returns
    /// them inline; spares the alignment call during captioning.
    #[serde(default)]
    pub narration_timings: Option<Vec<crate::providers::WordTiming>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// A freshly ingested idea awaiting operator approval.
    pub fn new(item_id: impl Into<String>, source: ItemSource, concept_text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            item_id: item_id.into(),
            source,
            concept_text: concept_text.into(),
            state: ItemState::PendingApproval,
            stage_attempts: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            error: None,
            publication_url: None,
            narration_timings: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stable idempotency seed for `(item, stage)`, sent to providers that
    /// support dedupe keys. Attempt-independent so a retried stage reuses
    /// the same key.
    pub fn fingerprint(&self, stage: Stage) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.item_id.as_bytes());
        hasher.update(b":");
        hasher.update(stage.as_str().as_bytes());
        let digest = hasher.finalize();
        format!("{:x}", digest)[..16].to_string()
    }

    /// Executions recorded for a stage.
    pub fn attempts(&self, stage: Stage) -> u32 {
        self.stage_attempts
            .get(stage.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Records one execution of a stage and returns the new count.
    pub fn record_attempt(&mut self, stage: Stage) -> u32 {
        let count = self
            .stage_attempts
            .entry(stage.as_str().to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Finalized artifact of a kind, if recorded.
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRecord> {
        self.artifacts.get(&kind.key())
    }

    /// Records a finalized artifact, superseding any previous one of the
    /// same kind.
    pub fn put_artifact(&mut self, record: ArtifactRecord) {
        self.artifacts.insert(record.kind.clone(), record);
    }

    /// All recorded stock clips, in index order.
    pub fn stock_clips(&self) -> Vec<&ArtifactRecord> {
        let mut clips: Vec<(u32, &ArtifactRecord)> = self
            .artifacts
            .iter()
            .filter_map(|(key, record)| match ArtifactKind::parse_key(key) {
                Some(ArtifactKind::StockClip(n)) => Some((n, record)),
                _ => None,
            })
            .collect();
        clips.sort_by_key(|(n, _)| *n);
        clips.into_iter().map(|(_, r)| r).collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
