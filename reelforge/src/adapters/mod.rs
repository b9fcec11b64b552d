//! Stage adapters: one thin translation layer per pipeline stage.
//!
//! An adapter receives an item plus an execution context, talks to exactly
//! one external collaborator, and returns produced artifacts and dashboard
//! field updates. Adapters hold no global state, never write item state
//! (the worker commits), and are idempotent with respect to their inputs:
//! re-running a completed stage either produces bit-identical artifacts or
//! supersedes the old one.

mod approval;
mod assembly;
mod captioning;
mod clip_sourcing;
mod ideation;
mod metadata;
mod narration;
mod publishing;
mod scripting;
mod trend_ingest;

pub use approval::ApprovalAdapter;
pub use assembly::AssemblyAdapter;
pub use captioning::CaptioningAdapter;
pub use clip_sourcing::ClipSourcingAdapter;
pub use ideation::IdeationAdapter;
pub use metadata::{MetadataAdapter, PublicationMetadata};
pub use narration::NarrationAdapter;
pub use publishing::PublishingAdapter;
pub use scripting::ScriptingAdapter;
pub use trend_ingest::TrendIngestAdapter;

use crate::config::Settings;
use crate::dashboard::{DashboardClient, RowPatch};
use crate::providers::{
    CaptionAligner, ClipSearch, FileDownloader, MediaMuxer, SpeechSynthesizer, TextGenerator,
    VideoPublisher,
};
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactRecord, ArtifactStore, ItemLockGuard};
use crate::telemetry::PipelineMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared execution context handed to every adapter invocation.
///
/// All collaborators are injected; adapters never construct clients.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<ArtifactStore>,
    pub settings: Arc<Settings>,
    pub metrics: Arc<PipelineMetrics>,
    pub cancel: CancellationToken,
    /// Attempt number for this execution, 1-based.
    pub attempt: u32,
}

/// What a completed stage hands back to the worker.
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Finalized artifacts to record on the item.
    pub artifacts: Vec<ArtifactRecord>,
    /// Dashboard cells to update alongside the state commit.
    pub patch: RowPatch,
    /// Set by publishing only.
    pub publication_url: Option<String>,
    /// Word timings recovered during narration, reused by captioning.
    pub timings: Option<Vec<crate::providers::WordTiming>>,
}

/// Result of one adapter execution.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage finished; the worker commits the completed state.
    Completed(StageOutput),
    /// The stage's external precondition is not met yet (operator has not
    /// approved). No state change, no attempt consumed.
    NotReady,
}

/// The uniform adapter contract.
#[async_trait]
pub trait StageAdapter: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError>;
}

/// The full adapter table plus the item-creating adapters, wired once at
/// startup and shared by every worker.
pub struct AdapterSet {
    adapters: Vec<Arc<dyn StageAdapter>>,
    pub ideation: IdeationAdapter,
    pub trend_ingest: Option<TrendIngestAdapter>,
}

impl AdapterSet {
    /// Wires adapters from explicit collaborators. Tests inject stubs here.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dashboard: Arc<dyn DashboardClient>,
        textgen: Arc<dyn TextGenerator>,
        tts: Arc<dyn SpeechSynthesizer>,
        clips: Arc<dyn ClipSearch>,
        downloader: Arc<FileDownloader>,
        muxer: Arc<dyn MediaMuxer>,
        aligner: Arc<dyn CaptionAligner>,
        publisher: Arc<dyn VideoPublisher>,
        trend_ingest: Option<TrendIngestAdapter>,
    ) -> Self {
        let adapters: Vec<Arc<dyn StageAdapter>> = vec![
            Arc::new(ApprovalAdapter::new(Arc::clone(&dashboard))),
            Arc::new(ScriptingAdapter::new(Arc::clone(&textgen))),
            Arc::new(NarrationAdapter::new(tts)),
            Arc::new(ClipSourcingAdapter::new(clips, downloader)),
            Arc::new(AssemblyAdapter::new(Arc::clone(&muxer))),
            Arc::new(CaptioningAdapter::new(aligner, muxer)),
            Arc::new(MetadataAdapter::new(Arc::clone(&textgen))),
            Arc::new(PublishingAdapter::new(publisher)),
        ];
        Self {
            adapters,
            ideation: IdeationAdapter::new(textgen, dashboard),
            trend_ingest,
        }
    }

    /// Adapter for a production stage, if one exists.
    pub fn adapter(&self, stage: Stage) -> Option<Arc<dyn StageAdapter>> {
        self.adapters.iter().find(|a| a.stage() == stage).cloned()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use tempfile::TempDir;

    /// Minimal valid settings for adapter tests.
    pub fn test_settings() -> Settings {
        let env: std::collections::BTreeMap<&str, &str> = [
            ("REELFORGE_DASHBOARD_URL", "https://rows.example"),
            ("REELFORGE_DASHBOARD_TOKEN", "tok"),
            ("REELFORGE_TEXTGEN_API_KEY", "tok"),
            ("REELFORGE_TTS_API_KEY", "tok"),
            ("REELFORGE_STOCK_API_KEY", "tok"),
            ("REELFORGE_UPLOAD_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();
        Settings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap()
    }

    /// Context with a store rooted in the temp dir.
    pub fn test_ctx(dir: &TempDir) -> StageContext {
        StageContext {
            store: Arc::new(ArtifactStore::open(dir.path().join("artifacts")).unwrap()),
            settings: Arc::new(test_settings()),
            metrics: Arc::new(PipelineMetrics::new()),
            cancel: CancellationToken::new(),
            attempt: 1,
        }
    }
}

/// Reads a recorded text artifact back from disk, verifying it first.
pub(crate) fn read_text_artifact(
    store: &ArtifactStore,
    guard: &ItemLockGuard,
    record: &ArtifactRecord,
) -> Result<String, CallError> {
    store
        .verify_recorded(guard, record)
        .map_err(|e| CallError::Unexpected {
            message: format!("artifact failed verification: {}", e),
        })?;
    std::fs::read_to_string(&record.path).map_err(|e| CallError::Unexpected {
        message: format!("cannot read {}: {}", record.path.display(), e),
    })
}
