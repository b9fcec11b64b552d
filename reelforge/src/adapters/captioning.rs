//! Caption burn-in stage.

use super::{read_text_artifact, StageAdapter, StageContext, StageOutcome, StageOutput};
use crate::dashboard::RowPatch;
use crate::providers::{build_srt, CaptionAligner, MediaMuxer, WordTiming};
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactKind, ItemLockGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Burns word-timed captions into the assembled video.
///
/// Timings come from narration when the TTS provider returned them inline;
/// otherwise the alignment service recovers them from script plus audio.
pub struct CaptioningAdapter {
    aligner: Arc<dyn CaptionAligner>,
    muxer: Arc<dyn MediaMuxer>,
}

impl CaptioningAdapter {
    pub fn new(aligner: Arc<dyn CaptionAligner>, muxer: Arc<dyn MediaMuxer>) -> Self {
        Self { aligner, muxer }
    }

    async fn timings_for(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<Vec<WordTiming>, CallError> {
        if let Some(ref timings) = item.narration_timings {
            if !timings.is_empty() {
                debug!(item_id = %item.item_id, "using inline narration timings");
                return Ok(timings.clone());
            }
        }
        let script_record = item
            .artifact(ArtifactKind::Script)
            .ok_or_else(|| CallError::Unexpected {
                message: "captioning dispatched without a script".to_string(),
            })?;
        let script = read_text_artifact(&ctx.store, guard, script_record)?;
        let narration = item
            .artifact(ArtifactKind::Narration)
            .ok_or_else(|| CallError::Unexpected {
                message: "captioning dispatched without narration".to_string(),
            })?;
        let audio = std::fs::read(&narration.path).map_err(|e| CallError::Unexpected {
            message: format!("cannot read narration: {}", e),
        })?;
        self.aligner
            .align(&script, &audio, &item.fingerprint(Stage::Captioning))
            .await
    }
}

#[async_trait]
impl StageAdapter for CaptioningAdapter {
    fn stage(&self) -> Stage {
        Stage::Captioning
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let assembled = item
            .artifact(ArtifactKind::AssembledVideo)
            .ok_or_else(|| CallError::Unexpected {
                message: "captioning dispatched without assembled video".to_string(),
            })?;

        let timings = self.timings_for(ctx, guard, item).await?;
        let srt = build_srt(&timings);

        let mut slot = ctx
            .store
            .begin(ArtifactKind::CaptionedVideo, &item.item_id)
            .map_err(|e| CallError::Unexpected {
                message: format!("artifact slot: {}", e),
            })?;
        slot.detach_handle();

        // The subtitle file sits beside the output temp and is removed with it.
        let srt_path = slot.temp_path().with_extension("srt");
        std::fs::write(&srt_path, srt).map_err(|e| CallError::Unexpected {
            message: format!("cannot write subtitles: {}", e),
        })?;

        let burn = self
            .muxer
            .burn_captions(
                &assembled.path,
                &srt_path,
                slot.temp_path(),
                ctx.cancel.clone(),
            )
            .await;
        let _ = std::fs::remove_file(&srt_path);
        burn?;

        let record = slot
            .finalize(guard, Stage::Captioning.as_str())
            .map_err(|e| CallError::Unexpected {
                message: format!("captioned video finalize: {}", e),
            })?;

        info!(
            item_id = %item.item_id,
            cues = timings.len().div_ceil(3),
            "captions burned"
        );
        Ok(StageOutcome::Completed(StageOutput {
            patch: RowPatch {
                video_path: Some(record.path.display().to_string()),
                ..Default::default()
            },
            artifacts: vec![record],
            ..Default::default()
        }))
    }
}
