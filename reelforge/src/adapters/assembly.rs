//! Video assembly stage.

use super::{StageAdapter, StageContext, StageOutcome, StageOutput};
use crate::providers::{MediaMuxer, MuxSpec};
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactKind, ItemLockGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Concats the stock clips, loops them to the narration length, scales and
/// pads to portrait, and muxes the narration track.
pub struct AssemblyAdapter {
    muxer: Arc<dyn MediaMuxer>,
}

impl AssemblyAdapter {
    pub fn new(muxer: Arc<dyn MediaMuxer>) -> Self {
        Self { muxer }
    }
}

#[async_trait]
impl StageAdapter for AssemblyAdapter {
    fn stage(&self) -> Stage {
        Stage::Assembling
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let narration = item
            .artifact(ArtifactKind::Narration)
            .ok_or_else(|| CallError::Unexpected {
                message: "assembly dispatched without narration".to_string(),
            })?;
        let clips: Vec<_> = item
            .stock_clips()
            .iter()
            .map(|record| record.path.clone())
            .collect();
        if clips.is_empty() {
            return Err(CallError::Unexpected {
                message: "assembly dispatched without stock clips".to_string(),
            });
        }

        let target_duration = self.muxer.probe_duration(&narration.path).await?;

        let mut slot = ctx
            .store
            .begin(ArtifactKind::AssembledVideo, &item.item_id)
            .map_err(|e| CallError::Unexpected {
                message: format!("artifact slot: {}", e),
            })?;
        // ffmpeg writes the temp file itself
        slot.detach_handle();
        let spec = MuxSpec {
            clips,
            narration: narration.path.clone(),
            target_duration,
            output: slot.temp_path().to_path_buf(),
        };
        self.muxer.assemble(&spec, ctx.cancel.clone()).await?;

        let record = slot
            .finalize(guard, Stage::Assembling.as_str())
            .map_err(|e| CallError::Unexpected {
                message: format!("assembled video finalize: {}", e),
            })?;

        info!(
            item_id = %item.item_id,
            duration_secs = target_duration.as_secs(),
            bytes = record.size_bytes,
            "video assembled"
        );
        Ok(StageOutcome::Completed(StageOutput {
            artifacts: vec![record],
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_ctx;
    use super::*;
    use crate::state::ItemSource;
    use crate::store::ItemLocks;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// Muxer that writes deterministic bytes instead of running ffmpeg.
    struct FakeMuxer;

    #[async_trait]
    impl MediaMuxer for FakeMuxer {
        async fn probe_duration(&self, _media: &Path) -> Result<Duration, CallError> {
            Ok(Duration::from_secs(45))
        }
        async fn assemble(
            &self,
            spec: &MuxSpec,
            _cancel: CancellationToken,
        ) -> Result<(), CallError> {
            std::fs::write(&spec.output, b"assembled-video-bytes").unwrap();
            Ok(())
        }
        async fn burn_captions(
            &self,
            _video: &Path,
            _subtitles: &Path,
            output: &Path,
            _cancel: CancellationToken,
        ) -> Result<(), CallError> {
            std::fs::write(output, b"captioned-video-bytes").unwrap();
            Ok(())
        }
    }

    async fn seeded_item(ctx: &super::super::StageContext, guard: &ItemLockGuard) -> Item {
        let mut item = Item::new("I1", ItemSource::AiIdeation, "t");
        let mut narration = ctx.store.begin(ArtifactKind::Narration, "I1").unwrap();
        narration.write_all(b"audio").unwrap();
        item.put_artifact(narration.finalize(guard, "narrating").unwrap());
        for n in 0..2 {
            let mut clip = ctx.store.begin(ArtifactKind::StockClip(n), "I1").unwrap();
            clip.write_all(b"clip").unwrap();
            item.put_artifact(clip.finalize(guard, "sourcing_clips").unwrap());
        }
        item
    }

    #[tokio::test]
    async fn assembles_into_final_artifact() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let locks = ItemLocks::new();
        let guard = locks.acquire("I1").await;
        let item = seeded_item(&ctx, &guard).await;

        let adapter = AssemblyAdapter::new(Arc::new(FakeMuxer));
        let StageOutcome::Completed(output) =
            adapter.execute(&ctx, &guard, &item).await.unwrap()
        else {
            panic!("expected completion");
        };

        let record = &output.artifacts[0];
        assert_eq!(record.kind, "assembled_video");
        assert!(record.path.exists());
        assert!(record
            .path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with(".mp4"));
        // No temp litter in the assembled_video dir
        let listed = ctx.store.list(&guard, ArtifactKind::AssembledVideo).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn missing_clips_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let locks = ItemLocks::new();
        let guard = locks.acquire("I1").await;
        let mut item = Item::new("I1", ItemSource::AiIdeation, "t");
        let mut narration = ctx.store.begin(ArtifactKind::Narration, "I1").unwrap();
        narration.write_all(b"audio").unwrap();
        item.put_artifact(narration.finalize(&guard, "narrating").unwrap());

        let adapter = AssemblyAdapter::new(Arc::new(FakeMuxer));
        assert!(adapter.execute(&ctx, &guard, &item).await.is_err());
    }
}
