//! Narration synthesis stage.

use super::{read_text_artifact, StageAdapter, StageContext, StageOutcome, StageOutput};
use crate::dashboard::RowPatch;
use crate::providers::SpeechSynthesizer;
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactKind, ItemLockGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Synthesizes the narration track from the script artifact.
pub struct NarrationAdapter {
    tts: Arc<dyn SpeechSynthesizer>,
}

impl NarrationAdapter {
    pub fn new(tts: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { tts }
    }
}

#[async_trait]
impl StageAdapter for NarrationAdapter {
    fn stage(&self) -> Stage {
        Stage::Narrating
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let script_record =
            item.artifact(ArtifactKind::Script)
                .ok_or_else(|| CallError::Unexpected {
                    message: "narration dispatched without a script artifact".to_string(),
                })?;
        let script = read_text_artifact(&ctx.store, guard, script_record)?;

        let seed = item.fingerprint(Stage::Narrating);
        let speech = self.tts.synthesize(&script, &seed).await?;

        let mut slot = ctx
            .store
            .begin(ArtifactKind::Narration, &item.item_id)
            .map_err(|e| CallError::Unexpected {
                message: format!("artifact slot: {}", e),
            })?;
        slot.write_all(&speech.audio)
            .map_err(|e| CallError::Unexpected {
                message: format!("narration write: {}", e),
            })?;
        let record = slot
            .finalize(guard, Stage::Narrating.as_str())
            .map_err(|e| CallError::Unexpected {
                message: format!("narration finalize: {}", e),
            })?;

        info!(
            item_id = %item.item_id,
            bytes = record.size_bytes,
            inline_timings = speech.timings.is_some(),
            "narration produced"
        );
        Ok(StageOutcome::Completed(StageOutput {
            patch: RowPatch {
                audio_path: Some(record.path.display().to_string()),
                ..Default::default()
            },
            artifacts: vec![record],
            timings: speech.timings,
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_ctx;
    use super::*;
    use crate::providers::{SynthesizedSpeech, WordTiming};
    use crate::state::ItemSource;
    use crate::store::ItemLocks;
    use tempfile::TempDir;

    struct FixedSpeech {
        with_timings: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for FixedSpeech {
        async fn synthesize(
            &self,
            _script: &str,
            _key: &str,
        ) -> Result<SynthesizedSpeech, CallError> {
            Ok(SynthesizedSpeech {
                audio: vec![0u8; 64 * 1024],
                timings: self.with_timings.then(|| {
                    vec![WordTiming {
                        word: "hello".into(),
                        start_ms: 0,
                        end_ms: 400,
                    }]
                }),
            })
        }
    }

    async fn item_with_script(
        ctx: &StageContext,
        guard: &ItemLockGuard,
    ) -> Item {
        let mut item = Item::new("I1", ItemSource::AiIdeation, "t");
        let mut slot = ctx.store.begin(ArtifactKind::Script, "I1").unwrap();
        slot.write_all(b"a script about mornings").unwrap();
        item.put_artifact(slot.finalize(guard, "scripting").unwrap());
        item
    }

    #[tokio::test]
    async fn produces_narration_and_audio_cell() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let locks = ItemLocks::new();
        let guard = locks.acquire("I1").await;
        let item = item_with_script(&ctx, &guard).await;

        let adapter = NarrationAdapter::new(Arc::new(FixedSpeech { with_timings: true }));
        let StageOutcome::Completed(output) =
            adapter.execute(&ctx, &guard, &item).await.unwrap()
        else {
            panic!("expected completion");
        };

        assert_eq!(output.artifacts[0].kind, "narration");
        assert!(output.artifacts[0].path.exists());
        assert!(output.patch.audio_path.is_some());
        assert!(output.timings.is_some());
    }

    #[tokio::test]
    async fn missing_script_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let locks = ItemLocks::new();
        let guard = locks.acquire("I1").await;
        let item = Item::new("I1", ItemSource::AiIdeation, "t");

        let adapter = NarrationAdapter::new(Arc::new(FixedSpeech { with_timings: false }));
        assert!(adapter.execute(&ctx, &guard, &item).await.is_err());
    }
}
