//! Script synthesis stage.

use super::{StageAdapter, StageContext, StageOutcome, StageOutput};
use crate::dashboard::RowPatch;
use crate::providers::TextGenerator;
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactKind, ItemLockGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Turns the approved concept into a narration script artifact.
pub struct ScriptingAdapter {
    textgen: Arc<dyn TextGenerator>,
}

impl ScriptingAdapter {
    pub fn new(textgen: Arc<dyn TextGenerator>) -> Self {
        Self { textgen }
    }
}

#[async_trait]
impl StageAdapter for ScriptingAdapter {
    fn stage(&self) -> Stage {
        Stage::Scripting
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let seed = item.fingerprint(Stage::Scripting);
        let script = self
            .textgen
            .generate_script(&item.concept_text, &seed)
            .await?;

        let mut slot = ctx
            .store
            .begin(ArtifactKind::Script, &item.item_id)
            .map_err(|e| CallError::Unexpected {
                message: format!("artifact slot: {}", e),
            })?;
        slot.write_all(script.as_bytes())
            .map_err(|e| CallError::Unexpected {
                message: format!("script write: {}", e),
            })?;
        let record = slot
            .finalize(guard, Stage::Scripting.as_str())
            .map_err(|e| CallError::Unexpected {
                message: format!("script finalize: {}", e),
            })?;

        info!(
            item_id = %item.item_id,
            words = script.split(' ').count(),
            "script produced"
        );
        Ok(StageOutcome::Completed(StageOutput {
            artifacts: vec![record],
            patch: RowPatch {
                script: Some(script),
                ..Default::default()
            },
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_ctx;
    use super::*;
    use crate::providers::MetadataDraft;
    use crate::state::ItemSource;
    use crate::store::ItemLocks;
    use tempfile::TempDir;

    struct FixedScript(String);

    #[async_trait]
    impl TextGenerator for FixedScript {
        async fn generate_ideas(&self, _count: usize) -> Result<Vec<String>, CallError> {
            unimplemented!("not used")
        }
        async fn generate_script(&self, _title: &str, _key: &str) -> Result<String, CallError> {
            Ok(self.0.clone())
        }
        async fn generate_metadata(
            &self,
            _title: &str,
            _script: &str,
            _key: &str,
        ) -> Result<MetadataDraft, CallError> {
            unimplemented!("not used")
        }
    }

    #[tokio::test]
    async fn produces_script_artifact_and_cell() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let locks = ItemLocks::new();
        let guard = locks.acquire("I1").await;
        let item = Item::new("I1", ItemSource::AiIdeation, "Three Morning Habits");

        let script = "sentence ".repeat(160).trim().to_string();
        let adapter = ScriptingAdapter::new(Arc::new(FixedScript(script.clone())));
        let outcome = adapter.execute(&ctx, &guard, &item).await.unwrap();

        let StageOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output.artifacts.len(), 1);
        let record = &output.artifacts[0];
        assert_eq!(record.kind, "script");
        assert!(record.path.exists());
        assert_eq!(output.patch.script.as_deref(), Some(script.as_str()));
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        struct Failing;
        #[async_trait]
        impl TextGenerator for Failing {
            async fn generate_ideas(&self, _count: usize) -> Result<Vec<String>, CallError> {
                unimplemented!()
            }
            async fn generate_script(&self, _t: &str, _k: &str) -> Result<String, CallError> {
                Err(CallError::Client {
                    status: 400,
                    message: "invalid prompt".into(),
                })
            }
            async fn generate_metadata(
                &self,
                _t: &str,
                _s: &str,
                _k: &str,
            ) -> Result<MetadataDraft, CallError> {
                unimplemented!()
            }
        }

        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir);
        let locks = ItemLocks::new();
        let guard = locks.acquire("I1").await;
        let item = Item::new("I1", ItemSource::AiIdeation, "t");

        let err = ScriptingAdapter::new(Arc::new(Failing))
            .execute(&ctx, &guard, &item)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Client { status: 400, .. }));
    }
}
