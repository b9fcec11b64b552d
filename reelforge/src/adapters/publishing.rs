//! Publication stage.

use super::{StageAdapter, StageContext, StageOutcome, StageOutput};
use super::metadata::PublicationMetadata;
use crate::dashboard::RowPatch;
use crate::providers::{UploadRequest, VideoPublisher};
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactKind, ItemLockGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Uploads the captioned video with its metadata. At-least-once: the
/// session-open call carries the item's idempotency key so a retried
/// publish dedupes provider-side.
pub struct PublishingAdapter {
    publisher: Arc<dyn VideoPublisher>,
}

impl PublishingAdapter {
    pub fn new(publisher: Arc<dyn VideoPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl StageAdapter for PublishingAdapter {
    fn stage(&self) -> Stage {
        Stage::Publishing
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let video = item
            .artifact(ArtifactKind::CaptionedVideo)
            .ok_or_else(|| CallError::Unexpected {
                message: "publishing dispatched without captioned video".to_string(),
            })?;
        let metadata_record = item
            .artifact(ArtifactKind::MetadataJson)
            .ok_or_else(|| CallError::Unexpected {
                message: "publishing dispatched without metadata".to_string(),
            })?;

        // Check-and-act on both inputs before the upload starts.
        ctx.store
            .verify_recorded(guard, video)
            .map_err(|e| CallError::Unexpected {
                message: format!("captioned video failed verification: {}", e),
            })?;
        let metadata_body = super::read_text_artifact(&ctx.store, guard, metadata_record)?;
        let metadata: PublicationMetadata =
            serde_json::from_str(&metadata_body).map_err(|e| CallError::Unexpected {
                message: format!("metadata artifact is malformed: {}", e),
            })?;

        let receipt = self
            .publisher
            .publish(
                &video.path,
                UploadRequest {
                    title: metadata.title,
                    description: metadata.description,
                    tags: metadata.tags,
                    category_id: metadata.category_id,
                    privacy: metadata.privacy,
                    made_for_kids: metadata.made_for_kids,
                },
                &item.fingerprint(Stage::Publishing),
                ctx.cancel.clone(),
            )
            .await?;

        info!(item_id = %item.item_id, url = %receipt.url, "item published");
        Ok(StageOutcome::Completed(StageOutput {
            patch: RowPatch {
                published_url: Some(receipt.url.clone()),
                ..Default::default()
            },
            publication_url: Some(receipt.url),
            ..Default::default()
        }))
    }
}
