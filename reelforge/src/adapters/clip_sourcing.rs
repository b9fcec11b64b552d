//! Stock footage acquisition stage.

use super::{StageAdapter, StageContext, StageOutcome, StageOutput};
use crate::providers::{ClipSearch, FileDownloader};
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactKind, ItemLockGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Searches for portrait stock clips matching the concept and downloads
/// them as indexed clip artifacts.
pub struct ClipSourcingAdapter {
    search: Arc<dyn ClipSearch>,
    downloader: Arc<FileDownloader>,
}

impl ClipSourcingAdapter {
    pub fn new(search: Arc<dyn ClipSearch>, downloader: Arc<FileDownloader>) -> Self {
        Self { search, downloader }
    }

    /// Search keywords from the concept: the leading significant words.
    fn query_for(item: &Item) -> String {
        item.concept_text
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl StageAdapter for ClipSourcingAdapter {
    fn stage(&self) -> Stage {
        Stage::SourcingClips
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let wanted = ctx.settings.clips_per_item;
        let query = Self::query_for(item);
        let candidates = self.search.search(&query, wanted * 4).await?;
        if candidates.is_empty() {
            return Err(CallError::Validation(
                crate::validate::ValidationError::Missing {
                    field: format!("portrait clips for query {:?}", query),
                },
            ));
        }

        let mut artifacts = Vec::new();
        let mut index = 0u32;
        for candidate in candidates {
            if artifacts.len() == wanted {
                break;
            }
            let mut slot = ctx
                .store
                .begin(ArtifactKind::StockClip(index), &item.item_id)
                .map_err(|e| CallError::Unexpected {
                    message: format!("artifact slot: {}", e),
                })?;
            match self
                .downloader
                .download(&candidate.url, &mut slot, ctx.cancel.clone())
                .await
            {
                Ok(bytes) if bytes > 0 => {
                    let record = slot
                        .finalize(guard, Stage::SourcingClips.as_str())
                        .map_err(|e| CallError::Unexpected {
                            message: format!("clip finalize: {}", e),
                        })?;
                    artifacts.push(record);
                    index += 1;
                }
                Ok(_) => {
                    warn!(clip = %candidate.id, "empty clip download, trying next candidate");
                }
                Err(CallError::Cancelled) => return Err(CallError::Cancelled),
                Err(e) => {
                    // One bad candidate is not a stage failure while others remain
                    warn!(clip = %candidate.id, error = %e, "clip download failed, trying next candidate");
                }
            }
        }

        if artifacts.is_empty() {
            return Err(CallError::Transient {
                message: "no stock clip candidate could be downloaded".to_string(),
            });
        }

        info!(
            item_id = %item.item_id,
            clips = artifacts.len(),
            query = %query,
            "stock clips sourced"
        );
        Ok(StageOutcome::Completed(StageOutput {
            artifacts,
            ..Default::default()
        }))
    }
}
