//! Publication metadata synthesis stage.

use super::{read_text_artifact, StageAdapter, StageContext, StageOutcome, StageOutput};
use crate::providers::TextGenerator;
use crate::resilience::CallError;
use crate::state::{Item, Stage};
use crate::store::{ArtifactKind, ItemLockGuard};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Publication service limits.
const MAX_TITLE_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 5_000;
const MAX_TAGS_LEN: usize = 500;

/// The metadata artifact's JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy: String,
    pub made_for_kids: bool,
}

/// Generates title, description, and tags, clamps them to the publication
/// service's limits, and writes the metadata artifact.
pub struct MetadataAdapter {
    textgen: Arc<dyn TextGenerator>,
}

impl MetadataAdapter {
    pub fn new(textgen: Arc<dyn TextGenerator>) -> Self {
        Self { textgen }
    }
}

/// Truncates on a char boundary.
fn clamp(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Applies limits and guarantees the `#Shorts` tag is present.
pub(crate) fn shape_metadata(
    draft: crate::providers::MetadataDraft,
    publish: &crate::config::PublishSettings,
) -> PublicationMetadata {
    let mut tags: Vec<String> = draft
        .tags
        .into_iter()
        .map(|t| t.trim().trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if !tags.iter().any(|t| t.eq_ignore_ascii_case("shorts")) {
        tags.insert(0, "Shorts".to_string());
    }
    // Keep tags within the joined-length budget
    let mut joined = 0usize;
    tags.retain(|tag| {
        joined += tag.len() + 1;
        joined <= MAX_TAGS_LEN
    });

    PublicationMetadata {
        title: clamp(draft.title.trim(), MAX_TITLE_LEN),
        description: clamp(draft.description.trim(), MAX_DESCRIPTION_LEN),
        tags,
        category_id: publish.category_id.clone(),
        privacy: publish.privacy.clone(),
        made_for_kids: publish.made_for_kids,
    }
}

#[async_trait]
impl StageAdapter for MetadataAdapter {
    fn stage(&self) -> Stage {
        Stage::Metadata
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        guard: &ItemLockGuard,
        item: &Item,
    ) -> Result<StageOutcome, CallError> {
        let script_record = item
            .artifact(ArtifactKind::Script)
            .ok_or_else(|| CallError::Unexpected {
                message: "metadata dispatched without a script".to_string(),
            })?;
        let script = read_text_artifact(&ctx.store, guard, script_record)?;

        let draft = self
            .textgen
            .generate_metadata(
                &item.concept_text,
                &script,
                &item.fingerprint(Stage::Metadata),
            )
            .await?;
        let metadata = shape_metadata(draft, &ctx.settings.publish);

        let body = serde_json::to_vec_pretty(&metadata).map_err(|e| CallError::Unexpected {
            message: format!("metadata serialization: {}", e),
        })?;
        let mut slot = ctx
            .store
            .begin(ArtifactKind::MetadataJson, &item.item_id)
            .map_err(|e| CallError::Unexpected {
                message: format!("artifact slot: {}", e),
            })?;
        slot.write_all(&body).map_err(|e| CallError::Unexpected {
            message: format!("metadata write: {}", e),
        })?;
        let record = slot
            .finalize(guard, Stage::Metadata.as_str())
            .map_err(|e| CallError::Unexpected {
                message: format!("metadata finalize: {}", e),
            })?;

        info!(item_id = %item.item_id, title = %metadata.title, "metadata synthesized");
        Ok(StageOutcome::Completed(StageOutput {
            artifacts: vec![record],
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublishSettings;
    use crate::providers::MetadataDraft;

    fn draft(title: &str, description: &str, tags: &[&str]) -> MetadataDraft {
        MetadataDraft {
            title: title.to_string(),
            description: description.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn shorts_tag_is_always_present() {
        let shaped = shape_metadata(
            draft("t", "d", &["morning", "habits"]),
            &PublishSettings::default(),
        );
        assert!(shaped.tags.iter().any(|t| t == "Shorts"));
    }

    #[test]
    fn existing_shorts_tag_is_not_duplicated() {
        let shaped = shape_metadata(
            draft("t", "d", &["#shorts", "habits"]),
            &PublishSettings::default(),
        );
        let count = shaped
            .tags
            .iter()
            .filter(|t| t.eq_ignore_ascii_case("shorts"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn limits_are_enforced() {
        let long_title = "x".repeat(500);
        let long_description = "y".repeat(20_000);
        let many_tags: Vec<String> = (0..200).map(|i| format!("tag{:03}", i)).collect();
        let many_tags: Vec<&str> = many_tags.iter().map(String::as_str).collect();

        let shaped = shape_metadata(
            draft(&long_title, &long_description, &many_tags),
            &PublishSettings::default(),
        );
        assert_eq!(shaped.title.len(), 100);
        assert_eq!(shaped.description.len(), 5_000);
        let joined: usize = shaped.tags.iter().map(|t| t.len() + 1).sum();
        assert!(joined <= 500);
    }

    #[test]
    fn publish_settings_flow_through() {
        let publish = PublishSettings {
            category_id: "27".into(),
            privacy: "unlisted".into(),
            made_for_kids: true,
        };
        let shaped = shape_metadata(draft("t", "d", &[]), &publish);
        assert_eq!(shaped.category_id, "27");
        assert_eq!(shaped.privacy, "unlisted");
        assert!(shaped.made_for_kids);
    }
}
