//! The stage registry: the single source of truth for the workflow graph.
//!
//! Each stage declares its inputs, outputs, attempt budget, operation
//! class, and sizing as data. Given an item's state and artifacts, the
//! registry resolves the unique next-eligible stage; nothing else in the
//! system encodes stage ordering.

use crate::resilience::OperationClass;
use crate::state::{Item, ItemState, Stage};
use crate::store::ArtifactKind;
use chrono::{DateTime, Utc};

/// Rough runtime expectation, used to size and separate worker pools so a
/// long media job never starves the cheap text stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationBucket {
    /// Sub-minute API calls.
    Short,
    /// Generation calls and downloads, a few minutes at worst.
    Medium,
    /// Child-process media work and large uploads.
    Long,
}

/// Declarative description of one stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage: Stage,
    /// Artifact kinds that must exist and verify before dispatch.
    pub required_inputs: &'static [ArtifactKind],
    /// Artifact kinds the stage produces.
    pub produces: &'static [ArtifactKind],
    pub max_attempts: u32,
    pub operation_class: OperationClass,
    pub duration_bucket: DurationBucket,
    /// Default worker pool size; overridable from the environment.
    pub workers: usize,
}

impl StageSpec {
    /// Precondition over the item: correct state and verified inputs.
    pub fn is_ready(&self, item: &Item, now: DateTime<Utc>) -> bool {
        let state_ok = match &item.state {
            state if *state == ItemState::ready_for(self.stage) => true,
            // Crash-resume: a stage may re-run from its own running state
            state if *state == ItemState::running(self.stage) => true,
            ItemState::RetryableError { stage, after_ts } => {
                *stage == self.stage && *after_ts <= now
            }
            _ => false,
        };
        if !state_ok {
            return false;
        }
        self.required_inputs.iter().all(|kind| {
            item.artifact(*kind)
                .map(|record| record.verify().is_ok())
                .unwrap_or(false)
        })
    }

    /// Stable provider-side idempotency seed for this stage of an item.
    pub fn idempotency_seed(&self, item: &Item) -> String {
        item.fingerprint(self.stage)
    }
}

/// The static stage table.
///
/// Worker-pool asymmetry mirrors where the time goes: text stages are
/// rate-limit-bound and parallelize well, media stages are CPU-bound and
/// run nearly alone, publishing is serialized to keep upload quota
/// predictable.
pub static STAGES: &[StageSpec] = &[
    StageSpec {
        stage: Stage::Ideation,
        required_inputs: &[],
        produces: &[],
        max_attempts: 2,
        operation_class: OperationClass::Generation,
        duration_bucket: DurationBucket::Short,
        workers: 1,
    },
    StageSpec {
        stage: Stage::TrendIngest,
        required_inputs: &[],
        produces: &[],
        max_attempts: 2,
        operation_class: OperationClass::Api,
        duration_bucket: DurationBucket::Short,
        workers: 1,
    },
    StageSpec {
        stage: Stage::Approval,
        required_inputs: &[],
        produces: &[],
        max_attempts: 3,
        operation_class: OperationClass::Api,
        duration_bucket: DurationBucket::Short,
        workers: 4,
    },
    StageSpec {
        stage: Stage::Scripting,
        required_inputs: &[],
        produces: &[ArtifactKind::Script],
        max_attempts: 3,
        operation_class: OperationClass::Generation,
        duration_bucket: DurationBucket::Short,
        workers: 4,
    },
    StageSpec {
        stage: Stage::Narrating,
        required_inputs: &[ArtifactKind::Script],
        produces: &[ArtifactKind::Narration],
        max_attempts: 3,
        operation_class: OperationClass::Generation,
        duration_bucket: DurationBucket::Medium,
        workers: 2,
    },
    StageSpec {
        stage: Stage::SourcingClips,
        required_inputs: &[ArtifactKind::Script],
        produces: &[
            ArtifactKind::StockClip(0),
            ArtifactKind::StockClip(1),
            ArtifactKind::StockClip(2),
        ],
        max_attempts: 3,
        operation_class: OperationClass::Search,
        duration_bucket: DurationBucket::Medium,
        workers: 2,
    },
    StageSpec {
        stage: Stage::Assembling,
        required_inputs: &[ArtifactKind::Narration, ArtifactKind::StockClip(0)],
        produces: &[ArtifactKind::AssembledVideo],
        max_attempts: 2,
        operation_class: OperationClass::Stream,
        duration_bucket: DurationBucket::Long,
        workers: 1,
    },
    StageSpec {
        stage: Stage::Captioning,
        required_inputs: &[ArtifactKind::Narration, ArtifactKind::AssembledVideo],
        produces: &[ArtifactKind::CaptionedVideo],
        max_attempts: 2,
        operation_class: OperationClass::Stream,
        duration_bucket: DurationBucket::Long,
        workers: 1,
    },
    StageSpec {
        stage: Stage::Metadata,
        required_inputs: &[ArtifactKind::Script],
        produces: &[ArtifactKind::MetadataJson],
        max_attempts: 3,
        operation_class: OperationClass::Generation,
        duration_bucket: DurationBucket::Short,
        workers: 4,
    },
    StageSpec {
        stage: Stage::Publishing,
        required_inputs: &[ArtifactKind::CaptionedVideo, ArtifactKind::MetadataJson],
        produces: &[],
        max_attempts: 2,
        operation_class: OperationClass::Auth,
        duration_bucket: DurationBucket::Long,
        workers: 1,
    },
];

/// Looks up a stage's spec.
pub fn spec(stage: Stage) -> &'static StageSpec {
    STAGES
        .iter()
        .find(|s| s.stage == stage)
        .expect("every stage is in the registry table")
}

/// Resolves the unique next-eligible stage for an item, or `None` when the
/// item is terminal, waiting on its retry delay, or awaiting the operator.
pub fn next_stage(item: &Item, now: DateTime<Utc>) -> Option<Stage> {
    let candidate = match &item.state {
        ItemState::PendingApproval => Some(Stage::Approval),
        ItemState::Approved => Some(Stage::Scripting),
        ItemState::Scripted => Some(Stage::Narrating),
        ItemState::Narrated => Some(Stage::SourcingClips),
        ItemState::ClipsSourced => Some(Stage::Assembling),
        ItemState::Assembled => Some(Stage::Captioning),
        ItemState::Captioned => Some(Stage::Metadata),
        ItemState::MetadataReady => Some(Stage::Publishing),
        // Crash-resume: a running state with no worker re-runs its stage
        ItemState::Scripting => Some(Stage::Scripting),
        ItemState::Narrating => Some(Stage::Narrating),
        ItemState::SourcingClips => Some(Stage::SourcingClips),
        ItemState::Assembling => Some(Stage::Assembling),
        ItemState::Captioning => Some(Stage::Captioning),
        ItemState::MetadataPending => Some(Stage::Metadata),
        ItemState::Publishing => Some(Stage::Publishing),
        ItemState::RetryableError { stage, after_ts } if *after_ts <= now => Some(*stage),
        ItemState::RetryableError { .. } => None,
        ItemState::Published | ItemState::Failed { .. } => None,
    }?;
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ItemSource;

    fn item_in(state: ItemState) -> Item {
        let mut item = Item::new("I1", ItemSource::AiIdeation, "t");
        item.state = state;
        item
    }

    #[test]
    fn every_stage_has_a_spec() {
        for stage in [
            Stage::Ideation,
            Stage::TrendIngest,
            Stage::Approval,
            Stage::Scripting,
            Stage::Narrating,
            Stage::SourcingClips,
            Stage::Assembling,
            Stage::Captioning,
            Stage::Metadata,
            Stage::Publishing,
        ] {
            assert_eq!(spec(stage).stage, stage);
        }
    }

    #[test]
    fn worker_pool_defaults_match_the_plan() {
        assert_eq!(spec(Stage::Scripting).workers, 4);
        assert_eq!(spec(Stage::Narrating).workers, 2);
        assert_eq!(spec(Stage::SourcingClips).workers, 2);
        assert_eq!(spec(Stage::Assembling).workers, 1);
        assert_eq!(spec(Stage::Captioning).workers, 1);
        assert_eq!(spec(Stage::Metadata).workers, 4);
        assert_eq!(spec(Stage::Publishing).workers, 1);
    }

    #[test]
    fn next_stage_walks_the_chain() {
        let now = Utc::now();
        assert_eq!(next_stage(&item_in(ItemState::Approved), now), Some(Stage::Scripting));
        assert_eq!(next_stage(&item_in(ItemState::Scripted), now), Some(Stage::Narrating));
        assert_eq!(next_stage(&item_in(ItemState::Narrated), now), Some(Stage::SourcingClips));
        assert_eq!(next_stage(&item_in(ItemState::MetadataReady), now), Some(Stage::Publishing));
        assert_eq!(next_stage(&item_in(ItemState::Published), now), None);
    }

    #[test]
    fn running_states_resume_their_stage() {
        let now = Utc::now();
        assert_eq!(next_stage(&item_in(ItemState::Narrating), now), Some(Stage::Narrating));
        assert_eq!(
            next_stage(&item_in(ItemState::MetadataPending), now),
            Some(Stage::Metadata)
        );
    }

    #[test]
    fn retryable_waits_for_its_delay() {
        let now = Utc::now();
        let waiting = item_in(ItemState::RetryableError {
            stage: Stage::Narrating,
            after_ts: now + chrono::Duration::seconds(60),
        });
        assert_eq!(next_stage(&waiting, now), None);

        let due = item_in(ItemState::RetryableError {
            stage: Stage::Narrating,
            after_ts: now - chrono::Duration::seconds(1),
        });
        assert_eq!(next_stage(&due, now), Some(Stage::Narrating));
    }

    #[test]
    fn readiness_requires_verified_inputs() {
        let now = Utc::now();
        let item = item_in(ItemState::Scripted);
        // Narration needs the script artifact, which does not exist on disk
        assert!(!spec(Stage::Narrating).is_ready(&item, now));
        // Scripting has no required inputs and the state matches nothing here
        assert!(!spec(Stage::Scripting).is_ready(&item, now));
    }

    #[test]
    fn failed_items_have_no_next_stage() {
        let item = item_in(ItemState::Failed { stage: Stage::Scripting });
        assert_eq!(next_stage(&item, Utc::now()), None);
    }
}
