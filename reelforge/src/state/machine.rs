//! The forward-only item state machine.
//!
//! States move forward through the production chain or sideways into
//! `retryable_error` / `failed`; the only backward move is an operator
//! `reset`. Transitions are validated here and nowhere else.

use crate::resilience::{backoff_envelope, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline stages. Ideation and trend ingest create items; approval gates
/// them; the remaining seven form the per-item production chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ideation,
    TrendIngest,
    Approval,
    Scripting,
    Narrating,
    SourcingClips,
    Assembling,
    Captioning,
    Metadata,
    Publishing,
}

/// Production stages in execution order.
pub const STAGE_ORDER: [Stage; 7] = [
    Stage::Scripting,
    Stage::Narrating,
    Stage::SourcingClips,
    Stage::Assembling,
    Stage::Captioning,
    Stage::Metadata,
    Stage::Publishing,
];

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ideation => "ideation",
            Stage::TrendIngest => "trend_ingest",
            Stage::Approval => "approval",
            Stage::Scripting => "scripting",
            Stage::Narrating => "narrating",
            Stage::SourcingClips => "sourcing_clips",
            Stage::Assembling => "assembling",
            Stage::Captioning => "captioning",
            Stage::Metadata => "metadata",
            Stage::Publishing => "publishing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ideation" => Some(Stage::Ideation),
            "trend_ingest" => Some(Stage::TrendIngest),
            "approval" => Some(Stage::Approval),
            "scripting" => Some(Stage::Scripting),
            "narrating" => Some(Stage::Narrating),
            "sourcing_clips" => Some(Stage::SourcingClips),
            "assembling" => Some(Stage::Assembling),
            "captioning" => Some(Stage::Captioning),
            "metadata" => Some(Stage::Metadata),
            "publishing" => Some(Stage::Publishing),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-item state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemState {
    PendingApproval,
    Approved,
    Scripting,
    Scripted,
    Narrating,
    Narrated,
    SourcingClips,
    ClipsSourced,
    Assembling,
    Assembled,
    Captioning,
    Captioned,
    MetadataPending,
    MetadataReady,
    Publishing,
    Published,
    Failed {
        stage: Stage,
    },
    RetryableError {
        stage: Stage,
        after_ts: DateTime<Utc>,
    },
}

impl ItemState {
    /// Position in the forward chain. Failure states inherit the position
    /// of the stage they interrupted.
    fn ordinal(&self) -> u8 {
        match self {
            ItemState::PendingApproval => 0,
            ItemState::Approved => 1,
            ItemState::Scripting => 2,
            ItemState::Scripted => 3,
            ItemState::Narrating => 4,
            ItemState::Narrated => 5,
            ItemState::SourcingClips => 6,
            ItemState::ClipsSourced => 7,
            ItemState::Assembling => 8,
            ItemState::Assembled => 9,
            ItemState::Captioning => 10,
            ItemState::Captioned => 11,
            ItemState::MetadataPending => 12,
            ItemState::MetadataReady => 13,
            ItemState::Publishing => 14,
            ItemState::Published => 15,
            ItemState::Failed { stage } | ItemState::RetryableError { stage, .. } => {
                ItemState::running(*stage).ordinal()
            }
        }
    }

    /// The in-progress state a production stage runs under.
    pub fn running(stage: Stage) -> ItemState {
        match stage {
            Stage::Scripting => ItemState::Scripting,
            Stage::Narrating => ItemState::Narrating,
            Stage::SourcingClips => ItemState::SourcingClips,
            Stage::Assembling => ItemState::Assembling,
            Stage::Captioning => ItemState::Captioning,
            Stage::Metadata => ItemState::MetadataPending,
            Stage::Publishing => ItemState::Publishing,
            // Item-creating and gating stages run outside per-item state
            Stage::Ideation | Stage::TrendIngest | Stage::Approval => ItemState::PendingApproval,
        }
    }

    /// The steady state a production stage completes into.
    pub fn completed(stage: Stage) -> ItemState {
        match stage {
            Stage::Scripting => ItemState::Scripted,
            Stage::Narrating => ItemState::Narrated,
            Stage::SourcingClips => ItemState::ClipsSourced,
            Stage::Assembling => ItemState::Assembled,
            Stage::Captioning => ItemState::Captioned,
            Stage::Metadata => ItemState::MetadataReady,
            Stage::Publishing => ItemState::Published,
            Stage::Ideation | Stage::TrendIngest => ItemState::PendingApproval,
            Stage::Approval => ItemState::Approved,
        }
    }

    /// The steady state that must already hold before a stage may run.
    pub fn ready_for(stage: Stage) -> ItemState {
        match stage {
            Stage::Scripting => ItemState::Approved,
            Stage::Narrating => ItemState::Scripted,
            Stage::SourcingClips => ItemState::Narrated,
            Stage::Assembling => ItemState::ClipsSourced,
            Stage::Captioning => ItemState::Assembled,
            Stage::Metadata => ItemState::Captioned,
            Stage::Publishing => ItemState::MetadataReady,
            Stage::Approval => ItemState::PendingApproval,
            Stage::Ideation | Stage::TrendIngest => ItemState::PendingApproval,
        }
    }

    /// Terminal states admit no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Published | ItemState::Failed { .. })
    }

    /// The stage currently responsible for this item, if any.
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            ItemState::Scripting => Some(Stage::Scripting),
            ItemState::Narrating => Some(Stage::Narrating),
            ItemState::SourcingClips => Some(Stage::SourcingClips),
            ItemState::Assembling => Some(Stage::Assembling),
            ItemState::Captioning => Some(Stage::Captioning),
            ItemState::MetadataPending => Some(Stage::Metadata),
            ItemState::Publishing => Some(Stage::Publishing),
            ItemState::RetryableError { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Dashboard status label for this state, using the row store's exact
    /// vocabulary.
    pub fn dashboard_label(&self) -> &'static str {
        match self {
            ItemState::PendingApproval => "Pending Approval",
            ItemState::Approved => "Approved",
            ItemState::Published => "Completed",
            ItemState::Failed { .. } => "Failed",
            _ => "In Progress",
        }
    }

    /// Whether `to` is a legal immediate successor of `self`.
    ///
    /// Legal moves: start the next stage, complete the running stage, drop
    /// from a running stage into `retryable_error`/`failed` for that stage,
    /// or resume a `retryable_error` back into its stage.
    pub fn can_transition(&self, to: &ItemState) -> bool {
        match (self, to) {
            // Failure exits from a running stage keep the stage identity
            (from, ItemState::Failed { stage })
            | (from, ItemState::RetryableError { stage, .. }) => {
                from.active_stage() == Some(*stage)
            }
            // Resume after a scheduled retry
            (ItemState::RetryableError { stage, .. }, to) => {
                *to == ItemState::running(*stage)
            }
            // No transitions out of terminal states
            (from, _) if from.is_terminal() => false,
            // Forward by exactly one step
            (from, to) => to.ordinal() == from.ordinal() + 1,
        }
    }

    /// Whether `to` is reachable from `self` through legal transitions.
    pub fn is_reachable(&self, to: &ItemState) -> bool {
        if self == to {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match to {
            ItemState::Failed { .. } | ItemState::RetryableError { .. } => {
                to.ordinal() >= self.ordinal()
            }
            _ => to.ordinal() > self.ordinal(),
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemState::Failed { stage } => write!(f, "failed({})", stage),
            ItemState::RetryableError { stage, .. } => write!(f, "retryable_error({})", stage),
            ItemState::PendingApproval => f.write_str("pending_approval"),
            ItemState::Approved => f.write_str("approved"),
            ItemState::Scripting => f.write_str("scripting"),
            ItemState::Scripted => f.write_str("scripted"),
            ItemState::Narrating => f.write_str("narrating"),
            ItemState::Narrated => f.write_str("narrated"),
            ItemState::SourcingClips => f.write_str("sourcing_clips"),
            ItemState::ClipsSourced => f.write_str("clips_sourced"),
            ItemState::Assembling => f.write_str("assembling"),
            ItemState::Assembled => f.write_str("assembled"),
            ItemState::Captioning => f.write_str("captioning"),
            ItemState::Captioned => f.write_str("captioned"),
            ItemState::MetadataPending => f.write_str("metadata_pending"),
            ItemState::MetadataReady => f.write_str("metadata_ready"),
            ItemState::Publishing => f.write_str("publishing"),
            ItemState::Published => f.write_str("published"),
        }
    }
}

/// Delay before an item with `attempts` failed executions may run again.
///
/// Deterministic (the jitter lives in the call layer's own retries); used
/// for `retryable_error.after_ts`.
pub fn retry_delay(attempts: u32) -> Duration {
    backoff_envelope(attempts)
}

/// Decides the next state after a stage failure.
///
/// * Non-retryable kinds fail the stage outright.
/// * `Resource` retries once, then fails.
/// * `CircuitOpen` requeues after the breaker cool-down.
/// * Every other retryable kind requeues with backoff until the stage's
///   attempt budget is spent.
pub fn classify_failure(
    kind: ErrorKind,
    stage: Stage,
    attempts: u32,
    max_attempts: u32,
    breaker_cooldown: Duration,
    now: DateTime<Utc>,
) -> ItemState {
    let failed = ItemState::Failed { stage };
    if !kind.is_retryable() {
        return failed;
    }
    let budget_spent = match kind {
        ErrorKind::Resource => attempts >= 2,
        _ => attempts >= max_attempts,
    };
    if budget_spent {
        return failed;
    }
    let delay = match kind {
        ErrorKind::CircuitOpen => breaker_cooldown,
        _ => retry_delay(attempts),
    };
    ItemState::RetryableError {
        stage,
        after_ts: now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30)),
    }
}
