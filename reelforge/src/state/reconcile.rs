//! Startup reconciliation.
//!
//! After a crash the three copies of truth can disagree: on-disk artifacts,
//! the local state file, and the dashboard row. The rules here restore the
//! commit invariant before any discovery runs:
//!
//! * A state is only kept if every artifact it implies verifies on disk;
//!   otherwise the item falls back to the deepest supportable state and the
//!   interrupted attempt re-runs.
//! * The dashboard is then brought up to date from local state (the local
//!   store is written before the dashboard in the commit order, so local is
//!   ahead or equal, never behind - except for operator approval edits,
//!   which flow the other way).
//! * Dashboard rows with no local record are adopted when they are still
//!   awaiting or entering production.

use super::db::{StateDb, StateError};
use super::item::{Item, ItemSource};
use super::machine::ItemState;
use crate::dashboard::{DashboardClient, DashboardError, ListFilter, RowPatch, RowStatus};
use crate::store::{ArtifactKind, ItemLocks};
use tracing::{info, warn};

/// Outcome of a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Items whose state fell back because artifacts were missing.
    pub local_regressed: usize,
    /// Items advanced by an operator approval edit.
    pub local_advanced: usize,
    /// Rows rewritten to agree with local state.
    pub dashboard_repaired: usize,
    /// Dashboard rows adopted into the local store.
    pub rows_adopted: usize,
    /// Rows we could not reconcile (store unreachable, unknown shape).
    pub rows_skipped: usize,
}

/// The deepest steady state the item's verified artifacts support.
fn supported_state(item: &mut Item) -> ItemState {
    // Drop records that no longer verify; invariant 3 says a reference
    // either matches the file or is absent.
    let broken: Vec<String> = item
        .artifacts
        .iter()
        .filter(|(_, record)| record.verify().is_err())
        .map(|(key, _)| key.clone())
        .collect();
    for key in &broken {
        warn!(item_id = %item.item_id, artifact = %key, "dropping unverifiable artifact reference");
        item.artifacts.remove(key);
    }

    let mut supported = ItemState::Approved;
    let ladder = [
        (ItemState::Scripted, item.artifact(ArtifactKind::Script).is_some()),
        (ItemState::Narrated, item.artifact(ArtifactKind::Narration).is_some()),
        (ItemState::ClipsSourced, !item.stock_clips().is_empty()),
        (ItemState::Assembled, item.artifact(ArtifactKind::AssembledVideo).is_some()),
        (ItemState::Captioned, item.artifact(ArtifactKind::CaptionedVideo).is_some()),
        (ItemState::MetadataReady, item.artifact(ArtifactKind::MetadataJson).is_some()),
        (ItemState::Published, item.publication_url.is_some()),
    ];
    for (state, achieved) in ladder {
        if achieved {
            supported = state;
        } else {
            break;
        }
    }
    supported
}

/// Repairs one local item against its artifacts. Returns true when the
/// state regressed.
///
/// A steady state claims all artifacts up to itself; a running or
/// retryable state claims only its stage's prerequisites (it may re-run
/// in place, keeping any scheduled retry delay).
fn repair_local(item: &mut Item) -> bool {
    match item.state.clone() {
        // Pre-production and failed items have nothing to verify against
        ItemState::PendingApproval | ItemState::Approved | ItemState::Failed { .. } => false,
        state => {
            let supported = supported_state(item);
            let claim = match state.active_stage() {
                Some(stage) => ItemState::ready_for(stage),
                None => state.clone(),
            };
            if supported != claim && supported.is_reachable(&claim) {
                info!(
                    item_id = %item.item_id,
                    claimed = %state,
                    supported = %supported,
                    "state regressed to match artifacts; interrupted attempt will re-run"
                );
                item.state = supported;
                item.touch();
                return true;
            }
            false
        }
    }
}

/// Runs reconciliation over the local store and the dashboard.
pub async fn reconcile(
    db: &StateDb,
    dashboard: &dyn DashboardClient,
    locks: &ItemLocks,
) -> Result<ReconcileReport, StateError> {
    let mut report = ReconcileReport::default();

    // Pass 1: local items against artifacts and their dashboard rows.
    for snapshot in db.list() {
        report.checked += 1;
        let guard = locks.acquire(&snapshot.item_id).await;
        let Some(mut item) = db.get(&snapshot.item_id) else {
            continue;
        };

        if repair_local(&mut item) {
            report.local_regressed += 1;
            db.commit(&guard, &item)?;
        }

        let row = match dashboard.get_item(&item.item_id).await {
            Ok(row) => row,
            Err(DashboardError::NotFound(_)) => {
                warn!(item_id = %item.item_id, "local item has no dashboard row");
                report.rows_skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(item_id = %item.item_id, error = %e, "dashboard unreachable during reconcile");
                report.rows_skipped += 1;
                continue;
            }
        };

        // Operator approval is the one edit that flows dashboard -> local.
        if row.status == RowStatus::Approved && item.state == ItemState::PendingApproval {
            item.state = ItemState::Approved;
            item.touch();
            db.commit(&guard, &item)?;
            report.local_advanced += 1;
        }

        let wanted = item.state.dashboard_label();
        if row.status.as_str() != wanted {
            let patch = patch_from_item(&item);
            match dashboard.update_fields(&item.item_id, patch, None).await {
                Ok(()) => {
                    info!(
                        item_id = %item.item_id,
                        from = row.status.as_str(),
                        to = wanted,
                        "dashboard row repaired"
                    );
                    report.dashboard_repaired += 1;
                }
                Err(e) => {
                    warn!(item_id = %item.item_id, error = %e, "failed to repair dashboard row");
                    report.rows_skipped += 1;
                }
            }
        }
    }

    // Pass 2: adopt dashboard rows the local store has never seen.
    match dashboard.list_items(ListFilter::default()).await {
        Ok(rows) => {
            for row in rows {
                if db.get(&row.id).is_some() {
                    continue;
                }
                match row.status {
                    RowStatus::PendingApproval | RowStatus::Approved => {
                        let guard = locks.acquire(&row.id).await;
                        let source = ItemSource::parse(&row.source)
                            .unwrap_or(ItemSource::AiIdeation);
                        let mut item = Item::new(row.id.clone(), source, row.title.clone());
                        if row.status == RowStatus::Approved {
                            item.state = ItemState::Approved;
                        }
                        db.commit(&guard, &item)?;
                        report.rows_adopted += 1;
                    }
                    _ => {
                        warn!(
                            item_id = %row.id,
                            status = row.status.as_str(),
                            "ignoring dashboard row with no local history"
                        );
                        report.rows_skipped += 1;
                    }
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "dashboard listing failed during reconcile");
            report.rows_skipped += 1;
        }
    }

    info!(
        checked = report.checked,
        regressed = report.local_regressed,
        advanced = report.local_advanced,
        repaired = report.dashboard_repaired,
        adopted = report.rows_adopted,
        "reconciliation complete"
    );
    Ok(report)
}

/// Row fields derived from an item's current state.
fn patch_from_item(item: &Item) -> RowPatch {
    let status = RowStatus::parse(item.state.dashboard_label());
    RowPatch {
        status,
        audio_path: item
            .artifact(ArtifactKind::Narration)
            .map(|r| r.path.display().to_string()),
        video_path: item
            .artifact(ArtifactKind::CaptionedVideo)
            .or_else(|| item.artifact(ArtifactKind::AssembledVideo))
            .map(|r| r.path.display().to_string()),
        published_url: item.publication_url.clone(),
        error: item.error.as_ref().map(|e| format!("{}: {}", e.kind, e.message)),
        ..Default::default()
    }
}
