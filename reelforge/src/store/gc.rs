//! Artifact garbage collection.
//!
//! Terminal items past the retention window lose their artifact directories;
//! orphaned temp files (crash litter) are swept once they are clearly not
//! in-progress writes. Both passes take the per-item lock so GC can never
//! race a reset or an in-flight finalization.

use super::atomic::ArtifactStore;
use super::kind::ArtifactKind;
use super::locks::ItemLocks;
use super::StoreError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// Temp files older than this are crash litter, not in-progress writes.
pub const TEMP_ORPHAN_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// An item eligible for collection: terminal, with the instant it became so.
#[derive(Debug, Clone)]
pub struct GcCandidate {
    pub item_id: String,
    pub terminal_since: DateTime<Utc>,
}

/// Outcome of one collection pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub items_swept: usize,
    pub items_skipped_busy: usize,
    pub bytes_reclaimed: u64,
    pub temp_files_removed: usize,
}

/// Runs one garbage collection pass.
///
/// `candidates` are terminal items as reported by the state store; only
/// those older than `retention` are swept. Items whose lock is held are
/// skipped and picked up on a later pass.
pub async fn collect_garbage(
    store: &ArtifactStore,
    locks: &ItemLocks,
    candidates: &[GcCandidate],
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<GcReport, StoreError> {
    let mut report = GcReport::default();

    for candidate in candidates {
        let age = now.signed_duration_since(candidate.terminal_since);
        if age.to_std().unwrap_or_default() < retention {
            continue;
        }
        let Some(guard) = locks.try_acquire(&candidate.item_id) else {
            report.items_skipped_busy += 1;
            continue;
        };
        let bytes = store.remove_item(&guard)?;
        report.items_swept += 1;
        report.bytes_reclaimed += bytes;
    }

    report.temp_files_removed = sweep_orphan_temps(store, now)?;

    info!(
        items = report.items_swept,
        skipped = report.items_skipped_busy,
        bytes = report.bytes_reclaimed,
        temps = report.temp_files_removed,
        "garbage collection pass complete"
    );
    Ok(report)
}

/// Removes `.tmp-*` files older than [`TEMP_ORPHAN_AGE`] anywhere in the
/// store tree.
fn sweep_orphan_temps(store: &ArtifactStore, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let mut removed = 0;
    for kind_dir in ArtifactKind::all_dirs() {
        let dir = store.root().join(kind_dir);
        let Ok(items) = std::fs::read_dir(&dir) else {
            continue;
        };
        for item_entry in items.filter_map(|e| e.ok()) {
            let Ok(files) = std::fs::read_dir(item_entry.path()) else {
                continue;
            };
            for file in files.filter_map(|e| e.ok()) {
                let name = file.file_name();
                let Some(name) = name.to_str() else { continue };
                if !name.starts_with(".tmp-") {
                    continue;
                }
                let age = file
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .map(|modified| {
                        now.signed_duration_since(DateTime::<Utc>::from(modified))
                    });
                let old_enough = age
                    .and_then(|a| a.to_std().ok())
                    .map(|a| a >= TEMP_ORPHAN_AGE)
                    .unwrap_or(false);
                if old_enough {
                    match std::fs::remove_file(file.path()) {
                        Ok(()) => removed += 1,
                        Err(e) => warn!(
                            path = %file.path().display(),
                            error = %e,
                            "failed to sweep orphan temp file"
                        ),
                    }
                }
            }
        }
    }
    Ok(removed)
}
