//! In-memory dashboard for tests and dry runs.

use super::client::{DashboardClient, DashboardError, ListFilter, NewRow, RowPatch};
use super::row::{DashRow, RowStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A row store that lives entirely in process memory.
///
/// Behaves like the HTTP adapter, including the optimistic-concurrency
/// check, so scheduler and reconciliation tests exercise the same code
/// paths as production.
#[derive(Default)]
pub struct InMemoryDashboard {
    rows: Mutex<BTreeMap<String, DashRow>>,
    next_id: AtomicU64,
    /// When true, every operation fails with a transient error. Tests flip
    /// this to simulate row store outages.
    pub fail_all: std::sync::atomic::AtomicBool,
}

impl InMemoryDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row directly, bypassing the adapter surface. Numeric `I<n>`
    /// ids advance the append counter so later appends cannot collide.
    pub fn seed(&self, row: DashRow) {
        if let Some(n) = row.id.strip_prefix('I').and_then(|s| s.parse::<u64>().ok()) {
            self.next_id.fetch_max(n, Ordering::SeqCst);
        }
        self.rows.lock().unwrap().insert(row.id.clone(), row);
    }

    /// Convenience: seed an approved idea the way the operator would.
    pub fn seed_approved(&self, id: &str, title: &str) {
        let now = Utc::now();
        self.seed(DashRow {
            id: id.to_string(),
            source: "ai_ideation".to_string(),
            title: title.to_string(),
            status: RowStatus::Approved,
            script: String::new(),
            audio_path: String::new(),
            video_path: String::new(),
            published_url: String::new(),
            error: String::new(),
            created_at: now,
            updated_at: now,
        });
    }

    pub fn row(&self, id: &str) -> Option<DashRow> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), DashboardError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(DashboardError::Call(
                crate::resilience::CallError::Transient {
                    message: "row store unavailable".to_string(),
                },
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DashboardClient for InMemoryDashboard {
    async fn list_items(&self, filter: ListFilter) -> Result<Vec<DashRow>, DashboardError> {
        self.check_available()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn append_item(&self, row: NewRow) -> Result<String, DashboardError> {
        self.check_available()?;
        crate::validate::check_cell(&row.title, "title")?;
        let id = format!("I{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let now = Utc::now();
        self.seed(DashRow {
            id: id.clone(),
            source: row.source,
            title: row.title,
            status: row.status,
            script: String::new(),
            audio_path: String::new(),
            video_path: String::new(),
            published_url: String::new(),
            error: String::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_fields(
        &self,
        item_id: &str,
        patch: RowPatch,
        expected_status: Option<RowStatus>,
    ) -> Result<(), DashboardError> {
        self.check_available()?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(item_id)
            .ok_or_else(|| DashboardError::NotFound(item_id.to_string()))?;

        if let Some(expected) = expected_status {
            if row.status != expected {
                return Err(DashboardError::Stale {
                    item_id: item_id.to_string(),
                    expected,
                    actual: row.status,
                });
            }
        }

        if let Some(status) = patch.status {
            row.status = status;
        }
        if let Some(script) = patch.script {
            row.script = script;
        }
        if let Some(audio_path) = patch.audio_path {
            row.audio_path = audio_path;
        }
        if let Some(video_path) = patch.video_path {
            row.video_path = video_path;
        }
        if let Some(published_url) = patch.published_url {
            row.published_url = published_url;
        }
        if let Some(error) = patch.error {
            row.error = crate::telemetry::redact_text(&error);
        }
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<DashRow, DashboardError> {
        self.check_available()?;
        self.row(item_id)
            .ok_or_else(|| DashboardError::NotFound(item_id.to_string()))
    }

    async fn ensure_headers(&self) -> Result<(), DashboardError> {
        self.check_available()
    }
}
