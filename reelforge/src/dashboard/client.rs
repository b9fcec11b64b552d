//! The dashboard client contract.

use super::row::{DashRow, RowStatus};
use crate::resilience::CallError;
use crate::validate::ValidationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Dashboard adapter failures.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Optimistic concurrency check failed: the row's status changed under
    /// us (usually an operator edit). The caller re-reads and reconciles.
    #[error("row {item_id} is stale: status is {actual}, expected {expected}")]
    Stale {
        item_id: String,
        expected: RowStatus,
        actual: RowStatus,
    },

    #[error("row {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("row store returned malformed data: {0}")]
    Malformed(String),
}

/// Filter for [`DashboardClient::list_items`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<RowStatus>,
    pub updated_since: Option<DateTime<Utc>>,
}

impl ListFilter {
    pub fn status(status: RowStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether a row passes the filter.
    pub fn matches(&self, row: &DashRow) -> bool {
        if let Some(status) = self.status {
            if row.status != status {
                return false;
            }
        }
        if let Some(since) = self.updated_since {
            if row.updated_at < since {
                return false;
            }
        }
        true
    }
}

/// Fields for a newly appended row; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRow {
    pub source: String,
    pub title: String,
    pub status: RowStatus,
}

/// A partial row update. `None` fields are left untouched; `updated_at` is
/// always set by the adapter.
#[derive(Debug, Clone, Default)]
pub struct RowPatch {
    pub status: Option<RowStatus>,
    pub script: Option<String>,
    pub audio_path: Option<String>,
    pub video_path: Option<String>,
    pub published_url: Option<String>,
    pub error: Option<String>,
}

impl RowPatch {
    pub fn status(status: RowStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.script.is_none()
            && self.audio_path.is_none()
            && self.video_path.is_none()
            && self.published_url.is_none()
            && self.error.is_none()
    }
}

/// Operations the pipeline needs from the external row store.
///
/// Implementations absorb the store's rate limits through the resilient
/// call layer and never surface raw transport errors.
#[async_trait]
pub trait DashboardClient: Send + Sync {
    /// Rows matching the filter.
    async fn list_items(&self, filter: ListFilter) -> Result<Vec<DashRow>, DashboardError>;

    /// Appends a row; returns the store-assigned id.
    async fn append_item(&self, row: NewRow) -> Result<String, DashboardError>;

    /// Applies a patch, guarded by the row's current status when
    /// `expected_status` is set.
    async fn update_fields(
        &self,
        item_id: &str,
        patch: RowPatch,
        expected_status: Option<RowStatus>,
    ) -> Result<(), DashboardError>;

    /// Reads one row.
    async fn get_item(&self, item_id: &str) -> Result<DashRow, DashboardError>;

    /// Creates the header row on an empty table; a no-op when present.
    async fn ensure_headers(&self) -> Result<(), DashboardError>;
}
