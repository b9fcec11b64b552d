//! The dashboard row schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column names in dashboard order, used for header bootstrap.
pub const ROW_COLUMNS: [&str; 11] = [
    "id",
    "source",
    "title",
    "status",
    "script",
    "audio_path",
    "video_path",
    "published_url",
    "error",
    "created_at",
    "updated_at",
];

/// The status column's closed vocabulary. The labels are the row store's
/// contract; the operator reads and edits them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    #[serde(rename = "Pending Approval")]
    PendingApproval,
    #[serde(rename = "Approved")]
    Approved,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Failed")]
    Failed,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::PendingApproval => "Pending Approval",
            RowStatus::Approved => "Approved",
            RowStatus::InProgress => "In Progress",
            RowStatus::Completed => "Completed",
            RowStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Pending Approval" => Some(RowStatus::PendingApproval),
            "Approved" => Some(RowStatus::Approved),
            "In Progress" => Some(RowStatus::InProgress),
            "Completed" => Some(RowStatus::Completed),
            "Failed" => Some(RowStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashRow {
    pub id: String,
    pub source: String,
    pub title: String,
    pub status: RowStatus,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub audio_path: String,
    #[serde(default)]
    pub video_path: String,
    #[serde(default)]
    pub published_url: String,
    #[serde(default)]
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_are_exact() {
        assert_eq!(RowStatus::PendingApproval.as_str(), "Pending Approval");
        assert_eq!(RowStatus::InProgress.as_str(), "In Progress");
        assert_eq!(RowStatus::parse("Completed"), Some(RowStatus::Completed));
        assert_eq!(RowStatus::parse(" Approved "), Some(RowStatus::Approved));
        assert_eq!(RowStatus::parse("approved"), None);
        assert_eq!(RowStatus::parse("Done"), None);
    }

    #[test]
    fn status_serde_uses_labels() {
        let json = serde_json::to_string(&RowStatus::PendingApproval).unwrap();
        assert_eq!(json, r#""Pending Approval""#);
        let back: RowStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RowStatus::PendingApproval);
    }

    #[test]
    fn row_round_trips_with_defaults() {
        let json = serde_json::json!({
            "id": "I1",
            "source": "ai_ideation",
            "title": "Morning Habits",
            "status": "Approved",
            "created_at": "2025-06-01T09:00:00Z",
            "updated_at": "2025-06-01T09:00:00Z",
        });
        let row: DashRow = serde_json::from_value(json).unwrap();
        assert_eq!(row.status, RowStatus::Approved);
        assert!(row.script.is_empty());
        assert!(row.error.is_empty());
    }
}
