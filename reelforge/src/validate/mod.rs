//! Input validation for every trust boundary.
//!
//! All data entering the pipeline from outside - dashboard cells, environment
//! variables, CLI arguments, and external API responses - passes through the
//! rule-based validators in this module before any other component sees it.
//! There is deliberately no generic string-to-code evaluation anywhere in the
//! crate; the `safe_*` coercers here are the only way external text becomes
//! typed values.

mod coerce;
mod path;
mod text;

pub use coerce::{safe_bool, safe_enum, safe_float, safe_int};
pub use path::safe_path_under;
pub use text::{
    check_allowed_keys, check_cell, check_filename, check_text, sanitize_cell, MAX_CELL_LEN,
};

use thiserror::Error;

/// A validation failure on externally supplied data.
///
/// Carries the offending field name so the failure can be surfaced to the
/// dashboard error column without echoing the rejected value itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Value contains a pattern that is never allowed to cross the boundary.
    #[error("dangerous pattern in {field}: {reason}")]
    DangerousPattern { field: String, reason: String },

    /// Value exceeds the declared length limit.
    #[error("{field} exceeds maximum length {max}")]
    TooLong { field: String, max: usize },

    /// Value is not in the allowed set.
    #[error("{field} is not one of the allowed values")]
    NotAllowed { field: String },

    /// Path escapes the required root after resolution.
    #[error("path escapes {root}: {path}")]
    PathEscape { root: String, path: String },

    /// JSON payload carries keys outside the declared schema.
    #[error("unexpected key in {context}: {key}")]
    UnexpectedKey { context: String, key: String },

    /// Value is missing or empty where required.
    #[error("{field} is required")]
    Missing { field: String },
}

impl ValidationError {
    /// Field or context the failure is attached to.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::DangerousPattern { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::NotAllowed { field }
            | ValidationError::Missing { field } => field,
            ValidationError::PathEscape { path, .. } => path,
            ValidationError::UnexpectedKey { context, .. } => context,
        }
    }
}
