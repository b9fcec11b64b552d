//! Atomic artifact store.
//!
//! Every file a stage produces goes through this module. The discipline is
//! rename-into-place: content is written to a nonce-named temp file in the
//! destination directory, fsynced, hashed, and only then renamed to its
//! final content-addressed name. A partial file can never appear under a
//! final name, and a crash leaves only `.tmp-*` litter that GC sweeps.
//!
//! Callers never test for existence and then act; the store exposes
//! check-and-act operations that require the per-item lock guard, which
//! makes the lock requirement part of the signature.

mod atomic;
mod gc;
mod kind;
mod locks;
mod record;

pub use atomic::{ArtifactSlot, ArtifactStore};
pub use gc::{collect_garbage, GcCandidate, GcReport, TEMP_ORPHAN_AGE};
pub use kind::ArtifactKind;
pub use locks::{ItemLockGuard, ItemLocks};
pub use record::{hash_file, ArtifactRecord};

use thiserror::Error;

/// Failures inside the artifact store. These surface to the pipeline as the
/// `resource` error kind.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O failure during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Two writers produced the same final name with different content.
    /// Final names embed the content hash, so this is a bug, not a race.
    #[error("hash mismatch at {path}: expected {expected}, found {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A recorded artifact is missing or does not match its record.
    #[error("artifact verification failed for {path}: {reason}")]
    VerifyFailed { path: String, reason: String },

    #[error(transparent)]
    Validation(#[from] crate::validate::ValidationError),
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}
