//! The artifact store and its rename-into-place write path.

use super::kind::ArtifactKind;
use super::locks::ItemLockGuard;
use super::record::{hash_file, ArtifactRecord};
use super::StoreError;
use crate::validate;
use chrono::Utc;
use rand::Rng;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Length of the content-hash prefix embedded in final filenames.
const HASH_PREFIX_LEN: usize = 12;

/// Rooted artifact tree: `<root>/<kind>/<item_id>/<timestamp>-<hash>.<ext>`.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens (and creates) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::io(format!("create {}", root.display()), e))?;
        for dir in ArtifactKind::all_dirs() {
            fs::create_dir_all(root.join(dir))
                .map_err(|e| StoreError::io(format!("create kind dir {}", dir), e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one item's artifacts of one kind.
    pub fn item_dir(&self, kind: ArtifactKind, item_id: &str) -> Result<PathBuf, StoreError> {
        validate::check_filename(item_id, "item_id")?;
        Ok(self.root.join(kind.dir_name()).join(item_id))
    }

    /// Begins an artifact write, returning the scoped slot.
    ///
    /// The temp file lives in the destination directory so the final rename
    /// never crosses a filesystem boundary.
    pub fn begin(&self, kind: ArtifactKind, item_id: &str) -> Result<ArtifactSlot, StoreError> {
        let dir = self.item_dir(kind, item_id)?;
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("create {}", dir.display()), e))?;

        let nonce: u64 = rand::thread_rng().gen();
        let temp_path = dir.join(format!(".tmp-{:016x}", nonce));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| StoreError::io(format!("create temp {}", temp_path.display()), e))?;

        Ok(ArtifactSlot {
            kind,
            dir,
            temp_path,
            file: Some(file),
            finalized: false,
        })
    }

    /// Verifies a recorded artifact under the item lock.
    ///
    /// Check-and-act: the guard keeps finalization and GC for this item out
    /// of the window between hash and use.
    pub fn verify_recorded(
        &self,
        guard: &ItemLockGuard,
        record: &ArtifactRecord,
    ) -> Result<(), StoreError> {
        debug_assert!(record
            .path
            .to_string_lossy()
            .contains(guard.item_id()));
        record.verify()
    }

    /// Lists finalized artifacts of a kind for an item, oldest first.
    ///
    /// Requires the item lock so the scan cannot race a finalization.
    pub fn list(
        &self,
        guard: &ItemLockGuard,
        kind: ArtifactKind,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.item_dir(kind, guard.item_id())?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(format!("scan {}", dir.display()), e)),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with(".tmp-"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Removes every artifact directory belonging to an item.
    ///
    /// Requires the item lock so a sweep cannot race a reset or an in-flight
    /// finalization for the same item.
    pub fn remove_item(&self, guard: &ItemLockGuard) -> Result<u64, StoreError> {
        let mut bytes = 0u64;
        for kind_dir in ArtifactKind::all_dirs() {
            let dir = self.root.join(kind_dir).join(guard.item_id());
            if let Ok(entries) = fs::read_dir(&dir) {
                for entry in entries.filter_map(|e| e.ok()) {
                    if let Ok(meta) = entry.metadata() {
                        bytes += meta.len();
                    }
                }
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(format!("remove {}", dir.display()), e)),
            }
        }
        Ok(bytes)
    }
}

/// A scoped, in-progress artifact write.
///
/// Exactly one of two things happens to the temp file: [`finalize`] renames
/// it into place, or `Drop` deletes it. There is no path that leaves a
/// partial file under a final name.
///
/// [`finalize`]: ArtifactSlot::finalize
pub struct ArtifactSlot {
    kind: ArtifactKind,
    dir: PathBuf,
    temp_path: PathBuf,
    file: Option<File>,
    finalized: bool,
}

impl ArtifactSlot {
    /// Path of the in-progress temp file, for writers that stream directly
    /// (downloads, the muxer's output redirection).
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Appends bytes to the temp file.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        let file = self.file.as_mut().ok_or_else(|| {
            StoreError::io(
                "write after detach".to_string(),
                std::io::Error::other("slot file detached"),
            )
        })?;
        file.write_all(bytes)
            .map_err(|e| StoreError::io(format!("write {}", self.temp_path.display()), e))
    }

    /// Closes the slot's own handle so an external process (the muxer) can
    /// write the temp file instead.
    pub fn detach_handle(&mut self) {
        self.file = None;
    }

    /// Fsyncs, hashes, and renames the temp file to its final
    /// `<timestamp>-<hash-prefix>.<ext>` name, under the item lock.
    ///
    /// A name collision means another writer finalized identical content
    /// first (the name embeds the hash); the loser deletes its temp file and
    /// adopts the winner after confirming the hashes agree.
    pub fn finalize(
        mut self,
        _guard: &ItemLockGuard,
        stage: &str,
    ) -> Result<ArtifactRecord, StoreError> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| StoreError::io(format!("fsync {}", self.temp_path.display()), e))?;
        } else {
            // Externally written temp file; reopen to fsync.
            let file = File::open(&self.temp_path)
                .map_err(|e| StoreError::io(format!("reopen {}", self.temp_path.display()), e))?;
            file.sync_all()
                .map_err(|e| StoreError::io(format!("fsync {}", self.temp_path.display()), e))?;
        }

        let (sha256, size_bytes) = hash_file(&self.temp_path)?;
        let final_name = format!(
            "{}-{}.{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            &sha256[..HASH_PREFIX_LEN],
            self.kind.extension()
        );
        let final_path = self.dir.join(&final_name);

        if final_path.exists() {
            // Loser path: confirm the winner carries the same content.
            let (winner_hash, _) = hash_file(&final_path)?;
            if winner_hash != sha256 {
                return Err(StoreError::HashMismatch {
                    path: final_path.display().to_string(),
                    expected: sha256,
                    actual: winner_hash,
                });
            }
            fs::remove_file(&self.temp_path)
                .map_err(|e| StoreError::io(format!("remove {}", self.temp_path.display()), e))?;
            debug!(path = %final_path.display(), "adopted identical artifact from concurrent writer");
        } else {
            fs::rename(&self.temp_path, &final_path).map_err(|e| {
                StoreError::io(
                    format!(
                        "rename {} -> {}",
                        self.temp_path.display(),
                        final_path.display()
                    ),
                    e,
                )
            })?;
        }
        self.finalized = true;

        Ok(ArtifactRecord {
            kind: self.kind.key(),
            path: final_path,
            size_bytes,
            sha256,
            stage: stage.to_string(),
            created_at: Utc::now(),
        })
    }
}

impl Drop for ArtifactSlot {
    fn drop(&mut self) {
        if !self.finalized {
            self.file.take();
            if let Err(e) = fs::remove_file(&self.temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        path = %self.temp_path.display(),
                        error = %e,
                        "failed to clean up abandoned temp artifact"
                    );
                }
            }
        }
    }
}
