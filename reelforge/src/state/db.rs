//! Single-file local state store.
//!
//! One JSON document maps `item_id` to its [`Item`] record. Every commit
//! rewrites the file through a temp-then-rename, so the store is either the
//! old snapshot or the new one, never a torn write. Mutations require the
//! per-item lock guard; the interior mutex only protects the map itself.

use super::item::Item;
use crate::store::ItemLockGuard;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// Failures of the local state store. Surface as the `resource` error kind.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O failure during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl StateError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StateError::Io {
            context: context.into(),
            source,
        }
    }
}

/// The items database at `state/items.db`.
pub struct StateDb {
    path: PathBuf,
    items: Mutex<BTreeMap<String, Item>>,
}

impl StateDb {
    /// Opens the database, loading any existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StateError::io(format!("create {}", parent.display()), e))?;
        }
        let items = match std::fs::read(&path) {
            Ok(body) => serde_json::from_slice(&body)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StateError::io(format!("read {}", path.display()), e)),
        };
        let db = Self {
            path,
            items: Mutex::new(items),
        };
        info!(items = db.len(), path = %db.path.display(), "state store opened");
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one item.
    pub fn get(&self, item_id: &str) -> Option<Item> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(item_id)
            .cloned()
    }

    /// Snapshot of every item.
    pub fn list(&self) -> Vec<Item> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Writes an item record and persists the snapshot.
    ///
    /// The guard pins the commit to the per-item lock; the caller updates
    /// the dashboard only after this returns.
    pub fn commit(&self, guard: &ItemLockGuard, item: &Item) -> Result<(), StateError> {
        debug_assert_eq!(guard.item_id(), item.item_id);
        let snapshot = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            items.insert(item.item_id.clone(), item.clone());
            serde_json::to_vec_pretty(&*items)?
        };
        self.persist(&snapshot)
    }

    /// Removes an item record (operator-driven; GC keeps terminal records).
    pub fn remove(&self, guard: &ItemLockGuard) -> Result<(), StateError> {
        let snapshot = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            items.remove(guard.item_id());
            serde_json::to_vec_pretty(&*items)?
        };
        self.persist(&snapshot)
    }

    fn persist(&self, snapshot: &[u8]) -> Result<(), StateError> {
        let tmp = self.path.with_extension("db.tmp");
        std::fs::write(&tmp, snapshot)
            .map_err(|e| StateError::io(format!("write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StateError::io(format!("rename {}", self.path.display()), e))?;
        Ok(())
    }
}
