//! Artifact records: what the item remembers about a produced file.

use super::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// A finalized artifact as referenced by an item.
///
/// A record only exists once the file is in place under its final name; the
/// inverse direction (file without record) is possible after a crash and is
/// resolved by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact key, e.g. `narration` or `stock_clip[1]`.
    pub kind: String,
    /// Absolute path under the artifact store root.
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
    /// Stage that produced the artifact.
    pub stage: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Checks the file still exists with the recorded size and hash.
    pub fn verify(&self) -> Result<(), StoreError> {
        let (hash, size) = hash_file(&self.path)?;
        if size != self.size_bytes {
            return Err(StoreError::VerifyFailed {
                path: self.path.display().to_string(),
                reason: format!("size {} != recorded {}", size, self.size_bytes),
            });
        }
        if hash != self.sha256 {
            return Err(StoreError::VerifyFailed {
                path: self.path.display().to_string(),
                reason: "content hash changed".to_string(),
            });
        }
        Ok(())
    }
}

/// Streams a file through SHA-256, returning `(hex_digest, size)`.
pub fn hash_file(path: &Path) -> Result<(String, u64), StoreError> {
    let file = File::open(path)
        .map_err(|e| StoreError::io(format!("open {}", path.display()), e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut size = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| StoreError::io(format!("read {}", path.display()), e))?;
        if read == 0 {
            break;
        }
        size += read as u64;
        hasher.update(&buffer[..read]);
    }

    Ok((format!("{:x}", hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn hash_file_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "x.txt", b"hello");
        let (hash, size) = hash_file(&path).unwrap();
        assert_eq!(size, 5);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn verify_catches_tampering() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"original");
        let (sha256, size_bytes) = hash_file(&path).unwrap();
        let record = ArtifactRecord {
            kind: "script".into(),
            path: path.clone(),
            size_bytes,
            sha256,
            stage: "scripting".into(),
            created_at: Utc::now(),
        };
        record.verify().unwrap();

        std::fs::write(&path, b"mutated!").unwrap();
        assert!(record.verify().is_err());
    }

    #[test]
    fn verify_catches_missing_file() {
        let record = ArtifactRecord {
            kind: "script".into(),
            path: PathBuf::from("/definitely/not/here.txt"),
            size_bytes: 1,
            sha256: "00".into(),
            stage: "scripting".into(),
            created_at: Utc::now(),
        };
        assert!(record.verify().is_err());
    }
}
