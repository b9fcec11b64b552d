//! On-disk layout under the data root.

use super::settings::ConfigError;
use std::path::{Path, PathBuf};

/// Fixed directory layout:
///
/// ```text
/// <root>/
///   state/items.db
///   state/circuit-breakers.json
///   artifacts/<kind>/<item_id>/...
///   logs/YYYY-MM-DD.log
///   credentials/
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state").join("items.db")
    }

    pub fn breakers_file(&self) -> PathBuf {
        self.root.join("state").join("circuit-breakers.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join("credentials")
    }

    /// Creates the directory tree. The credentials directory is restricted
    /// to the owner; its contents are never logged.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        let mkdir = |path: &Path| -> Result<(), ConfigError> {
            std::fs::create_dir_all(path).map_err(|e| ConfigError::Invalid {
                var: "REELFORGE_ROOT",
                reason: format!("cannot create {}: {}", path.display(), e),
            })
        };
        mkdir(&self.root)?;
        mkdir(&self.root.join("state"))?;
        mkdir(&self.artifacts_dir())?;
        mkdir(&self.logs_dir())?;
        mkdir(&self.credentials_dir())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(self.credentials_dir(), perms).map_err(|e| {
                ConfigError::Invalid {
                    var: "REELFORGE_ROOT",
                    reason: format!("cannot restrict credentials dir: {}", e),
                }
            })?;
        }
        Ok(())
    }
}
