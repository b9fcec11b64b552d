//! Path containment validation.

use super::ValidationError;
use std::path::{Component, Path, PathBuf};

/// Resolves `candidate` against `root` and guarantees the result stays inside
/// `root` after symlink resolution.
///
/// The candidate may be relative (joined onto the root) or absolute (must
/// already be under the root). Traversal components are rejected before any
/// filesystem access. For paths that do not exist yet, the deepest existing
/// ancestor is canonicalized instead, so a symlinked parent directory cannot
/// redirect a write outside the root.
pub fn safe_path_under(root: &Path, candidate: &Path) -> Result<PathBuf, ValidationError> {
    let escape = |path: &Path| ValidationError::PathEscape {
        root: root.display().to_string(),
        path: path.display().to_string(),
    };

    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(escape(candidate));
        }
    }

    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let canonical_root = root.canonicalize().map_err(|_| escape(root))?;

    // Canonicalize the deepest ancestor that exists, then re-append the rest.
    let mut existing = joined.clone();
    let mut tail = Vec::new();
    let resolved_base = loop {
        match existing.canonicalize() {
            Ok(resolved) => break resolved,
            Err(_) => {
                let Some(name) = existing.file_name() else {
                    return Err(escape(&joined));
                };
                tail.push(name.to_os_string());
                if !existing.pop() {
                    return Err(escape(&joined));
                }
            }
        }
    };

    let mut resolved = resolved_base;
    for name in tail.iter().rev() {
        resolved.push(name);
    }

    if resolved.starts_with(&canonical_root) {
        Ok(resolved)
    } else {
        Err(escape(&joined))
    }
}
