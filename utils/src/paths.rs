//! Workspace-rooted path handling.
//!
//! `resolve_within` is purely lexical. `ensure_real_within` follows symlinks
//! through the part of a path that already exists on disk.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),
    #[error("path escapes the workspace root: {0}")]
    Escapes(String),
    #[error("path leaves the workspace root through a symlink: {0}")]
    Symlink(String),
}

/// Collapse `.` and `..` components without touching the filesystem.
///
/// A `..` at the start of a relative path has nothing to pop and is dropped.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Resolve a relative path under `root`, rejecting absolute paths and any
/// `..` that would climb above the root at any point.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let rel = Path::new(relative);
    if rel.has_root() || rel.is_absolute() {
        return Err(PathError::Absolute(relative.to_string()));
    }

    let mut depth: usize = 0;
    for c in rel.components() {
        match c {
            Component::ParentDir => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PathError::Escapes(relative.to_string()))?;
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(relative.to_string()));
            }
        }
    }

    Ok(root.join(normalize_path(rel)))
}

/// Check that the deepest existing ancestor of `path` (or `path` itself)
/// lives under `root` once symlinks are resolved. `root` must already be
/// canonical.
pub fn ensure_real_within(root: &Path, path: &Path) -> Result<(), PathError> {
    let mut existing = path;
    loop {
        if let Ok(real) = existing.canonicalize() {
            if real.starts_with(root) {
                return Ok(());
            }
            return Err(PathError::Symlink(path.display().to_string()));
        }
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return Ok(()),
        }
    }
}
