//! Shared infrastructure utilities for Smithy.
//!
//! Filesystem helpers that don't belong in the domain-pure `smithy-types`
//! crate:
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`paths`**: Normalization and workspace-root confinement, symlinks included

pub mod atomic_write;
pub mod paths;

pub use atomic_write::atomic_write;
pub use paths::{PathError, ensure_real_within, normalize_path, resolve_within};
