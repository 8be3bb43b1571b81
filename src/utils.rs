// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspace discovery helpers

use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE;

/// Default name of the index directory inside a workspace
pub const INDEX_DIR: &str = ".lexrag";

/// Finds the nearest workspace root by walking up from `start`.
///
/// A directory is a workspace root when it holds an index directory or a
/// workspace config file.
pub fn find_workspace_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start.as_ref().to_path_buf();
    if let Ok(canonical) = current.canonicalize() {
        current = canonical;
    }

    loop {
        if current.join(INDEX_DIR).is_dir() || current.join(CONFIG_FILE).is_file() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Workspace root for `start`, falling back to `start` itself.
pub fn resolve_workspace_root(start: impl AsRef<Path>) -> PathBuf {
    find_workspace_root(&start).unwrap_or_else(|| start.as_ref().to_path_buf())
}
