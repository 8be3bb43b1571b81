// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-phase file replacement for persisted state.
//!
//! A writer first stages the new contents next to the target as `<name>.tmp`
//! and only then commits with a rename. Staged files that are never committed
//! are removed on drop, so an abandoned or failed save leaves the previous
//! file and no temporary behind.

use std::path::{Path, PathBuf};

use crate::errors::Result;

/// A fully written temporary file waiting to replace its target.
#[derive(Debug)]
pub struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Writes `target`'s replacement with `write` and returns it staged.
    ///
    /// A failed write removes the partial temporary file.
    pub(crate) fn write<F>(target: &Path, write: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staged = Self {
            tmp: tmp_path(target),
            target: target.to_path_buf(),
            committed: false,
        };
        write(&staged.tmp)?;
        Ok(staged)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Renames the staged file over its target.
    pub fn commit(mut self) -> Result<()> {
        std::fs::rename(&self.tmp, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// Temporary sibling used while staging `path`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RagError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn commit_replaces_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("state.sqlite");
        fs::write(&target, "old").unwrap();

        let staged = StagedFile::write(&target, |tmp| Ok(fs::write(tmp, "new")?)).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        staged.commit().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert!(!tmp_path(&target).exists());
    }

    #[test]
    fn dropped_stage_leaves_target_alone() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("state.sqlite");
        fs::write(&target, "old").unwrap();

        let staged = StagedFile::write(&target, |tmp| Ok(fs::write(tmp, "new")?)).unwrap();
        drop(staged);

        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert!(!tmp_path(&target).exists());
    }

    #[test]
    fn failed_write_removes_partial_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("state.sqlite");

        let err = StagedFile::write(&target, |tmp| {
            fs::write(tmp, "partial")?;
            Err(RagError::Embedding("disk full".into()))
        })
        .unwrap_err();

        assert!(matches!(err, RagError::Embedding(_)));
        assert!(!tmp_path(&target).exists());
        assert!(!target.exists());
    }
}
