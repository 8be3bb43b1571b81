// SPDX-License-Identifier: MIT OR Apache-2.0

//! Input file discovery using walkdir

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use lexrag::utils::INDEX_DIR;

/// Extensions picked up when walking a directory
const TEXT_EXTENSIONS: &[&str] = &["txt", "text"];

/// Expands the given paths into a sorted, de-duplicated list of files.
///
/// Files named explicitly are taken as-is. Directories are walked
/// recursively for normalized text files, skipping index directories.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for path in paths {
        if path.is_file() {
            files.insert(path.clone());
        } else if path.is_dir() {
            walk_dir(path, &mut files);
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files.into_iter().collect())
}

fn walk_dir(dir: &Path, files: &mut BTreeSet<PathBuf>) {
    let walker = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != INDEX_DIR);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_text_file(entry.path()) {
            files.insert(entry.into_path());
        }
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn walks_directories_for_text_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("matters").join("acme")).unwrap();
        fs::create_dir_all(root.join(INDEX_DIR)).unwrap();
        fs::write(root.join("lease.txt"), "rent").unwrap();
        fs::write(root.join("matters").join("acme").join("brief.TXT"), "brief").unwrap();
        fs::write(root.join("scan.pdf"), "binary").unwrap();
        fs::write(root.join(INDEX_DIR).join("stale.txt"), "skip").unwrap();

        let files = collect_files(&[root.to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"lease.txt".to_string()));
        assert!(names.contains(&"brief.TXT".to_string()));
    }

    #[test]
    fn explicit_files_are_kept_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes.md");
        fs::write(&notes, "memo").unwrap();

        let files = collect_files(&[notes.clone(), notes.clone()]).unwrap();
        assert_eq!(files, vec![notes]);
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(collect_files(&[dir.path().join("absent.txt")]).is_err());
    }
}
