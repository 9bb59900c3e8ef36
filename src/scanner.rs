// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Filesystem discovery
//!
//! Walks a folder, keeps the supported document types, and produces pending
//! work items with the size/mtime fingerprint the cache keys on.

use chrono::{DateTime, Local};
use std::fs::Metadata;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::DATA_DIR_NAME;
use crate::item::{FileKind, WorkItem};
use crate::Result;

/// Modification time as local ISO-8601 seconds; empty when unavailable.
fn modified_iso(meta: &Metadata) -> String {
    meta.modified()
        .ok()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Recursively scan a folder for supported files, in stable path order.
///
/// Hidden files and directories are skipped, as is the data directory
/// where the cache and logs live.
pub fn scan_folder(root: &Path) -> Result<Vec<WorkItem>> {
    let mut items = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || (!is_hidden(&name) && name != DATA_DIR_NAME)
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = FileKind::from_path(path) else {
            continue;
        };
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "stat failed, skipping");
                continue;
            }
        };
        items.push(WorkItem::new(
            path.to_path_buf(),
            kind,
            meta.len(),
            modified_iso(&meta),
        ));
    }

    items.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!(root = %root.display(), count = items.len(), "scan complete");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemStatus;

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"pdf").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"text").unwrap();
        std::fs::write(dir.path().join("ignore.exe"), b"nope").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.jpg"), b"img").unwrap();

        let items = scan_folder(dir.path()).unwrap();
        let names: Vec<String> = items.iter().map(|i| i.file_name()).collect();
        assert_eq!(names, vec!["a.txt", "b.pdf", "c.jpg"]);
        assert!(items.iter().all(|i| i.status == ItemStatus::Pending));
        assert!(items.iter().all(|i| !i.modified.is_empty()));
    }

    #[test]
    fn test_scan_skips_hidden_and_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".shoebox")).unwrap();
        std::fs::write(dir.path().join(".shoebox/cache.json"), b"{}").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(".hidden.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("real.pdf"), b"x").unwrap();

        let items = scan_folder(dir.path()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].file_name(), "real.pdf");
    }
}
