// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Per-folder result cache
//!
//! Extraction and classification results are cached under
//! `<folder>/.shoebox/cache.json`, keyed by path relative to the folder.
//! An entry is only reused when the file's size and mtime still match and
//! the cached status is a stable one; transient statuses are never served
//! back. Saves are atomic (write to `.tmp`, then rename) so a crash can
//! lose the latest update but never corrupt the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::item::WorkItem;
use crate::Result;

pub struct CacheStore {
    root: PathBuf,
    path: PathBuf,
    entries: HashMap<String, WorkItem>,
}

impl CacheStore {
    /// Cache for the given folder root. Call [`load`](Self::load) before use.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            path: AppConfig::cache_path(root),
            entries: HashMap::new(),
        }
    }

    /// Load the cache file, tolerating a missing or corrupt file and
    /// skipping individual entries that no longer parse.
    pub fn load(&mut self) {
        self.entries.clear();
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return;
        };
        let Ok(raw) = serde_json::from_str::<HashMap<String, serde_json::Value>>(&content) else {
            tracing::warn!(path = %self.path.display(), "cache file unreadable, starting empty");
            return;
        };
        for (rel, value) in raw {
            match serde_json::from_value::<WorkItem>(value) {
                Ok(item) => {
                    self.entries.insert(rel, item);
                }
                Err(e) => {
                    tracing::debug!(rel, error = %e, "dropping unparseable cache entry");
                }
            }
        }
    }

    /// Persist atomically: write a sibling `.tmp` file, then rename over.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        // Sorted keys keep the file diffable between runs.
        let sorted: std::collections::BTreeMap<&String, &WorkItem> = self.entries.iter().collect();
        let content = serde_json::to_string_pretty(&sorted)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn rel_key(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    /// Return the cached record for a freshly scanned item, if it is still
    /// valid: same size, same mtime, and a stable (non-transient,
    /// non-pending) cached status.
    pub fn lookup(&self, item: &WorkItem) -> Option<&WorkItem> {
        let cached = self.entries.get(&self.rel_key(&item.path))?;
        if cached.size != item.size || cached.modified != item.modified {
            return None;
        }
        if cached.status.is_transient() || cached.status == crate::item::ItemStatus::Pending {
            return None;
        }
        Some(cached)
    }

    /// Overlay cached results onto a fresh scan record, keeping the fresh
    /// path and filesystem identity.
    pub fn overlay(&self, fresh: WorkItem) -> WorkItem {
        match self.lookup(&fresh) {
            Some(cached) => WorkItem {
                path: fresh.path,
                kind: fresh.kind,
                size: fresh.size,
                modified: fresh.modified,
                ..cached.clone()
            },
            None => fresh,
        }
    }

    /// Insert or replace the entry for an item. The stored copy carries the
    /// folder-relative path.
    pub fn upsert(&mut self, item: &WorkItem) {
        let rel = self.rel_key(&item.path);
        let mut stored = item.clone();
        stored.path = PathBuf::from(&rel);
        self.entries.insert(rel, stored);
    }

    pub fn invalidate(&mut self, path: &Path) {
        let rel = self.rel_key(path);
        self.entries.remove(&rel);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over stored records (paths are folder-relative).
    pub fn iter(&self) -> impl Iterator<Item = (&String, &WorkItem)> {
        self.entries.iter()
    }
}
