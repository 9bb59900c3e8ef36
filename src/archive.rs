// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Archive mover
//!
//! Moves classified (or skipped/errored, under their original names)
//! files into `<archive>/<category>/<year>/<name>`, never overwriting:
//! collisions get a ` (n)` suffix before the extension. Every move is
//! appended to an audit log and mirrored into the archive-side cache so
//! a later scan of the archive folder starts warm.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::config::AppConfig;
use crate::item::{ItemStatus, WorkItem};
use crate::{Result, ShoeboxError};

/// Destination inside the archive for an item, before collision handling.
/// Returns (absolute path, archive-relative path).
pub fn archive_dest_for_item(item: &WorkItem, config: &AppConfig) -> (PathBuf, PathBuf) {
    let category = item
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(&config.rules.unknown_category);
    let year = item
        .reference_year
        .as_deref()
        .map(str::trim)
        .filter(|y| !y.is_empty())
        .unwrap_or(&config.rules.undated_label);
    let filename = match (&item.status, &item.proposed_name) {
        (ItemStatus::Classified, Some(name)) if !name.is_empty() => name.clone(),
        _ => item.file_name(),
    };
    let rel = PathBuf::from(category).join(year).join(filename);
    (PathBuf::from(&config.archive_dir).join(&rel), rel)
}

/// First non-existing variant of `dest`: the path itself, then
/// `stem (2).ext`, `stem (3).ext`, ...
pub fn unique_destination(dest: &Path) -> PathBuf {
    if !dest.exists() {
        return dest.to_path_buf();
    }
    let parent = dest.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 2u32;
    loop {
        let candidate = parent.join(format!("{stem} ({n}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename, falling back to copy+remove for cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        // EXDEV: archive on another filesystem, fall back to copy+remove.
        Err(e) if e.raw_os_error() == Some(18) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn append_move_log(archive_root: &Path, record: &serde_json::Value) -> Result<()> {
    let log_path = AppConfig::moves_log_path(archive_root);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    writeln!(file, "{record}")?;
    Ok(())
}

/// Move one item into the archive. Updates the source cache (item marked
/// moved with its destination), mirrors the entry into the archive-side
/// cache, and appends an audit record. Returns the updated source item.
pub fn apply_archive_move(
    item: &WorkItem,
    config: &AppConfig,
    source_cache: &mut CacheStore,
    archive_cache: &mut CacheStore,
) -> Result<WorkItem> {
    let (dest, _) = archive_dest_for_item(item, config);
    let dest = unique_destination(&dest);

    let t0 = Instant::now();
    move_file(&item.path, &dest)
        .map_err(|e| ShoeboxError::Move(format!("{} -> {}: {e}", item.path.display(), dest.display())))?;
    let elapsed_ms = t0.elapsed().as_millis();
    tracing::debug!("Moved {} in {elapsed_ms}ms", item.path.display());

    let actual_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| item.file_name());

    // Collision suffixes can change the final name; keep the record honest.
    let final_proposed = match (&item.status, &item.proposed_name) {
        (ItemStatus::Classified, Some(_)) => Some(actual_name.clone()),
        _ => item.proposed_name.clone(),
    };

    let record = json!({
        "id": Uuid::new_v4().to_string(),
        "ts": chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "from": item.path.to_string_lossy(),
        "to": dest.to_string_lossy(),
        "status": item.status,
        "category": item.category,
        "year": item.reference_year,
        "proposed_name": if item.status == ItemStatus::Classified {
            actual_name.clone()
        } else {
            item.file_name()
        },
    });
    // The file is already at its destination when the audit append fails,
    // so the gap is recorded on the item instead of failing the move.
    let audit_failure = append_move_log(Path::new(&config.archive_dir), &record)
        .err()
        .map(|e| {
            tracing::warn!("Failed to append move log: {e}");
            format!("moved, but audit log write failed: {e}")
        });

    // Skip/error reasons travel with the moved record.
    let moved = WorkItem {
        status: ItemStatus::Moved,
        reason: audit_failure.or_else(|| item.reason.clone()),
        moved_to: Some(dest.to_string_lossy().to_string()),
        proposed_name: final_proposed.clone(),
        ..item.clone()
    };
    source_cache.upsert(&moved);
    source_cache.save()?;

    let (size, modified) = match std::fs::metadata(&dest) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .ok()
                .map(|t| {
                    chrono::DateTime::<chrono::Local>::from(t)
                        .format("%Y-%m-%dT%H:%M:%S")
                        .to_string()
                })
                .unwrap_or_else(|| item.modified.clone());
            (meta.len(), modified)
        }
        Err(_) => (item.size, item.modified.clone()),
    };
    let archived = WorkItem {
        path: dest.clone(),
        size,
        modified,
        moved_to: None,
        proposed_name: final_proposed,
        ..item.clone()
    };
    archive_cache.upsert(&archived);
    archive_cache.save()?;

    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::FileKind;
    use tempfile::TempDir;

    fn config_for(source: &Path, archive: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.source_dir = source.to_string_lossy().to_string();
        config.archive_dir = archive.to_string_lossy().to_string();
        config
    }

    fn classified_item(path: PathBuf) -> WorkItem {
        let mut item = WorkItem::new(path, FileKind::Pdf, 4, "2024-01-01T00:00:00".to_string());
        item.status = ItemStatus::Classified;
        item.category = Some("banking".to_string());
        item.reference_year = Some("2021".to_string());
        item.proposed_name = Some("statement march 2021.pdf".to_string());
        item
    }

    #[test]
    fn test_dest_uses_category_year_and_proposed_name() {
        let config = config_for(Path::new("/in"), Path::new("/out"));
        let item = classified_item(PathBuf::from("/in/a.pdf"));
        let (abs, rel) = archive_dest_for_item(&item, &config);
        assert_eq!(rel, PathBuf::from("banking/2021/statement march 2021.pdf"));
        assert_eq!(abs, PathBuf::from("/out/banking/2021/statement march 2021.pdf"));
    }

    #[test]
    fn test_dest_falls_back_for_unclassified() {
        let config = config_for(Path::new("/in"), Path::new("/out"));
        let mut item = classified_item(PathBuf::from("/in/a.pdf"));
        item.status = ItemStatus::Skipped;
        item.category = None;
        item.reference_year = None;
        let (_, rel) = archive_dest_for_item(&item, &config);
        assert_eq!(rel, PathBuf::from("unknown/undated/a.pdf"));
    }

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.pdf");
        assert_eq!(unique_destination(&dest), dest);
        std::fs::write(&dest, b"x").unwrap();
        assert_eq!(unique_destination(&dest), dir.path().join("a (2).pdf"));
        std::fs::write(dir.path().join("a (2).pdf"), b"x").unwrap();
        assert_eq!(unique_destination(&dest), dir.path().join("a (3).pdf"));
    }

    #[test]
    fn test_apply_move_updates_both_caches_and_log() {
        let source = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let config = config_for(source.path(), archive.path());

        let src_file = source.path().join("a.pdf");
        std::fs::write(&src_file, b"data").unwrap();
        let item = classified_item(src_file.clone());

        let mut source_cache = CacheStore::new(source.path());
        let mut archive_cache = CacheStore::new(archive.path());
        let moved = apply_archive_move(&item, &config, &mut source_cache, &mut archive_cache).unwrap();

        assert_eq!(moved.status, ItemStatus::Moved);
        assert!(!src_file.exists());
        let dest = archive.path().join("banking/2021/statement march 2021.pdf");
        assert!(dest.exists());
        assert_eq!(moved.moved_to.as_deref(), Some(dest.to_string_lossy().as_ref()));

        assert_eq!(source_cache.len(), 1);
        assert_eq!(archive_cache.len(), 1);

        let log = std::fs::read_to_string(AppConfig::moves_log_path(archive.path())).unwrap();
        let rec: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert_eq!(rec["category"], "banking");
        assert_eq!(rec["year"], "2021");
        assert!(rec["id"].as_str().is_some());
    }

    #[test]
    fn test_apply_move_records_audit_log_failure() {
        let source = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let config = config_for(source.path(), archive.path());
        // Occupy the log path with a directory so the append must fail.
        std::fs::create_dir_all(AppConfig::moves_log_path(archive.path())).unwrap();

        let src_file = source.path().join("a.pdf");
        std::fs::write(&src_file, b"data").unwrap();
        let item = classified_item(src_file.clone());

        let mut source_cache = CacheStore::new(source.path());
        let mut archive_cache = CacheStore::new(archive.path());
        let moved = apply_archive_move(&item, &config, &mut source_cache, &mut archive_cache).unwrap();

        // The move itself succeeds, the audit gap is on the record.
        assert_eq!(moved.status, ItemStatus::Moved);
        assert!(!src_file.exists());
        assert!(moved
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("audit log")));
    }

    #[test]
    fn test_apply_move_collision_gets_suffix() {
        let source = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let config = config_for(source.path(), archive.path());

        let occupied = archive.path().join("banking/2021/statement march 2021.pdf");
        std::fs::create_dir_all(occupied.parent().unwrap()).unwrap();
        std::fs::write(&occupied, b"existing").unwrap();

        let src_file = source.path().join("a.pdf");
        std::fs::write(&src_file, b"data").unwrap();
        let item = classified_item(src_file);

        let mut source_cache = CacheStore::new(source.path());
        let mut archive_cache = CacheStore::new(archive.path());
        let moved = apply_archive_move(&item, &config, &mut source_cache, &mut archive_cache).unwrap();

        assert_eq!(
            moved.proposed_name.as_deref(),
            Some("statement march 2021 (2).pdf")
        );
        assert!(archive.path().join("banking/2021/statement march 2021 (2).pdf").exists());
        assert_eq!(std::fs::read(&occupied).unwrap(), b"existing");
    }
}
