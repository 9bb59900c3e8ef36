// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Task orchestration
//!
//! Each pipeline stage (scan, extract, classify, move) runs as an
//! exclusive task: starting a stage that is already running fails fast.
//! Cancellation is cooperative. The flag is observed at item boundaries
//! and long model calls race against it, so an interrupted item is
//! rolled back out of its transient status instead of being left
//! half-done in the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::archive::apply_archive_move;
use crate::cache::CacheStore;
use crate::classify::{apply_update, classify_chunk, CHUNK_SIZE};
use crate::config::AppConfig;
use crate::facts::extract_facts_item;
use crate::item::{ItemStatus, WorkItem};
use crate::ollama::OllamaClient;
use crate::scanner::scan_folder;
use crate::taxonomy::Taxonomy;
use crate::{Result, ShoeboxError};

/// The four exclusive stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    Scan,
    ExtractFacts,
    Classify,
    Move,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::ExtractFacts => "extract",
            Self::Classify => "classify",
            Self::Move => "move",
        }
    }
}

struct CancelInner {
    flag: AtomicBool,
    notify: tokio::sync::Notify,
}

/// Shared cancellation flag for one running task.
#[derive(Clone)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                notify: tokio::sync::Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress events emitted while a stage runs.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    ItemStarted { item: WorkItem },
    ItemUpdated { item: WorkItem },
    Finished { category: TaskCategory, report: StageReport },
}

pub type EventSender = mpsc::UnboundedSender<TaskEvent>;

fn emit(events: Option<&EventSender>, event: TaskEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Outcome of one stage run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageReport {
    pub processed: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// Tracks which stages are running and holds their cancel flags.
#[derive(Default)]
pub struct TaskHub {
    running: Mutex<HashMap<TaskCategory, CancelFlag>>,
}

/// Releases the stage slot on drop.
pub struct TaskGuard<'a> {
    hub: &'a TaskHub,
    category: TaskCategory,
    pub cancel: CancelFlag,
}

impl TaskHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a stage slot, or fail if that stage is already running.
    pub fn try_begin(&self, category: TaskCategory) -> Result<TaskGuard<'_>> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.contains_key(&category) {
            return Err(ShoeboxError::TaskBusy(category.as_str()));
        }
        let cancel = CancelFlag::new();
        running.insert(category, cancel.clone());
        Ok(TaskGuard {
            hub: self,
            category,
            cancel,
        })
    }

    pub fn is_running(&self, category: TaskCategory) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&category)
    }

    /// Request cancellation of a running stage. Returns false when the
    /// stage is not running.
    pub fn cancel(&self, category: TaskCategory) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(&category) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.hub
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.category);
    }
}

/// Scan the source folder and merge with the cache: unchanged files keep
/// their cached results, changed or new files come back pending.
pub fn run_scan(config: &AppConfig, cache: &mut CacheStore) -> Result<Vec<WorkItem>> {
    let root = std::path::Path::new(&config.source_dir);
    let archive_root = std::path::Path::new(&config.archive_dir);
    let fresh = scan_folder(root)?;
    let items: Vec<WorkItem> = fresh
        .into_iter()
        // Leave already-archived files alone when the archive sits
        // inside the source folder.
        .filter(|it| !it.path.starts_with(archive_root))
        .map(|it| cache.overlay(it))
        .collect();
    info!(count = items.len(), "scan finished");
    Ok(items)
}

/// Phase 1 over a list of items. Items not in a startable status pass
/// through untouched; the rest get content extraction plus the facts
/// model. Returns the updated list alongside the report.
pub async fn run_extract(
    items: &[WorkItem],
    config: &AppConfig,
    ollama: &OllamaClient,
    cache: &mut CacheStore,
    cancel: &CancelFlag,
    events: Option<&EventSender>,
) -> Result<(Vec<WorkItem>, StageReport)> {
    let mut out = Vec::with_capacity(items.len());
    let mut report = StageReport::default();

    for item in items {
        if cancel.is_cancelled() {
            report.cancelled = true;
            out.push(item.clone());
            continue;
        }
        if !matches!(
            item.status,
            ItemStatus::Pending | ItemStatus::Skipped | ItemStatus::Error
        ) {
            out.push(item.clone());
            continue;
        }

        let working = item.mark_scanning();
        cache.upsert(&working);
        emit(events, TaskEvent::ItemStarted { item: working.clone() });

        let done = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let rolled = working.rolled_back();
                cache.upsert(&rolled);
                cache.save()?;
                emit(events, TaskEvent::ItemUpdated { item: rolled.clone() });
                report.cancelled = true;
                out.push(rolled);
                continue;
            }
            done = extract_facts_item(item, config, ollama) => done,
        };

        if done.status == ItemStatus::Error {
            report.errors += 1;
        }
        report.processed += 1;
        cache.upsert(&done);
        cache.save()?;
        emit(events, TaskEvent::ItemUpdated { item: done.clone() });
        out.push(done);
    }

    emit(
        events,
        TaskEvent::Finished {
            category: TaskCategory::ExtractFacts,
            report,
        },
    );
    Ok((out, report))
}

/// Phase 2 over a list of items: scanned items go to the model in chunks.
pub async fn run_classify(
    items: &[WorkItem],
    config: &AppConfig,
    ollama: &OllamaClient,
    taxonomy: &Taxonomy,
    cache: &mut CacheStore,
    cancel: &CancelFlag,
    events: Option<&EventSender>,
) -> Result<(Vec<WorkItem>, StageReport)> {
    let mut out = Vec::with_capacity(items.len());
    let mut report = StageReport::default();

    let model = ollama
        .resolve_model(
            &config.ai_engine.models.text_deep,
            &config.ai_engine.models.fallbacks,
        )
        .await;
    let models = crate::ollama::model_candidates(&model, &config.ai_engine.models.fallbacks);

    let mut pending: Vec<WorkItem> = Vec::new();
    for item in items {
        if item.status == ItemStatus::Scanned {
            pending.push(item.clone());
        } else {
            out.push(item.clone());
        }
    }

    for chunk in pending.chunks(CHUNK_SIZE) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            out.extend(chunk.iter().cloned());
            continue;
        }

        for item in chunk {
            let working = item.mark_classifying();
            cache.upsert(&working);
            emit(events, TaskEvent::ItemStarted { item: working });
        }

        let chunk_t0 = std::time::Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for item in chunk {
                    let rolled = item.mark_classifying().rolled_back();
                    cache.upsert(&rolled);
                    emit(events, TaskEvent::ItemUpdated { item: rolled.clone() });
                    out.push(rolled);
                }
                cache.save()?;
                report.cancelled = true;
                continue;
            }
            outcome = classify_chunk(chunk, config, ollama, taxonomy, &models) => outcome,
        };
        let chunk_time = chunk_t0.elapsed().as_secs_f64();
        let share = chunk_time / chunk.len() as f64;
        let llm_share = outcome.llm_time_s / chunk.len() as f64;

        for item in chunk {
            let path = item.path.to_string_lossy().to_string();
            let mut done = match (&outcome.error, outcome.by_path.get(&path)) {
                (Some(error), _) => {
                    report.errors += 1;
                    WorkItem {
                        status: ItemStatus::Error,
                        reason: Some(error.clone()),
                        llm_raw_output: outcome.raw_output.clone().or(item.llm_raw_output.clone()),
                        ..item.clone()
                    }
                }
                (None, Some(update)) => apply_update(item, update, &outcome.model, llm_share),
                (None, None) => {
                    report.errors += 1;
                    WorkItem {
                        status: ItemStatus::Scanned,
                        reason: Some("No model output for this file".to_string()),
                        ..item.clone()
                    }
                }
            };
            done.classify_time_s = Some(share);
            report.processed += 1;
            cache.upsert(&done);
            emit(events, TaskEvent::ItemUpdated { item: done.clone() });
            out.push(done);
        }
        cache.save()?;
    }

    // Scan order is path order; restore it after the split into chunks.
    out.sort_by(|a, b| a.path.cmp(&b.path));

    emit(
        events,
        TaskEvent::Finished {
            category: TaskCategory::Classify,
            report,
        },
    );
    Ok((out, report))
}

/// Move items into the archive. Moves whatever it is given that sits in
/// a movable status; classified items go under their proposed name,
/// skipped and errored ones keep their original name.
pub fn run_move(
    items: &[WorkItem],
    config: &AppConfig,
    source_cache: &mut CacheStore,
    archive_cache: &mut CacheStore,
    cancel: &CancelFlag,
    events: Option<&EventSender>,
) -> Result<(Vec<WorkItem>, StageReport)> {
    let mut out = Vec::with_capacity(items.len());
    let mut report = StageReport::default();

    for item in items {
        if cancel.is_cancelled() {
            report.cancelled = true;
            out.push(item.clone());
            continue;
        }
        if !matches!(
            item.status,
            ItemStatus::Classified | ItemStatus::Skipped | ItemStatus::Error
        ) {
            out.push(item.clone());
            continue;
        }

        emit(events, TaskEvent::ItemStarted { item: item.mark_moving() });
        match apply_archive_move(item, config, source_cache, archive_cache) {
            Ok(moved) => {
                report.processed += 1;
                emit(events, TaskEvent::ItemUpdated { item: moved.clone() });
                out.push(moved);
            }
            Err(e) => {
                warn!(path = %item.path.display(), error = %e, "move failed");
                report.errors += 1;
                let failed = WorkItem {
                    status: ItemStatus::Error,
                    reason: Some(e.to_string()),
                    ..item.clone()
                };
                source_cache.upsert(&failed);
                source_cache.save()?;
                emit(events, TaskEvent::ItemUpdated { item: failed.clone() });
                out.push(failed);
            }
        }
    }

    emit(
        events,
        TaskEvent::Finished {
            category: TaskCategory::Move,
            report,
        },
    );
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::FileKind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_hub_exclusive_per_category() {
        let hub = TaskHub::new();
        let guard = hub.try_begin(TaskCategory::Scan).unwrap();
        assert!(hub.is_running(TaskCategory::Scan));
        assert!(matches!(
            hub.try_begin(TaskCategory::Scan),
            Err(ShoeboxError::TaskBusy("scan"))
        ));
        // Other categories stay available.
        let other = hub.try_begin(TaskCategory::Classify).unwrap();
        drop(other);
        drop(guard);
        assert!(!hub.is_running(TaskCategory::Scan));
        assert!(hub.try_begin(TaskCategory::Scan).is_ok());
    }

    #[test]
    fn test_hub_cancel_reaches_running_flag() {
        let hub = TaskHub::new();
        assert!(!hub.cancel(TaskCategory::Move));
        let guard = hub.try_begin(TaskCategory::Move).unwrap();
        assert!(hub.cancel(TaskCategory::Move));
        assert!(guard.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_flag_resolves_waiters() {
        let flag = CancelFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cancelled().await })
        };
        flag.cancel();
        waiter.await.unwrap();
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_extract_skips_everything_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.source_dir = dir.path().to_string_lossy().to_string();
        let ollama = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let mut cache = CacheStore::new(dir.path());

        let item = WorkItem::new(
            dir.path().join("a.txt"),
            FileKind::Txt,
            1,
            "2024-01-01T00:00:00".to_string(),
        );
        let cancel = CancelFlag::new();
        cancel.cancel();
        let (out, report) = run_extract(&[item], &config, &ollama, &mut cache, &cancel, None)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert_eq!(out[0].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_rolls_back_only_the_inflight_item() {
        let dir = TempDir::new().unwrap();
        // Empty file: skipped during extraction without a model call.
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"gas bill from Enel for 2021").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"another document body").unwrap();

        // Accepts connections and never answers, so the model call for
        // b.txt stays in flight until the cancel lands.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let Ok((sock, _)) = listener.accept().await else { break };
                held.push(sock);
            }
        });

        let mut config = AppConfig::default();
        config.source_dir = dir.path().to_string_lossy().to_string();
        let ollama = OllamaClient::new(&format!("http://{addr}")).unwrap();
        let mut cache = CacheStore::new(dir.path());

        let items: Vec<WorkItem> = ["a.txt", "b.txt", "c.txt"]
            .iter()
            .map(|name| {
                WorkItem::new(dir.path().join(name), FileKind::Txt, 1, String::new())
            })
            .collect();

        let cancel = CancelFlag::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                cancel.cancel();
            });
        }
        let (out, report) = run_extract(&items, &config, &ollama, &mut cache, &cancel, None)
            .await
            .unwrap();

        assert!(report.cancelled);
        // a.txt completed before the cancel.
        assert_eq!(out[0].status, ItemStatus::Skipped);
        // b.txt was mid-call: rolled back with the stopped reason.
        assert_eq!(out[1].status, ItemStatus::Pending);
        assert_eq!(out[1].reason.as_deref(), Some("extraction stopped"));
        // c.txt was never started and carries no reason.
        assert_eq!(out[2].status, ItemStatus::Pending);
        assert!(out[2].reason.is_none());

        // The completed item and the rollback reached the cache file;
        // the untouched remainder did not.
        let mut reloaded = CacheStore::new(dir.path());
        reloaded.load();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_run_move_ignores_pending_items() {
        let source = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.source_dir = source.path().to_string_lossy().to_string();
        config.archive_dir = archive.path().to_string_lossy().to_string();

        let pending = WorkItem::new(
            PathBuf::from(source.path().join("a.pdf")),
            FileKind::Pdf,
            1,
            String::new(),
        );
        let mut source_cache = CacheStore::new(source.path());
        let mut archive_cache = CacheStore::new(archive.path());
        let cancel = CancelFlag::new();
        let (out, report) = run_move(
            &[pending],
            &config,
            &mut source_cache,
            &mut archive_cache,
            &cancel,
            None,
        )
        .unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(out[0].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_classify_passes_through_non_scanned() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.source_dir = dir.path().to_string_lossy().to_string();
        let ollama = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let mut cache = CacheStore::new(dir.path());
        let taxonomy = Taxonomy::default();

        let item = WorkItem::new(
            dir.path().join("a.pdf"),
            FileKind::Pdf,
            1,
            String::new(),
        );
        let cancel = CancelFlag::new();
        let (out, report) = run_classify(
            &[item],
            &config,
            &ollama,
            &taxonomy,
            &mut cache,
            &cancel,
            None,
        )
        .await
        .unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(out[0].status, ItemStatus::Pending);
    }
}
