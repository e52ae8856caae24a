//! Incremental indexing: change events in, store mutations out.
//!
//! Each file is processed independently: read → chunk → enhance → diff
//! against stored chunk ids → embed new content in bounded batches →
//! upsert/delete → record the content hash in the manifest. The manifest
//! write happens only after the store mutation succeeds, so a failed file
//! is retried in full on resubmission and its old chunks stay queryable
//! until then.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use sift_core::config::ChunkConfig;
use sift_core::{ChangeEvent, ChangeKind, ChunkId};
use sift_store::Embedder;

use crate::chunker::chunk_file;
use crate::error::{IndexError, Result};
use crate::manifest::{FileHashManifest, content_hash};
use crate::metadata::{Enhancer, chunk_kind_for};
use crate::store::ChunkStore;
use crate::watcher::Admission;

/// Indexer tunables.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunk: ChunkConfig,
    pub embed_batch_size: usize,
    pub max_file_size_bytes: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            embed_batch_size: 32,
            max_file_size_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Summary of an indexing run. Batch summaries aggregate per-event ones;
/// `success` is the logical AND across events.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_processed: usize,
    pub chunks_added: usize,
    pub chunks_updated: usize,
    pub chunks_removed: usize,
    pub errors: Vec<String>,
    pub success: bool,
    /// Set when a store or embedding failure aborted the batch. Per-file
    /// read errors land in `errors` instead and do not abort.
    pub fatal: Option<String>,
}

impl IndexReport {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn merge(&mut self, other: Self) {
        self.files_processed += other.files_processed;
        self.chunks_added += other.chunks_added;
        self.chunks_updated += other.chunks_updated;
        self.chunks_removed += other.chunks_removed;
        self.errors.extend(other.errors);
        self.success &= other.success;
        if self.fatal.is_none() {
            self.fatal = other.fatal;
        }
    }
}

/// Turns change events into idempotent store mutations.
pub struct Indexer {
    store: ChunkStore,
    manifest: FileHashManifest,
    embedder: Arc<dyn Embedder>,
    enhancer: Enhancer,
    config: IndexerConfig,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    #[must_use]
    pub fn new(
        store: ChunkStore,
        manifest: FileHashManifest,
        embedder: Arc<dyn Embedder>,
        enhancer: Enhancer,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            manifest,
            embedder,
            enhancer,
            config,
        }
    }

    /// Initialize tables and the vector collection.
    ///
    /// # Errors
    ///
    /// Returns an error if store initialization fails.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.store.init().await?;
        self.manifest.init().await?;
        self.store
            .ensure_collection(u64::try_from(self.embedder.dim()).unwrap_or(u64::MAX))
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Process one change event.
    ///
    /// Unreadable or oversized files are recorded in the report's `errors`
    /// and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns an error on embedding-provider or store failures; these
    /// abort the surrounding job. Resubmitting the same events is safe.
    pub async fn process_change(&self, event: &ChangeEvent) -> Result<IndexReport> {
        match event.kind {
            ChangeKind::Deleted => self.delete_path(&event.path.to_string_lossy()).await,
            ChangeKind::Moved => {
                let mut report = IndexReport::ok();
                if let Some(old) = &event.old_path {
                    report.merge(self.delete_path(&old.to_string_lossy()).await?);
                    report.files_processed = report.files_processed.saturating_sub(1);
                }
                report.merge(self.index_file(&event.path).await?);
                Ok(report)
            }
            ChangeKind::Created | ChangeKind::Modified => self.index_file(&event.path).await,
        }
    }

    /// Process a batch, continuing past per-file read errors. A store or
    /// embedding failure stops the batch; events already applied stay
    /// applied (all writes are idempotent upserts/deletes).
    pub async fn process_batch(&self, events: &[ChangeEvent]) -> IndexReport {
        let mut report = IndexReport::ok();
        for event in events {
            match self.process_change(event).await {
                Ok(one) => report.merge(one),
                Err(e) => {
                    tracing::warn!(path = %event.path.display(), "indexing aborted: {e}");
                    report.errors.push(format!("{}: {e}", event.path.display()));
                    report.success = false;
                    report.fatal = Some(e.to_string());
                    break;
                }
            }
        }
        report
    }

    /// Walk `root` and synthesize the change events that bring the index in
    /// line with what is on disk (used by full-reindex jobs).
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest diff fails.
    pub async fn scan(&self, root: &Path, admission: &Admission) -> Result<Vec<ChangeEvent>> {
        let mut current: HashMap<String, String> = HashMap::new();
        for entry in ignore::WalkBuilder::new(root).hidden(true).build().flatten() {
            let path = entry.path();
            if !entry.file_type().is_some_and(|ft| ft.is_file()) || !admission.admits(path) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            current.insert(path.to_string_lossy().into_owned(), content_hash(&content));
        }

        let delta = self.manifest.diff(&current).await?;
        let mut events = Vec::new();
        for path in delta.added {
            events.push(ChangeEvent::new(ChangeKind::Created, path));
        }
        for path in delta.modified {
            events.push(ChangeEvent::new(ChangeKind::Modified, path));
        }
        for path in delta.deleted {
            events.push(ChangeEvent::new(ChangeKind::Deleted, path));
        }
        Ok(events)
    }

    async fn delete_path(&self, path: &str) -> Result<IndexReport> {
        let removed = self.store.remove_path(path).await?;
        self.manifest.remove(path).await?;
        tracing::debug!(path, removed, "removed chunks for deleted file");
        Ok(IndexReport {
            files_processed: 1,
            chunks_removed: removed,
            success: true,
            ..IndexReport::default()
        })
    }

    async fn index_file(&self, path: &Path) -> Result<IndexReport> {
        let path_str = path.to_string_lossy().into_owned();
        let mut report = IndexReport::ok();
        report.files_processed = 1;

        let (content, age) = match self.read_admissible(path).await {
            Ok(pair) => pair,
            Err(IndexError::FileRead { path, reason }) => {
                tracing::warn!(path = %path.display(), "skipping file: {reason}");
                report.errors.push(format!("{}: {reason}", path.display()));
                report.success = false;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let hash = content_hash(&content);
        if self.manifest.get(&path_str).await?.as_deref() == Some(hash.as_str()) {
            tracing::debug!(path = %path_str, "content unchanged, skipping");
            return Ok(report);
        }

        let kind = chunk_kind_for(path);
        let metadata = self.enhancer.enhance(path, &content, age);
        let mut chunks = chunk_file(&path_str, &content, kind, &self.config.chunk);
        for chunk in &mut chunks {
            chunk.metadata = metadata.clone();
        }

        let old_ids: HashSet<ChunkId> = self
            .store
            .chunk_ids_for_path(&path_str)
            .await?
            .into_iter()
            .collect();
        let new_ids: HashSet<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();

        report.chunks_added = new_ids.difference(&old_ids).count();
        report.chunks_updated = new_ids.intersection(&old_ids).count();
        let removed_ids: Vec<ChunkId> = old_ids.difference(&new_ids).cloned().collect();
        report.chunks_removed = removed_ids.len();

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            embeddings.extend(self.embedder.embed_batch(&texts).await?);
        }

        self.store.upsert_chunks(&chunks, embeddings).await?;
        self.store.remove_ids(&removed_ids).await?;
        self.manifest.set(&path_str, &hash).await?;

        tracing::debug!(
            path = %path_str,
            added = report.chunks_added,
            updated = report.chunks_updated,
            removed = report.chunks_removed,
            "indexed file"
        );
        Ok(report)
    }

    async fn read_admissible(
        &self,
        path: &Path,
    ) -> Result<(String, Option<std::time::Duration>)> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| IndexError::FileRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if meta.len() > self.config.max_file_size_bytes {
            return Err(IndexError::FileRead {
                path: path.to_path_buf(),
                reason: format!(
                    "file size {} exceeds ceiling {}",
                    meta.len(),
                    self.config.max_file_size_bytes
                ),
            });
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IndexError::FileRead {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let age = meta.modified().ok().and_then(|t| t.elapsed().ok());
        Ok((content, age))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_store::{HashEmbedder, InMemoryVectorStore};
    use sqlx::SqlitePool;

    async fn indexer() -> Indexer {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = ChunkStore::new(
            Arc::new(InMemoryVectorStore::new()),
            "test_chunks",
            pool.clone(),
        );
        let manifest = FileHashManifest::new(pool);
        let indexer = Indexer::new(
            store,
            manifest,
            Arc::new(HashEmbedder::new(32)),
            Enhancer::default(),
            IndexerConfig {
                chunk: ChunkConfig {
                    code_tokens: 50,
                    text_tokens: 50,
                    overlap_tokens: 5,
                },
                embed_batch_size: 4,
                max_file_size_bytes: 1024 * 1024,
            },
        );
        indexer.ensure_ready().await.unwrap();
        indexer
    }

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn created_file_adds_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.rs", "fn alpha() { 1 }\n");
        let indexer = indexer().await;

        let report = indexer
            .process_change(&ChangeEvent::new(ChangeKind::Created, path))
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.files_processed, 1);
        assert!(report.chunks_added >= 1);
        assert_eq!(report.chunks_removed, 0);
        assert_eq!(indexer.store().count().await.unwrap(), report.chunks_added);
    }

    #[tokio::test]
    async fn reprocessing_unchanged_content_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "a.rs", "fn alpha() { 1 }\n");
        let indexer = indexer().await;
        let event = ChangeEvent::new(ChangeKind::Modified, path);

        indexer.process_change(&event).await.unwrap();
        let again = indexer.process_change(&event).await.unwrap();
        assert!(again.success);
        assert_eq!(again.chunks_added, 0);
        assert_eq!(again.chunks_updated, 0);
        assert_eq!(again.chunks_removed, 0);
    }

    #[tokio::test]
    async fn modified_content_diffs_against_stored_ids() {
        let dir = tempfile::tempdir().unwrap();
        let long = (0..120).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let path = write(&dir, "a.txt", &long);
        let indexer = indexer().await;

        indexer
            .process_change(&ChangeEvent::new(ChangeKind::Created, path.clone()))
            .await
            .unwrap();
        let initial = indexer.store().count().await.unwrap();
        assert!(initial > 1);

        // shrink the file: surviving window ids update, the tail is removed
        std::fs::write(&path, "short now").unwrap();
        let report = indexer
            .process_change(&ChangeEvent::new(ChangeKind::Modified, path))
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.chunks_updated, 1);
        assert_eq!(report.chunks_removed, initial - 1);
        assert_eq!(indexer.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleted_file_removes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let long = (0..240).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let path = write(&dir, "bar.ts", &long);
        let indexer = indexer().await;

        indexer
            .process_change(&ChangeEvent::new(ChangeKind::Created, path.clone()))
            .await
            .unwrap();
        let before = indexer.store().count().await.unwrap();
        assert!(before >= 5);

        std::fs::remove_file(&path).unwrap();
        let report = indexer
            .process_change(&ChangeEvent::new(ChangeKind::Deleted, path.clone()))
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.chunks_removed, before);
        assert_eq!(indexer.store().count().await.unwrap(), 0);

        // no chunks with that path remain queryable
        let all = indexer.store().all_chunks().await.unwrap();
        assert!(all.iter().all(|c| c.path != path.to_string_lossy()));
    }

    #[tokio::test]
    async fn moved_file_reindexes_under_new_path() {
        let dir = tempfile::tempdir().unwrap();
        let old = write(&dir, "old.rs", "fn alpha() { 1 }\n");
        let indexer = indexer().await;

        indexer
            .process_change(&ChangeEvent::new(ChangeKind::Created, old.clone()))
            .await
            .unwrap();

        let new = dir.path().join("new.rs");
        std::fs::rename(&old, &new).unwrap();
        let report = indexer
            .process_change(&ChangeEvent::moved(old.clone(), new.clone()))
            .await
            .unwrap();
        assert!(report.success);

        let all = indexer.store().all_chunks().await.unwrap();
        assert!(all.iter().all(|c| c.path != old.to_string_lossy()));
        assert!(all.iter().any(|c| c.path == new.to_string_lossy()));
    }

    #[tokio::test]
    async fn unreadable_file_recorded_without_failing_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(&dir, "good.rs", "fn ok() {}\n");
        let missing = dir.path().join("missing.rs");
        let indexer = indexer().await;

        let report = indexer
            .process_batch(&[
                ChangeEvent::new(ChangeKind::Created, missing),
                ChangeEvent::new(ChangeKind::Created, good),
            ])
            .await;
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        // the readable file was still indexed
        assert!(indexer.store().count().await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn oversized_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "big.rs", &"x".repeat(4096));
        let mut indexer = indexer().await;
        indexer.config.max_file_size_bytes = 1024;

        let report = indexer
            .process_change(&ChangeEvent::new(ChangeKind::Created, path))
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("exceeds ceiling"));
        assert_eq!(indexer.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_synthesizes_events_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "a.rs", "fn a() {}\n");
        write(&dir, "b.md", "notes\n");
        let indexer = indexer().await;
        let admission = Admission::permissive();

        let events = indexer.scan(dir.path(), &admission).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == ChangeKind::Created));

        // after indexing, a rescan finds nothing to do
        indexer.process_batch(&events).await;
        let again = indexer.scan(dir.path(), &admission).await.unwrap();
        assert!(again.is_empty());
    }
}
