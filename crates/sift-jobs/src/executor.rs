//! Job execution strategies.
//!
//! [`InlineExecutor`] runs the job in-process. [`RemoteQueueExecutor`]
//! hands the job to a broker over HTTP and, when the broker is
//! unreachable, falls back to the inline path — the same `run_job` code
//! either way, so job semantics do not depend on where the job runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sift_index::indexer::Indexer;

use crate::error::JobError;
use crate::job::QueuedJob;
use crate::store::JobStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: QueuedJob) -> BoxFuture<'_, Result<(), JobError>>;
}

/// Drive one job through its lifecycle against the indexer.
///
/// # Errors
///
/// Returns an error if a status write fails; indexing failures are
/// recorded on the job, not returned.
pub async fn run_job(indexer: &Indexer, store: &JobStore, job: &QueuedJob) -> Result<(), JobError> {
    if !store.mark_processing(&job.id).await? {
        tracing::debug!(job = %job.id, "job no longer pending, skipping");
        return Ok(());
    }

    let report = indexer.process_batch(&job.events).await;
    match &report.fatal {
        Some(error) => {
            tracing::warn!(job = %job.id, "job failed: {error}");
            store.fail(&job.id, &report, error).await?;
        }
        None => {
            tracing::info!(
                job = %job.id,
                files = report.files_processed,
                added = report.chunks_added,
                updated = report.chunks_updated,
                removed = report.chunks_removed,
                "job completed"
            );
            store.complete(&job.id, &report).await?;
        }
    }
    Ok(())
}

/// Runs jobs on the local runtime.
#[derive(Clone)]
pub struct InlineExecutor {
    indexer: Arc<Indexer>,
    store: JobStore,
}

impl InlineExecutor {
    #[must_use]
    pub fn new(indexer: Arc<Indexer>, store: JobStore) -> Self {
        Self { indexer, store }
    }
}

impl JobExecutor for InlineExecutor {
    fn execute(&self, job: QueuedJob) -> BoxFuture<'_, Result<(), JobError>> {
        Box::pin(async move { run_job(&self.indexer, &self.store, &job).await })
    }
}

/// Dispatches jobs to an out-of-process broker, falling back inline.
pub struct RemoteQueueExecutor {
    client: reqwest::Client,
    broker_url: String,
    fallback: InlineExecutor,
}

impl RemoteQueueExecutor {
    #[must_use]
    pub fn new(broker_url: impl Into<String>, fallback: InlineExecutor) -> Self {
        Self {
            client: reqwest::Client::new(),
            broker_url: broker_url.into(),
            fallback,
        }
    }

    async fn dispatch(&self, job: &QueuedJob) -> Result<(), JobError> {
        let response = self
            .client
            .post(format!("{}/jobs", self.broker_url))
            .json(job)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}

impl JobExecutor for RemoteQueueExecutor {
    fn execute(&self, job: QueuedJob) -> BoxFuture<'_, Result<(), JobError>> {
        Box::pin(async move {
            match self.dispatch(&job).await {
                Ok(()) => {
                    tracing::debug!(job = %job.id, "job dispatched to broker");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(job = %job.id, "broker unreachable, running inline: {e}");
                    self.fallback.execute(job).await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::config::ChunkConfig;
    use sift_core::{ChangeEvent, ChangeKind};
    use sift_index::indexer::IndexerConfig;
    use sift_index::manifest::FileHashManifest;
    use sift_index::metadata::Enhancer;
    use sift_index::store::ChunkStore;
    use sift_store::{HashEmbedder, InMemoryVectorStore};
    use sqlx::SqlitePool;

    use crate::job::{JobKind, JobStatus};

    async fn fixture() -> (Arc<Indexer>, JobStore) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let chunk_store = ChunkStore::new(
            Arc::new(InMemoryVectorStore::new()),
            "test_chunks",
            pool.clone(),
        );
        let indexer = Indexer::new(
            chunk_store,
            FileHashManifest::new(pool.clone()),
            Arc::new(HashEmbedder::new(16)),
            Enhancer::default(),
            IndexerConfig {
                chunk: ChunkConfig::default(),
                embed_batch_size: 8,
                max_file_size_bytes: 1024 * 1024,
            },
        );
        indexer.ensure_ready().await.unwrap();
        let job_store = JobStore::new(pool);
        job_store.init().await.unwrap();
        (Arc::new(indexer), job_store)
    }

    #[tokio::test]
    async fn inline_executor_completes_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn alpha() { 1 }\n").unwrap();

        let (indexer, store) = fixture().await;
        let job = QueuedJob::new(
            JobKind::Incremental,
            vec![ChangeEvent::new(ChangeKind::Created, path)],
        );
        store.insert(&job).await.unwrap();

        let executor = InlineExecutor::new(indexer, store.clone());
        executor.execute(job.clone()).await.unwrap();

        let snapshot = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.chunks_added >= 1);
    }

    #[tokio::test]
    async fn unreadable_file_completes_with_errors() {
        let (indexer, store) = fixture().await;
        let job = QueuedJob::new(
            JobKind::Incremental,
            vec![ChangeEvent::new(ChangeKind::Created, "/no/such/file.rs")],
        );
        store.insert(&job).await.unwrap();

        InlineExecutor::new(indexer, store.clone())
            .execute(job.clone())
            .await
            .unwrap();

        let snapshot = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn cancelled_job_is_not_run() {
        let (indexer, store) = fixture().await;
        let job = QueuedJob::new(JobKind::Incremental, Vec::new());
        store.insert(&job).await.unwrap();
        store.mark_cancelled(&job.id).await.unwrap();

        InlineExecutor::new(indexer, store.clone())
            .execute(job.clone())
            .await
            .unwrap();

        let snapshot = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn remote_executor_falls_back_when_broker_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn alpha() { 1 }\n").unwrap();

        let (indexer, store) = fixture().await;
        let job = QueuedJob::new(
            JobKind::Incremental,
            vec![ChangeEvent::new(ChangeKind::Created, path)],
        );
        store.insert(&job).await.unwrap();

        let executor = RemoteQueueExecutor::new(
            "http://127.0.0.1:1",
            InlineExecutor::new(indexer, store.clone()),
        );
        executor.execute(job.clone()).await.unwrap();

        let snapshot = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
    }
}
