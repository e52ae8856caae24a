//! sift — incremental corpus indexing with hybrid retrieval.
//!
//! [`Sift`] wires the subsystem together from a [`Config`]: a chunk store
//! over the configured vector backend, the incremental indexer, a job
//! queue, the hybrid search engine, the token-budget optimizer, and a TTL
//! result cache. Consumers call [`Sift::index`] / [`Sift::submit`] with
//! change events and [`Sift::search`] for ranked, budget-fitted context.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::mpsc;

pub use sift_core::{ChangeEvent, ChangeKind, Chunk, Config, SearchHit};
pub use sift_index::indexer::IndexReport;
pub use sift_jobs::{JobId, JobKind, JobSnapshot, JobStatus};

use sift_index::indexer::{Indexer, IndexerConfig};
use sift_index::manifest::FileHashManifest;
use sift_index::metadata::Enhancer;
use sift_index::store::ChunkStore;
use sift_index::watcher::{Admission, FileWatcher, WatcherOptions};
use sift_jobs::{InlineExecutor, JobExecutor, JobQueue, JobStore, RemoteQueueExecutor};
use sift_search::cache::{self, QueryCache};
use sift_search::rerank::DiversityRerank;
use sift_search::{HybridEngine, context, optimizer};
use sift_store::{Embedder, HashEmbedder, HttpEmbedder, InMemoryVectorStore, QdrantStore, VectorStore};

pub struct Sift {
    config: Config,
    indexer: Arc<Indexer>,
    engine: Arc<HybridEngine>,
    queue: Arc<JobQueue>,
    cache: Arc<QueryCache>,
    watcher: Option<FileWatcher>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for Sift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sift")
            .field("watching", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Sift {
    /// Construct and initialize every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration or when a store cannot be
    /// initialized.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let pool = sqlx::SqlitePool::connect(&config.store.database_url)
            .await
            .context("failed to open database")?;

        let vectors: Arc<dyn VectorStore> = match &config.store.qdrant_url {
            Some(url) => Arc::new(QdrantStore::new(url)?),
            None => Arc::new(InMemoryVectorStore::new()),
        };

        let embedder: Arc<dyn Embedder> = match &config.embedding.base_url {
            Some(base) => Arc::new(HttpEmbedder::new(
                base,
                &config.embedding.model,
                std::env::var("SIFT_EMBEDDING_API_KEY").ok(),
                config.embedding.dim,
            )),
            None => Arc::new(HashEmbedder::new(config.embedding.dim)),
        };

        let chunk_store = ChunkStore::new(vectors, &config.store.collection, pool.clone());
        let indexer = Arc::new(Indexer::new(
            chunk_store.clone(),
            FileHashManifest::new(pool.clone()),
            Arc::clone(&embedder),
            Enhancer::default(),
            IndexerConfig {
                chunk: config.chunk.clone(),
                embed_batch_size: config.embedding.batch_size,
                max_file_size_bytes: config.watch.max_file_size_bytes(),
            },
        ));
        indexer.ensure_ready().await?;

        let job_store = JobStore::new(pool);
        job_store.init().await?;
        let inline = InlineExecutor::new(Arc::clone(&indexer), job_store.clone());
        let executor: Arc<dyn JobExecutor> = match &config.jobs.broker_url {
            Some(url) => Arc::new(RemoteQueueExecutor::new(url, inline.clone())),
            None => Arc::new(inline),
        };
        let queue = Arc::new(JobQueue::new(job_store, executor));

        let engine = Arc::new(
            HybridEngine::new(chunk_store, embedder, config.hybrid.clone())?
                .with_rerank(Box::new(DiversityRerank::default())),
        );

        let backend = cache::build_backend(&config.cache).await;
        let cache = Arc::new(QueryCache::new(
            backend,
            Duration::from_secs(config.cache.ttl_seconds),
        ));

        Ok(Self {
            config,
            indexer,
            engine,
            queue,
            cache,
            watcher: None,
            pump: None,
        })
    }

    /// Apply change events synchronously, then refresh the lexical
    /// snapshot and drop cached results.
    pub async fn index(&self, events: &[ChangeEvent]) -> IndexReport {
        let report = self.indexer.process_batch(events).await;
        if let Err(e) = self.engine.refresh().await {
            tracing::warn!("lexical refresh failed: {e}");
        }
        self.cache.invalidate_all().await;
        report
    }

    /// Submit change events as a background job. Call [`Sift::refresh`]
    /// once the job completes to fold the new corpus snapshot into
    /// lexical search (the watcher pipeline does this automatically).
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be enqueued.
    pub async fn submit(&self, events: Vec<ChangeEvent>, kind: JobKind) -> anyhow::Result<JobId> {
        Ok(self.queue.submit(events, kind).await?)
    }

    /// Rebuild the lexical snapshot and drop cached results.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot rebuild fails.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        self.engine.refresh().await?;
        self.cache.invalidate_all().await;
        Ok(())
    }

    /// Walk `root` and submit a full-reindex job covering the delta
    /// between disk and the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan or submission fails.
    pub async fn reindex_all(&self, root: &Path) -> anyhow::Result<JobId> {
        let admission = Admission::from_config(&self.config.watch)?;
        let events = self.indexer.scan(root, &admission).await?;
        self.submit(events, JobKind::Full).await
    }

    /// Status of a submitted job; `None` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn job_status(&self, id: &JobId) -> anyhow::Result<Option<JobSnapshot>> {
        Ok(self.queue.get_status(id).await?)
    }

    /// The `n` most recent jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn recent_jobs(&self, n: usize) -> anyhow::Result<Vec<JobSnapshot>> {
        Ok(self.queue.list_recent(n).await?)
    }

    /// Ranked hybrid hits for `query`, no budget fitting.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    pub async fn search_hits(&self, query: &str) -> anyhow::Result<Vec<SearchHit>> {
        Ok(self.engine.search(query).await?)
    }

    /// Cached, budget-fitted, formatted context for `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails. Cache failures are silent.
    pub async fn search(&self, query: &str, max_tokens: usize) -> anyhow::Result<String> {
        let key = cache::fingerprint(query, self.config.hybrid.k_final, max_tokens);
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!("cache hit");
            return Ok(hit);
        }

        let hits = self.engine.search(query).await?;
        let fitted = optimizer::optimize(
            &hits,
            max_tokens,
            self.config.optimizer.preserve_top_n,
            &self.config.optimizer,
        );
        let formatted = context::format_context(&fitted);
        self.cache.put(&key, formatted.clone()).await;
        Ok(formatted)
    }

    /// Start watching the configured directories. Flushed batches are
    /// submitted as incremental jobs; after each finishes, the lexical
    /// snapshot is refreshed and the cache dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot start.
    pub fn watch(&mut self) -> anyhow::Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<Vec<ChangeEvent>>(16);
        let admission = Admission::from_config(&self.config.watch)?;
        let options = WatcherOptions::from_config(&self.config.watch);
        let watcher = FileWatcher::start(&options, admission, tx)?;

        let queue = Arc::clone(&self.queue);
        let engine = Arc::clone(&self.engine);
        let cache = Arc::clone(&self.cache);
        let pump = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let id = match queue.submit(batch, JobKind::Incremental).await {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::error!("job submission failed: {e}");
                        continue;
                    }
                };
                wait_terminal(&queue, &id).await;
                if let Err(e) = engine.refresh().await {
                    tracing::warn!("lexical refresh failed: {e}");
                }
                cache.invalidate_all().await;
            }
        });

        self.watcher = Some(watcher);
        self.pump = Some(pump);
        Ok(())
    }

    /// Stop watching and drain the in-flight batch pipeline.
    pub async fn stop_watching(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

async fn wait_terminal(queue: &JobQueue, id: &JobId) {
    loop {
        match queue.get_status(id).await {
            Ok(Some(snapshot)) if snapshot.status.is_terminal() => break,
            Ok(Some(_)) => tokio::time::sleep(Duration::from_millis(50)).await,
            Ok(None) | Err(_) => break,
        }
    }
}
