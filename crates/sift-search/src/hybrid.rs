//! Hybrid retrieval: vector and BM25 searches run concurrently, each list
//! is normalized by its own maximum, and the pool is merged with weighted
//! scores.
//!
//! A chunk found by both signals enters the pool twice, each entry carrying
//! the full weighted sum of both normalized scores; keep-first dedup then
//! collapses it. Consensus hits therefore outrank single-signal hits at
//! the same raw strength, which is the point.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use sift_core::config::HybridConfig;
use sift_core::{Ordinal, SearchHit};
use sift_index::store::ChunkStore;
use sift_store::Embedder;

use crate::error::Result;
use crate::lexical::LexicalIndex;
use crate::rerank::Rerank;

pub struct HybridEngine {
    store: ChunkStore,
    embedder: Arc<dyn Embedder>,
    lexical: RwLock<LexicalIndex>,
    config: HybridConfig,
    rerankers: Vec<Box<dyn Rerank>>,
}

impl std::fmt::Debug for HybridEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HybridEngine {
    /// Build an engine with an empty lexical snapshot; call
    /// [`HybridEngine::refresh`] after indexing.
    ///
    /// # Errors
    ///
    /// Returns an error if the empty lexical index cannot be created.
    pub fn new(
        store: ChunkStore,
        embedder: Arc<dyn Embedder>,
        config: HybridConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            lexical: RwLock::new(LexicalIndex::build(&[])?),
            config,
            rerankers: Vec::new(),
        })
    }

    /// Append a rerank pass applied after the merge, in registration order.
    #[must_use]
    pub fn with_rerank(mut self, rerank: Box<dyn Rerank>) -> Self {
        self.rerankers.push(rerank);
        self
    }

    /// Rebuild the lexical snapshot from the chunk store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store snapshot or index build fails.
    pub async fn refresh(&self) -> Result<()> {
        let chunks = self.store.all_chunks().await?;
        let rebuilt = LexicalIndex::build(&chunks)?;
        tracing::debug!(chunks = rebuilt.len(), "lexical index rebuilt");
        *self.lexical.write().await = rebuilt;
        Ok(())
    }

    /// Hybrid search returning at most `k_final` hits with distinct
    /// `(path, ordinal)` keys, scores in [0, 1].
    ///
    /// # Errors
    ///
    /// Returns an error if embedding, the vector store, or the lexical
    /// search fails.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query_vec = self
            .embedder
            .embed_batch(&[query.to_owned()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let lexical = self.lexical.read().await;
        let (vector_hits, bm25_hits) = tokio::join!(
            async {
                self.store
                    .search(query_vec, u64::try_from(self.config.k_vector).unwrap_or(u64::MAX))
                    .await
            },
            async { lexical.search(query, self.config.k_bm25) },
        );
        drop(lexical);

        let merged = merge(
            vector_hits?,
            bm25_hits?,
            self.config.vector_weight,
            self.config.bm25_weight,
            self.config.k_final,
        );

        let mut hits = merged;
        for rerank in &self.rerankers {
            hits = rerank.rerank(hits);
            debug_assert!(no_duplicate_keys(&hits), "rerank {} broke dedup", rerank.name());
        }
        Ok(hits)
    }
}

type Key = (String, Ordinal);

fn key_of(hit: &SearchHit) -> Key {
    (hit.chunk.path.clone(), hit.chunk.ordinal)
}

/// Divide every score by the list's own max; a non-positive max divides
/// by 1 instead.
fn normalize(hits: &mut [SearchHit]) {
    let max = hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
    let divisor = if max > 0.0 { max } else { 1.0 };
    for hit in hits {
        hit.score /= divisor;
    }
}

/// Weighted merge of the two hit lists. Pure; exposed for tests.
#[must_use]
pub fn merge(
    mut vector_hits: Vec<SearchHit>,
    mut bm25_hits: Vec<SearchHit>,
    vector_weight: f32,
    bm25_weight: f32,
    k_final: usize,
) -> Vec<SearchHit> {
    normalize(&mut vector_hits);
    normalize(&mut bm25_hits);

    let vector_scores: HashMap<Key, f32> = vector_hits
        .iter()
        .map(|h| (key_of(h), h.score))
        .collect();
    let bm25_scores: HashMap<Key, f32> =
        bm25_hits.iter().map(|h| (key_of(h), h.score)).collect();

    let mut pool: Vec<SearchHit> = vector_hits
        .into_iter()
        .chain(bm25_hits)
        .map(|mut hit| {
            let key = key_of(&hit);
            hit.score = vector_weight * vector_scores.get(&key).copied().unwrap_or(0.0)
                + bm25_weight * bm25_scores.get(&key).copied().unwrap_or(0.0);
            hit
        })
        .collect();

    pool.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut seen = std::collections::HashSet::new();
    pool.retain(|hit| seen.insert(key_of(hit)));
    pool.truncate(k_final);
    pool
}

fn no_duplicate_keys(hits: &[SearchHit]) -> bool {
    let mut seen = std::collections::HashSet::new();
    hits.iter().all(|h| seen.insert(key_of(h)))
}
