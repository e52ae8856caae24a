//! Dual-write chunk store: vectors in a [`VectorStore`], chunk rows in
//! `SQLite`.
//!
//! The `SQLite` side is the bookkeeping surface — which chunk ids exist for
//! a path, full corpus snapshots for lexical index rebuilds — while the
//! vector side serves similarity search. All writes are keyed by the
//! deterministic chunk id, so re-running any mutation is harmless.

use std::sync::Arc;

use sqlx::SqlitePool;

use sift_core::{Chunk, ChunkId, ChunkKind, ChunkMetadata, Ordinal, SearchHit};
use sift_store::{Payload, VectorPoint, VectorStore};

use crate::error::Result;

#[derive(Clone)]
pub struct ChunkStore {
    vectors: Arc<dyn VectorStore>,
    collection: String,
    pool: SqlitePool,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl ChunkStore {
    #[must_use]
    pub fn new(vectors: Arc<dyn VectorStore>, collection: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            vectors,
            collection: collection.into(),
            pool,
        }
    }

    /// Create the chunks table.
    ///
    /// # Errors
    ///
    /// Returns an error if a SQL statement fails.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                ordinal TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks (path)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Ensure the vector collection exists. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector store call fails.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<()> {
        self.vectors
            .ensure_collection(&self.collection, vector_size)
            .await?;
        Ok(())
    }

    /// Upsert chunks with their embeddings into both stores.
    ///
    /// # Errors
    ///
    /// Returns an error if either store fails. The vector store is written
    /// first; `SQLite` rows follow, so a failure never leaves rows that the
    /// vector store does not cover.
    pub async fn upsert_chunks(&self, chunks: &[Chunk], embeddings: Vec<Vec<f32>>) -> Result<()> {
        debug_assert_eq!(chunks.len(), embeddings.len());
        if chunks.is_empty() {
            return Ok(());
        }

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| {
                Ok(VectorPoint {
                    id: chunk.id.as_str().to_owned(),
                    vector,
                    payload: chunk_to_payload(chunk)?,
                })
            })
            .collect::<Result<_>>()?;

        self.vectors.upsert(&self.collection, points).await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT OR REPLACE INTO chunks (id, path, ordinal, kind, content, metadata)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.id.as_str())
            .bind(&chunk.path)
            .bind(chunk.ordinal.to_string())
            .bind(chunk.kind.as_str())
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// All chunk ids currently stored for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn chunk_ids_for_path(&self, path: &str) -> Result<Vec<ChunkId>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM chunks WHERE path = ?")
            .bind(path)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| ChunkId::from(id)).collect())
    }

    /// Delete specific chunk ids from both stores. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if either store fails.
    pub async fn remove_ids(&self, ids: &[ChunkId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.vectors
            .delete_by_ids(
                &self.collection,
                ids.iter().map(|id| id.as_str().to_owned()).collect(),
            )
            .await?;
        for id in ids {
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Delete every chunk stored for `path`, returning how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if either store fails.
    pub async fn remove_path(&self, path: &str) -> Result<usize> {
        let ids = self.chunk_ids_for_path(path).await?;
        let count = ids.len();
        self.remove_ids(&ids).await?;
        Ok(count)
    }

    /// Similarity search, returning hydrated chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector store fails.
    pub async fn search(&self, vector: Vec<f32>, limit: u64) -> Result<Vec<SearchHit>> {
        let scored = self
            .vectors
            .search(&self.collection, vector, limit, None)
            .await?;
        Ok(scored
            .into_iter()
            .filter_map(|p| {
                let chunk = chunk_from_payload(&p.payload)?;
                Some(SearchHit {
                    chunk,
                    score: p.score,
                })
            })
            .collect())
    }

    /// Full corpus snapshot from `SQLite`, for lexical index rebuilds.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let rows: Vec<(String, String, String, String, String)> =
            sqlx::query_as("SELECT path, ordinal, kind, content, metadata FROM chunks")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(path, ordinal, kind, content, metadata)| {
                row_to_chunk(&path, &ordinal, &kind, content, &metadata)
            })
            .collect())
    }

    /// Total stored chunk count.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(row.0).unwrap_or(0))
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn chunk_to_payload(chunk: &Chunk) -> Result<Payload> {
    let mut payload = Payload::new();
    payload.insert("path".into(), serde_json::json!(chunk.path));
    payload.insert("ordinal".into(), serde_json::json!(chunk.ordinal.to_string()));
    payload.insert("kind".into(), serde_json::json!(chunk.kind.as_str()));
    payload.insert("content".into(), serde_json::json!(chunk.content));
    payload.insert(
        "metadata".into(),
        serde_json::json!(serde_json::to_string(&chunk.metadata)?),
    );
    Ok(payload)
}

fn chunk_from_payload(payload: &Payload) -> Option<Chunk> {
    let get_str = |key: &str| payload.get(key).and_then(|v| v.as_str());
    row_to_chunk(
        get_str("path")?,
        get_str("ordinal")?,
        get_str("kind")?,
        get_str("content")?.to_owned(),
        get_str("metadata")?,
    )
}

fn row_to_chunk(
    path: &str,
    ordinal: &str,
    kind: &str,
    content: String,
    metadata: &str,
) -> Option<Chunk> {
    let ordinal: Ordinal = ordinal.parse().ok()?;
    let kind = match kind {
        "code" => ChunkKind::Code,
        "text" => ChunkKind::Text,
        _ => return None,
    };
    let metadata: ChunkMetadata = serde_json::from_str(metadata).ok()?;
    Some(Chunk::new(path, ordinal, kind, content, metadata))
}
