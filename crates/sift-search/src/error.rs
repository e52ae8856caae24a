//! Error types for sift-search.

/// Errors that can occur on the query path.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Lexical index failure.
    #[error("lexical index error: {0}")]
    Lexical(#[from] tantivy::TantivyError),

    /// Chunk store failure.
    #[error("index error: {0}")]
    Index(#[from] sift_index::IndexError),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embed(#[from] sift_store::EmbedError),

    /// Vector store failure.
    #[error("vector store error: {0}")]
    Store(#[from] sift_store::VectorStoreError),

    /// `SQLite` failure (cache backend).
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// Result type alias using [`SearchError`].
pub type Result<T> = std::result::Result<T, SearchError>;
