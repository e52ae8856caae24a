//! Error types for sift-index.

use std::path::PathBuf;

/// Errors that can occur during indexing operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// File unreadable or over the size ceiling. Recorded per file; never
    /// aborts a batch.
    #[error("failed to read {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },

    /// Embedding provider failure. Fails the job; resubmitting the same
    /// events is safe.
    #[error("embedding error: {0}")]
    Embedding(#[from] sift_store::EmbedError),

    /// Vector store failure. Fails the job; writes are idempotent so a
    /// retry cannot corrupt state.
    #[error("vector store error: {0}")]
    Store(#[from] sift_store::VectorStoreError),

    /// `SQLite` failure (chunk table, manifest).
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Ignore glob failed to compile.
    #[error("invalid glob pattern `{pattern}`: {reason}")]
    Glob { pattern: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`IndexError`].
pub type Result<T> = std::result::Result<T, IndexError>;
