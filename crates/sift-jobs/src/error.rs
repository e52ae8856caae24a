//! Error types for sift-jobs.

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("broker dispatch failed: {0}")]
    Broker(#[from] reqwest::Error),
}
