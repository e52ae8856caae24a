//! `SQLite`-backed job rows with transition guards in SQL.
//!
//! Every state change is a conditional UPDATE on the current status, so
//! concurrent writers cannot move a job backwards or out of a terminal
//! state regardless of interleaving.

use sqlx::SqlitePool;

use sift_index::indexer::IndexReport;

use crate::error::JobError;
use crate::job::{JobId, JobKind, JobSnapshot, JobStatus, QueuedJob};

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `index_jobs` table.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL statement fails.
    pub async fn init(&self) -> Result<(), JobError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                events TEXT NOT NULL,
                total_events INTEGER NOT NULL,
                files_processed INTEGER NOT NULL DEFAULT 0,
                chunks_added INTEGER NOT NULL DEFAULT 0,
                chunks_updated INTEGER NOT NULL DEFAULT 0,
                chunks_removed INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a new pending job.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert fails.
    pub async fn insert(&self, job: &QueuedJob) -> Result<(), JobError> {
        let events = serde_json::to_string(&job.events)?;
        let total = i64::try_from(job.events.len()).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO index_jobs (id, kind, status, events, total_events)
             VALUES (?, ?, 'pending', ?, ?)",
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(events)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a pending job to processing. Returns false when the job was
    /// already past pending (e.g. cancelled first).
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn mark_processing(&self, id: &JobId) -> Result<bool, JobError> {
        let result =
            sqlx::query("UPDATE index_jobs SET status = 'processing' WHERE id = ? AND status = 'pending'")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel a job; honored only while pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn mark_cancelled(&self, id: &JobId) -> Result<bool, JobError> {
        let result =
            sqlx::query("UPDATE index_jobs SET status = 'cancelled' WHERE id = ? AND status = 'pending'")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a finished run: completed with its report, per-file errors
    /// included.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the statement fails.
    pub async fn complete(&self, id: &JobId, report: &IndexReport) -> Result<bool, JobError> {
        let errors = serde_json::to_string(&report.errors)?;
        let result = sqlx::query(
            "UPDATE index_jobs SET status = 'completed', files_processed = ?,
                 chunks_added = ?, chunks_updated = ?, chunks_removed = ?, errors = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(i64::try_from(report.files_processed).unwrap_or(i64::MAX))
        .bind(i64::try_from(report.chunks_added).unwrap_or(i64::MAX))
        .bind(i64::try_from(report.chunks_updated).unwrap_or(i64::MAX))
        .bind(i64::try_from(report.chunks_removed).unwrap_or(i64::MAX))
        .bind(errors)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed run with its error text and whatever partial
    /// progress the report carries.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the statement fails.
    pub async fn fail(
        &self,
        id: &JobId,
        report: &IndexReport,
        error: &str,
    ) -> Result<bool, JobError> {
        let errors = serde_json::to_string(&report.errors)?;
        let result = sqlx::query(
            "UPDATE index_jobs SET status = 'failed', files_processed = ?,
                 chunks_added = ?, chunks_updated = ?, chunks_removed = ?, errors = ?, error = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(i64::try_from(report.files_processed).unwrap_or(i64::MAX))
        .bind(i64::try_from(report.chunks_added).unwrap_or(i64::MAX))
        .bind(i64::try_from(report.chunks_updated).unwrap_or(i64::MAX))
        .bind(i64::try_from(report.chunks_removed).unwrap_or(i64::MAX))
        .bind(errors)
        .bind(error)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current snapshot of a job; `None` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, id: &JobId) -> Result<Option<JobSnapshot>, JobError> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, kind, status, total_events, files_processed,
                    chunks_added, chunks_updated, chunks_removed, errors, error
             FROM index_jobs WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_snapshot).transpose()
    }

    /// The `n` most recently created jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_recent(&self, n: usize) -> Result<Vec<JobSnapshot>, JobError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, kind, status, total_events, files_processed,
                    chunks_added, chunks_updated, chunks_removed, errors, error
             FROM index_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_snapshot).collect()
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    kind: String,
    status: String,
    total_events: i64,
    files_processed: i64,
    chunks_added: i64,
    chunks_updated: i64,
    chunks_removed: i64,
    errors: String,
    error: Option<String>,
}

impl JobRow {
    fn into_snapshot(self) -> Result<JobSnapshot, JobError> {
        let errors: Vec<String> = serde_json::from_str(&self.errors)?;
        Ok(JobSnapshot {
            id: JobId::from(self.id),
            kind: JobKind::from_str_kind(&self.kind),
            status: JobStatus::from_str_status(&self.status).unwrap_or(JobStatus::Failed),
            total_events: usize::try_from(self.total_events).unwrap_or(0),
            files_processed: usize::try_from(self.files_processed).unwrap_or(0),
            chunks_added: usize::try_from(self.chunks_added).unwrap_or(0),
            chunks_updated: usize::try_from(self.chunks_updated).unwrap_or(0),
            chunks_removed: usize::try_from(self.chunks_removed).unwrap_or(0),
            errors,
            error: self.error,
        })
    }
}
