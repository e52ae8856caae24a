//! Non-blocking job submission and status queries.

use std::sync::Arc;

use sift_core::ChangeEvent;

use crate::error::JobError;
use crate::executor::JobExecutor;
use crate::job::{JobId, JobKind, JobSnapshot, QueuedJob};
use crate::store::JobStore;

pub struct JobQueue {
    store: JobStore,
    executor: Arc<dyn JobExecutor>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").finish_non_exhaustive()
    }
}

impl JobQueue {
    #[must_use]
    pub fn new(store: JobStore, executor: Arc<dyn JobExecutor>) -> Self {
        Self { store, executor }
    }

    /// Enqueue a job and return its id without waiting for execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the job row cannot be written. Execution
    /// failures are recorded on the job, not returned here.
    pub async fn submit(&self, events: Vec<ChangeEvent>, kind: JobKind) -> Result<JobId, JobError> {
        let job = QueuedJob::new(kind, events);
        let id = job.id.clone();
        self.store.insert(&job).await?;
        tracing::debug!(job = %job.id, events = job.events.len(), "job submitted");

        let executor = Arc::clone(&self.executor);
        let spawned_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.execute(job).await {
                tracing::error!(job = %spawned_id, "job execution error: {e}");
            }
        });

        Ok(id)
    }

    /// Current state of a job; `None` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_status(&self, id: &JobId) -> Result<Option<JobSnapshot>, JobError> {
        self.store.get(id).await
    }

    /// The `n` most recently submitted jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_recent(&self, n: usize) -> Result<Vec<JobSnapshot>, JobError> {
        self.store.list_recent(n).await
    }

    /// Cancel a job. Returns true when the job was still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn cancel(&self, id: &JobId) -> Result<bool, JobError> {
        self.store.mark_cancelled(id).await
    }
}
