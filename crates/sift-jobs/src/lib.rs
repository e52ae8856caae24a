//! Background indexing jobs: non-blocking submission, monotonic status
//! tracking in `SQLite`, and pluggable execution — in-process by default,
//! dispatched to a remote broker when one is configured (with an in-process
//! fallback running the exact same job code).

pub mod error;
pub mod executor;
pub mod job;
pub mod queue;
pub mod store;

pub use error::JobError;
pub use executor::{InlineExecutor, JobExecutor, RemoteQueueExecutor};
pub use job::{JobId, JobKind, JobSnapshot, JobStatus, QueuedJob};
pub use queue::JobQueue;
pub use store::JobStore;
