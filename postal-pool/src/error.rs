//! Error types for worker pool operations.

use crate::job::BoxedJob;
use std::fmt;
use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Pool-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Job queue has no free slot
    #[error("Job queue is full")]
    QueueFull,

    /// Pool cancellation has fired
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    /// Pool was stopped and cannot be reused
    #[error("Worker pool is stopped")]
    Stopped,

    /// `start()` was called on a running pool
    #[error("Worker pool already started")]
    AlreadyStarted,

    /// Operation requires a running pool
    #[error("Worker pool not started")]
    NotStarted,

    /// Drain did not finish within the shutdown budget
    #[error("Timeout waiting for workers to finish")]
    ShutdownTimeout,

    /// The background drain task itself failed
    #[error("Shutdown task failed: {0}")]
    ShutdownFailed(String),

    /// A job panicked while executing
    #[error("Job panicked: {0}")]
    JobPanicked(String),
}

/// A rejected submission.
///
/// Carries the job back to the caller so it can be retried through another
/// path (for example `submit_blocking` after a `QueueFull`).
pub struct SubmitError {
    reason: PoolError,
    job: BoxedJob,
}

impl SubmitError {
    pub(crate) fn new(reason: PoolError, job: BoxedJob) -> Self {
        Self { reason, job }
    }

    /// Why the job was rejected.
    pub fn reason(&self) -> &PoolError {
        &self.reason
    }

    /// Whether the rejection was only due to a full queue.
    pub fn is_queue_full(&self) -> bool {
        self.reason == PoolError::QueueFull
    }

    /// Take the rejected job back.
    pub fn into_job(self) -> BoxedJob {
        self.job
    }

    /// Split into the reason and the job.
    pub fn into_parts(self) -> (PoolError, BoxedJob) {
        (self.reason, self.job)
    }
}

impl fmt::Debug for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitError")
            .field("reason", &self.reason)
            .field("job_id", &self.job.id())
            .finish()
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to submit job {}: {}", self.job.id(), self.reason)
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

impl From<SubmitError> for PoolError {
    fn from(err: SubmitError) -> Self {
        err.reason
    }
}
