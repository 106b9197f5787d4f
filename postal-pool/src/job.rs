//! Job abstraction executed by the worker pool.

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Error returned by a failed job.
///
/// Boxed so handlers can downcast to the concrete failure.
pub type JobError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Owned, type-erased job as it travels through the pool.
pub type BoxedJob = Box<dyn Job>;

/// A unit of work.
///
/// Cancellation is cooperative: the pool never aborts a running job. Long
/// jobs should check `cancel` at safe points, otherwise shutdown waits for
/// them to return.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Identifier echoed in the job's [`JobResult`].
    fn id(&self) -> &str;

    /// Run the job once.
    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError>;
}

/// Outcome of one executed job.
pub struct JobResult {
    /// ID of the job that produced this result.
    pub job_id: String,
    /// Whether the job returned `Ok`.
    pub success: bool,
    /// Present iff `success` is false.
    pub error: Option<JobError>,
}

impl JobResult {
    /// Build a result from a job's return value.
    pub fn from_outcome(job_id: impl Into<String>, outcome: Result<(), JobError>) -> Self {
        let job_id = job_id.into();
        match outcome {
            Ok(()) => Self {
                job_id,
                success: true,
                error: None,
            },
            Err(error) => Self {
                job_id,
                success: false,
                error: Some(error),
            },
        }
    }

    /// Error message, if the job failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

impl fmt::Debug for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobResult")
            .field("job_id", &self.job_id)
            .field("success", &self.success)
            .field("error", &self.error_message())
            .finish()
    }
}

/// Job backed by an async closure.
///
/// Handy for ad-hoc work and tests.
pub struct FnJob<F> {
    id: String,
    func: F,
}

impl<F, Fut> FnJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
{
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            func,
        }
    }

    /// Box the job for submission.
    pub fn boxed(self) -> BoxedJob {
        Box::new(self)
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError> {
        (self.func)(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_ok() {
        let result = JobResult::from_outcome("job-1", Ok(()));
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.job_id, "job-1");
    }

    #[test]
    fn test_result_from_err() {
        let result = JobResult::from_outcome("job-2", Err("smtp down".into()));
        assert!(!result.success);
        assert_eq!(result.error_message().as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn test_fn_job_executes() {
        let job = FnJob::new("fn-1", |_cancel| async { Ok(()) });
        assert_eq!(job.id(), "fn-1");
        assert!(job.execute(CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fn_job_sees_cancellation() {
        let job = FnJob::new("fn-2", |cancel: CancellationToken| async move {
            if cancel.is_cancelled() {
                return Err("cancelled".into());
            }
            Ok(())
        });

        let token = CancellationToken::new();
        token.cancel();
        assert!(job.execute(token).await.is_err());
    }
}
