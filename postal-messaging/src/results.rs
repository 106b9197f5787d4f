//! Handling of finished email jobs.
//!
//! The consumer drains the pool's result stream into a [`ResultHandler`].
//! This is the place to hook retries or a dead-letter topic.

use async_trait::async_trait;
use postal_pool::JobResult;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::error::MessagingError;

/// Receives every job result drained from the pool.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle(&self, result: JobResult);
}

/// Whether a failed job could succeed if its message were delivered again.
///
/// Only [`MessagingError`]s are classified; successes and foreign errors
/// count as permanent.
pub fn is_retryable(result: &JobResult) -> bool {
    result
        .error
        .as_deref()
        .and_then(|e| e.downcast_ref::<MessagingError>())
        .is_some_and(MessagingError::is_retryable)
}

/// Logs each result.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingResultHandler;

#[async_trait]
impl ResultHandler for LoggingResultHandler {
    async fn handle(&self, result: JobResult) {
        match result.error_message() {
            None => info!(job_id = %result.job_id, "Email job completed"),
            Some(error) => warn!(
                job_id = %result.job_id,
                error = %error,
                retryable = is_retryable(&result),
                "Email job failed"
            ),
        }
    }
}

/// Outcome of one job, as recorded by [`CollectingResultHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSummary {
    pub job_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub retryable: bool,
}

/// Keeps every result in memory.
#[derive(Debug, Default)]
pub struct CollectingResultHandler {
    results: Mutex<Vec<ResultSummary>>,
}

impl CollectingResultHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results seen so far, in arrival order.
    pub fn results(&self) -> Vec<ResultSummary> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResultSummary>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResultHandler for CollectingResultHandler {
    async fn handle(&self, result: JobResult) {
        let summary = ResultSummary {
            retryable: is_retryable(&result),
            error: result.error_message(),
            success: result.success,
            job_id: result.job_id,
        };
        self.lock().push(summary);
    }
}
