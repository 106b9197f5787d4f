//! Pooled queue consumer.
//!
//! Reads email events from a broker and hands each one to a [`WorkerPool`]
//! as an [`EmailJob`]. Offsets are committed as soon as the job is queued,
//! not when it finishes. A crash between commit and delivery loses that
//! email; use [`SequentialConsumer`](crate::SequentialConsumer) when that
//! matters more than throughput.

use postal_mail::EmailSender;
use postal_pool::{BoxedJob, Job, PoolError, PoolState, WorkerPool};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerMessage, BrokerReader};
use crate::error::{MessagingError, Result};
use crate::job::EmailJob;
use crate::results::{LoggingResultHandler, ResultHandler};

/// Pause after a failed fetch.
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(1);

/// Broker consumer that executes deliveries on a worker pool.
pub struct PooledConsumer {
    reader: Arc<dyn BrokerReader>,
    sender: Arc<dyn EmailSender>,
    pool: WorkerPool,
    handler: Arc<dyn ResultHandler>,
    fetch_backoff: Duration,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl PooledConsumer {
    /// Create a consumer. The pool must be started before [`start`](Self::start).
    pub fn new(reader: Arc<dyn BrokerReader>, sender: Arc<dyn EmailSender>, pool: WorkerPool) -> Self {
        Self {
            reader,
            sender,
            pool,
            handler: Arc::new(LoggingResultHandler),
            fetch_backoff: DEFAULT_FETCH_BACKOFF,
            drain: Mutex::new(None),
        }
    }

    /// Send job results to `handler` instead of only logging them.
    pub fn with_result_handler(mut self, handler: Arc<dyn ResultHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_fetch_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_backoff = backoff;
        self
    }

    /// The pool jobs are submitted to.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Consume until `cancel` fires.
    ///
    /// Returns [`MessagingError::Cancelled`] on cancellation. Fetch errors
    /// are logged and retried after the backoff; a closed reader ends the
    /// loop with its error.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        match self.pool.state() {
            PoolState::Running => {}
            PoolState::Idle => return Err(PoolError::NotStarted.into()),
            PoolState::Stopping | PoolState::Stopped => return Err(PoolError::Stopped.into()),
        }

        self.spawn_drain();
        info!(workers = self.pool.worker_count(), "Starting pooled email consumer");

        loop {
            let message = fetch_next(self.reader.as_ref(), &cancel, self.fetch_backoff).await?;
            let position = message.position.clone();
            let job = EmailJob::new(message, self.sender.clone());
            let job_id = job.id().to_string();

            match self.enqueue(Box::new(job), &cancel).await {
                Ok(()) => debug!(job_id = %job_id, position = %position, "Email job submitted"),
                Err(MessagingError::Cancelled) => return Err(MessagingError::Cancelled),
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to submit email job");
                    continue;
                }
            }

            if let Err(e) = self.reader.commit(&position).await {
                error!(position = %position, error = %e, "Failed to commit offset");
            }
        }
    }

    /// Stop reading from the broker. The pool keeps running.
    pub async fn close(&self) -> Result<()> {
        info!("Closing pooled email consumer");
        self.reader.close().await
    }

    /// Wait until every result has reached the handler.
    ///
    /// Completes once the pool has been stopped and its result stream is
    /// drained.
    pub async fn wait_for_results(&self) {
        let handle = lock(&self.drain).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Result drain task failed");
            }
        }
    }

    async fn enqueue(&self, job: BoxedJob, cancel: &CancellationToken) -> Result<()> {
        let job = match self.pool.submit(job) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_queue_full() => e.into_job(),
            Err(e) => return Err(PoolError::from(e).into()),
        };

        debug!(job_id = %job.id(), "Job queue full, waiting for space");
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(MessagingError::Cancelled),
            submitted = self.pool.submit_blocking(job) => {
                submitted.map_err(|e| MessagingError::Pool(e.into()))
            }
        }
    }

    fn spawn_drain(&self) {
        let mut drain = lock(&self.drain);
        if drain.is_some() {
            return;
        }
        let Some(mut results) = self.pool.take_results() else {
            warn!("Pool results already taken, not draining");
            return;
        };

        let handler = self.handler.clone();
        *drain = Some(tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                handler.handle(result).await;
            }
            debug!("Result stream closed");
        }));
    }
}

/// Fetch the next record, backing off after failures.
pub(crate) async fn fetch_next(
    reader: &dyn BrokerReader,
    cancel: &CancellationToken,
    backoff: Duration,
) -> Result<BrokerMessage> {
    loop {
        let fetched = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(MessagingError::Cancelled),
            fetched = reader.fetch_message() => fetched,
        };

        match fetched {
            Ok(message) => return Ok(message),
            Err(_) if cancel.is_cancelled() => return Err(MessagingError::Cancelled),
            Err(e @ MessagingError::ChannelClosed(_)) => return Err(e),
            Err(e) => {
                error!(error = %e, "Failed to fetch message");
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return Err(MessagingError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OutboundMessage;
    use crate::memory::InMemoryBroker;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;

    struct NoopSender;

    #[async_trait]
    impl EmailSender for NoopSender {
        async fn send_email(
            &self,
            _from: &str,
            _to: &str,
            _subject: &str,
            _template: &str,
            _data: &HashMap<String, Value>,
        ) -> postal_mail::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_requires_running_pool() {
        let broker = InMemoryBroker::new("t");
        let pool = WorkerPool::new(1, 1);
        let consumer = PooledConsumer::new(Arc::new(broker.reader()), Arc::new(NoopSender), pool.clone());

        let err = consumer.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Pool(PoolError::NotStarted)));

        pool.start().unwrap();
        pool.stop().await.unwrap();
        let err = consumer.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Pool(PoolError::Stopped)));
    }

    #[tokio::test]
    async fn test_fetch_next_backs_off_then_succeeds() {
        let broker = InMemoryBroker::new("t");
        let reader = broker.reader();
        broker.push(OutboundMessage::new("x"));
        broker.fail_next_fetches(2);

        let started = tokio::time::Instant::now();
        let message = fetch_next(&reader, &CancellationToken::new(), Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(message.payload, b"x");
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_fetch_next_cancelled_during_backoff() {
        let broker = InMemoryBroker::new("t");
        let reader = broker.reader();
        broker.fail_next_fetches(1);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let err = fetch_next(&reader, &cancel, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_next_stops_on_closed_reader() {
        let broker = InMemoryBroker::new("t");
        let reader = broker.reader();
        reader.close().await.unwrap();

        let err = fetch_next(&reader, &CancellationToken::new(), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::ChannelClosed(_)));
    }
}
