//! Bounded worker pool.

use crate::error::{PoolError, PoolResult, SubmitError};
use crate::job::{BoxedJob, JobError, JobResult};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Capacity of the job queue
    pub job_buffer: usize,

    /// Capacity of the result queue
    pub result_buffer: usize,

    /// Name used in log lines
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            job_buffer: 100,
            result_buffer: 100,
            name: "worker-pool".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with `workers` workers and both queues sized `buffer_size`.
    pub fn new(workers: usize, buffer_size: usize) -> Self {
        Self {
            workers,
            job_buffer: buffer_size,
            result_buffer: buffer_size,
            ..Default::default()
        }
    }

    /// Set the job queue capacity.
    pub fn with_job_buffer(mut self, size: usize) -> Self {
        self.job_buffer = size;
        self
    }

    /// Set the result queue capacity.
    pub fn with_result_buffer(mut self, size: usize) -> Self {
        self.result_buffer = size;
        self
    }

    /// Set the pool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.job_buffer = self.job_buffer.max(1);
        self.result_buffer = self.result_buffer.max(1);
        self
    }
}

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    /// Constructed, workers not spawned yet
    Idle = 0,
    /// Workers are running
    Running = 1,
    /// `stop()` is draining the queue
    Stopping = 2,
    /// Terminal
    Stopped = 3,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::Idle,
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            _ => PoolState::Stopped,
        }
    }
}

struct Inner {
    config: PoolConfig,
    state: AtomicU8,
    cancel: CancellationToken,
    job_tx: Mutex<Option<mpsc::Sender<BoxedJob>>>,
    job_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<BoxedJob>>>,
    result_tx: Mutex<Option<mpsc::Sender<JobResult>>>,
    result_rx: Mutex<Option<mpsc::Receiver<JobResult>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-size pool of async workers pulling jobs from a bounded queue.
///
/// Each executed job yields exactly one [`JobResult`] on the result stream
/// returned by [`WorkerPool::take_results`]. That stream must be drained:
/// once it is full, workers wait on publishing and stop picking up jobs.
///
/// Cancellation is cooperative. Jobs receive the pool's token, but a job
/// that ignores it keeps its worker busy until it returns.
///
/// # Examples
///
/// ```
/// use postal_pool::{FnJob, WorkerPool};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = WorkerPool::new(4, 16);
/// let mut results = pool.take_results().expect("results taken once");
/// pool.start()?;
///
/// pool.submit(FnJob::new("job-1", |_cancel| async { Ok(()) }).boxed())?;
///
/// pool.stop().await?;
/// while let Some(result) = results.recv().await {
///     println!("{} -> {}", result.job_id, result.success);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// Create a pool with `workers` workers and both queues sized `buffer_size`.
    pub fn new(workers: usize, buffer_size: usize) -> Self {
        Self::with_config(PoolConfig::new(workers, buffer_size))
    }

    /// Create a pool from a configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        let config = config.normalized();
        let (job_tx, job_rx) = mpsc::channel(config.job_buffer);
        let (result_tx, result_rx) = mpsc::channel(config.result_buffer);

        Self {
            inner: Arc::new(Inner {
                config,
                state: AtomicU8::new(PoolState::Idle as u8),
                cancel: CancellationToken::new(),
                job_tx: Mutex::new(Some(job_tx)),
                job_rx: Arc::new(tokio::sync::Mutex::new(job_rx)),
                result_tx: Mutex::new(Some(result_tx)),
                result_rx: Mutex::new(Some(result_rx)),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pool configuration after normalization.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.inner.config.workers
    }

    /// Jobs waiting in the queue.
    pub fn pending_jobs(&self) -> usize {
        lock(&self.inner.job_tx)
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Token passed to every job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Take the receiving side of the result stream.
    ///
    /// Returns `None` after the first call. The stream ends once the pool
    /// is stopped and every worker has exited.
    pub fn take_results(&self) -> Option<mpsc::Receiver<JobResult>> {
        lock(&self.inner.result_rx).take()
    }

    /// Spawn the workers.
    pub fn start(&self) -> PoolResult<()> {
        match self.inner.state.compare_exchange(
            PoolState::Idle as u8,
            PoolState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) if current == PoolState::Running as u8 => {
                return Err(PoolError::AlreadyStarted);
            }
            Err(_) => return Err(PoolError::Stopped),
        }

        let results = lock(&self.inner.result_tx).clone().ok_or(PoolError::Stopped)?;

        let mut handles = lock(&self.inner.handles);
        for worker_id in 0..self.inner.config.workers {
            let rx = self.inner.job_rx.clone();
            let results = results.clone();
            let cancel = self.inner.cancel.clone();
            let pool = self.inner.config.name.clone();

            handles.push(tokio::spawn(async move {
                run_worker(worker_id, pool, rx, results, cancel).await;
            }));
        }

        info!(
            pool = %self.inner.config.name,
            workers = self.inner.config.workers,
            buffer = self.inner.config.job_buffer,
            "Worker pool started"
        );

        Ok(())
    }

    /// Queue a job without waiting.
    ///
    /// Fails immediately with [`PoolError::QueueFull`] when the queue has no
    /// free slot. The rejected job is returned inside the error.
    pub fn submit(&self, job: BoxedJob) -> Result<(), SubmitError> {
        if self.inner.cancel.is_cancelled() {
            return Err(SubmitError::new(PoolError::ShuttingDown, job));
        }

        let guard = lock(&self.inner.job_tx);
        let Some(tx) = guard.as_ref() else {
            return Err(SubmitError::new(PoolError::Stopped, job));
        };

        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(SubmitError::new(PoolError::QueueFull, job)),
            Err(TrySendError::Closed(job)) => Err(SubmitError::new(PoolError::Stopped, job)),
        }
    }

    /// Queue a job, waiting for a free slot.
    ///
    /// Returns [`PoolError::ShuttingDown`] if the pool's token is cancelled
    /// while waiting.
    pub async fn submit_blocking(&self, job: BoxedJob) -> Result<(), SubmitError> {
        if self.inner.cancel.is_cancelled() {
            return Err(SubmitError::new(PoolError::ShuttingDown, job));
        }

        let sender = lock(&self.inner.job_tx).clone();
        let Some(tx) = sender else {
            return Err(SubmitError::new(PoolError::Stopped, job));
        };

        tokio::select! {
            biased;

            _ = self.inner.cancel.cancelled() => {
                Err(SubmitError::new(PoolError::ShuttingDown, job))
            }
            permit = tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(job);
                    Ok(())
                }
                Err(_) => Err(SubmitError::new(PoolError::Stopped, job)),
            },
        }
    }

    /// Stop accepting jobs, drain the queue and wait for every worker.
    ///
    /// Jobs already queued are executed and their results published before
    /// the result stream closes.
    pub async fn stop(&self) -> PoolResult<()> {
        let previous = self.begin_stop()?;
        info!(pool = %self.inner.config.name, "Stopping worker pool");

        // Closing the sender lets workers finish the queue and exit.
        lock(&self.inner.job_tx).take();

        let handles: Vec<_> = lock(&self.inner.handles).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(pool = %self.inner.config.name, error = %e, "Worker task failed");
            }
        }

        self.inner.cancel.cancel();
        self.inner
            .state
            .store(PoolState::Stopped as u8, Ordering::Release);
        lock(&self.inner.result_tx).take();

        if previous == PoolState::Idle {
            debug!(pool = %self.inner.config.name, "Stopped a pool that was never started");
        }
        info!(pool = %self.inner.config.name, "Worker pool stopped");

        Ok(())
    }

    /// Stop the pool, giving up waiting after `timeout`.
    ///
    /// On timeout this returns [`PoolError::ShutdownTimeout`], but the drain
    /// keeps running in the background until every worker has exited.
    pub async fn stop_with_timeout(&self, timeout: Duration) -> PoolResult<()> {
        let pool = self.clone();
        let drain = tokio::spawn(async move { pool.stop().await });

        match tokio::time::timeout(timeout, drain).await {
            Ok(joined) => drain_outcome(joined),
            Err(_) => {
                warn!(
                    pool = %self.inner.config.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timeout waiting for workers to finish"
                );
                Err(PoolError::ShutdownTimeout)
            }
        }
    }

    fn begin_stop(&self) -> PoolResult<PoolState> {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            let state = PoolState::from_u8(current);
            if matches!(state, PoolState::Stopping | PoolState::Stopped) {
                return Err(PoolError::Stopped);
            }
            match self.inner.state.compare_exchange(
                current,
                PoolState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(state),
                Err(actual) => current = actual,
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.config.name)
            .field("workers", &self.inner.config.workers)
            .field("state", &self.state())
            .finish()
    }
}

async fn run_worker(
    worker_id: usize,
    pool: String,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<BoxedJob>>>,
    results: mpsc::Sender<JobResult>,
    cancel: CancellationToken,
) {
    debug!(pool = %pool, worker = worker_id, "Worker started");

    loop {
        let job = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            job = async { rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        let job_id = job.id().to_string();
        debug!(pool = %pool, worker = worker_id, job_id = %job_id, "Executing job");

        let outcome = execute_job(&job, cancel.clone()).await;
        if let Err(ref e) = outcome {
            debug!(pool = %pool, worker = worker_id, job_id = %job_id, error = %e, "Job failed");
        }
        let result = JobResult::from_outcome(job_id, outcome);

        tokio::select! {
            biased;

            sent = results.send(result) => {
                if sent.is_err() {
                    debug!(pool = %pool, worker = worker_id, "Result stream closed");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    debug!(pool = %pool, worker = worker_id, "Worker stopped");
}

fn drain_outcome(joined: Result<PoolResult<()>, JoinError>) -> PoolResult<()> {
    joined.unwrap_or_else(|e| Err(PoolError::ShutdownFailed(e.to_string())))
}

async fn execute_job(job: &BoxedJob, cancel: CancellationToken) -> Result<(), JobError> {
    match AssertUnwindSafe(job.execute(cancel)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(job_id = %job.id(), panic = %message, "Job panicked");
            Err(Box::new(PoolError::JobPanicked(message)))
        }
    }
}
