//! Bounded async worker pool.
//!
//! A [`WorkerPool`] runs a fixed number of tokio tasks that pull [`Job`]s from
//! a bounded queue and publish one [`JobResult`] per job on a bounded result
//! stream. Submission is either non-blocking ([`WorkerPool::submit`]) or waits
//! for space ([`WorkerPool::submit_blocking`]). Shutdown drains every queued
//! job before the result stream closes.
//!
//! ## Quick Start
//!
//! ```
//! use postal_pool::*;
//!
//! # tokio_test::block_on(async {
//! let pool = WorkerPool::new(2, 8);
//! let mut results = pool.take_results().expect("first call");
//! pool.start()?;
//!
//! for i in 0..4 {
//!     let job = FnJob::new(format!("job-{i}"), |_cancel| async { Ok(()) });
//!     pool.submit(job.boxed())?;
//! }
//!
//! pool.stop().await?;
//! while let Some(result) = results.recv().await {
//!     assert!(result.success);
//! }
//! # Ok::<(), PoolError>(())
//! # }).unwrap();
//! ```

pub mod error;
pub mod job;
pub mod pool;

pub use error::{PoolError, PoolResult, SubmitError};
pub use job::{BoxedJob, FnJob, Job, JobError, JobResult};
pub use pool::{PoolConfig, PoolState, WorkerPool};

// Re-exported so job implementors do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
