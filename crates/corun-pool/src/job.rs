// SPDX-License-Identifier: MIT OR Apache-2.0
//! Result-returning job submission over the worker pool.

use crate::worker::{PoolError, PoolTask, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
use corun_cancel::{CancellationToken, race};
use corun_sync::{Deferred, DeferredError, DeferredStatus};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::debug;
use uuid::Uuid;

/// Handle to a submitted job: an id plus the deferred carrying its result.
#[derive(Debug, Clone)]
pub struct Job<T: Send + 'static> {
    id: Uuid,
    deferred: Deferred<T>,
}

impl<T: Send + 'static> Job<T> {
    /// Unique id of this job.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Await the job's outcome.
    pub async fn result(&self) -> Result<T, DeferredError> {
        self.deferred.wait().await
    }

    /// Status snapshot of the job's deferred.
    #[must_use]
    pub fn status(&self) -> DeferredStatus {
        self.deferred.status()
    }

    /// `true` once the job has settled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.deferred.is_done()
    }
}

/// A thin layer over [`WorkerPool`] that returns result futures.
///
/// Each submitted job runs under a cancellation token and settles a per-job
/// [`Deferred`]: value on success, error on failure (panics included),
/// cancellation when the token fires first.
#[derive(Debug, Clone)]
pub struct JobPool {
    pool: WorkerPool,
}

impl JobPool {
    /// Create a job pool after validating `config`.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            pool: WorkerPool::new(config)?,
        })
    }

    /// Create a job pool with the default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            pool: WorkerPool::with_defaults(),
        }
    }

    /// The underlying worker pool.
    #[must_use]
    pub fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Submit a job. Admission errors are synchronous; the returned
    /// [`Job`] settles with the task's outcome. A token that fires before
    /// the job starts prevents the callable from ever being invoked.
    pub fn submit<F, Fut, T>(
        &self,
        task: F,
        token: &CancellationToken,
    ) -> Result<Job<T>, PoolError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let deferred = Deferred::bound_to(token);
        let job = Job {
            id: Uuid::new_v4(),
            deferred: deferred.clone(),
        };
        let run_token = token.clone();
        let job_id = job.id;
        self.pool.submit(async move {
            if deferred.is_done() {
                // Cancelled (or otherwise settled) before the job started.
                return;
            }
            let outcome = AssertUnwindSafe(async move { race(task(), &run_token).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(Ok(value))) => {
                    deferred.resolve(value);
                }
                Ok(Ok(Err(err))) => {
                    deferred.reject(err);
                }
                Ok(Err(_cancelled)) => {
                    // The token binding already drove the deferred into
                    // its cancelled state.
                    debug!(target: "corun.pool", id = %job_id, "job cancelled mid-run");
                }
                Err(_panic) => {
                    deferred.reject(anyhow::anyhow!("job panicked"));
                }
            }
        })?;
        Ok(job)
    }

    /// Begin a graceful shutdown of the underlying pool.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Immediate shutdown; returns the wrapped jobs that never ran.
    pub fn shutdown_now(&self) -> Vec<PoolTask> {
        self.pool.shutdown_now()
    }

    /// Resolves once the pool has fully shut down.
    pub async fn on_shutdown(&self) {
        self.pool.on_shutdown().await;
    }

    /// `true` once fully shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.pool.is_shutdown_initiated()
    }

    /// Point-in-time statistics of the underlying pool.
    #[must_use]
    pub fn stats(&self) -> WorkerPoolStats {
        self.pool.stats()
    }
}

impl Default for JobPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}
