// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-exec
//!
//! A family of scheduling strategies behind one contract: [`Executor::run`]
//! takes an opaque task plus a cancellation token, and every variant honours
//! the token by racing the task against it. An already-cancelled token
//! rejects without the task ever being invoked.
//!
//! Variants:
//! - [`ImmediateExecutor`]: invoke in place.
//! - [`YieldExecutor`]: yield to the scheduler once, then invoke.
//! - [`SpawnExecutor`]: hand the task to the runtime's next turn.
//! - [`SequentialExecutor`]: serial tail; submission order, no overlap.
//! - [`ConcurrentExecutor`]: a job pool behind the executor contract.
//! - [`Sequentialized`]: serial admission over any inner executor.
//!
//! The typed surface lives in [`ExecutorExt::execute`], which wraps a
//! callable with a token-bound [`Deferred`] and returns its value.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use corun_cancel::{CancellationToken, CancelledError, race};
use corun_pool::{JobPool, PoolError, PoolTask, WorkerPoolConfig};
use corun_sync::{Deferred, DeferredError};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors surfaced by executor runs.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The cancellation token fired before or during the run.
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
    /// The executor no longer accepts work.
    #[error("executor is shut down")]
    Shutdown,
    /// The executor's queue is at capacity.
    #[error("executor queue is full (max {max})")]
    QueueFull {
        /// The configured queue bound.
        max: usize,
    },
    /// The task itself failed.
    #[error("task failed: {0}")]
    Failed(anyhow::Error),
}

impl From<PoolError> for ExecuteError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Shutdown => Self::Shutdown,
            PoolError::QueueFull { max } => Self::QueueFull { max },
            other => Self::Failed(anyhow::Error::new(other)),
        }
    }
}

/// The single executor contract.
///
/// `run` resolves when the task has completed (or been abandoned to
/// cancellation). Scheduling strategy is the implementor's concern.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run an opaque task under the given cancellation token.
    async fn run(
        &self,
        task: BoxFuture<'static, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecuteError>;
}

/// Typed convenience surface over [`Executor`].
#[async_trait]
pub trait ExecutorExt: Executor {
    /// Invoke `callable` through this executor and return its value.
    ///
    /// The callable is never invoked when `cancel` is already cancelled.
    /// Mid-run cancellation surfaces as [`ExecuteError::Cancelled`]; for
    /// detached strategies the task may still run to completion in the
    /// background.
    async fn execute<F, Fut, T>(
        &self,
        callable: F,
        cancel: &CancellationToken,
    ) -> Result<T, ExecuteError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        cancel.check()?;
        let deferred = Deferred::bound_to(cancel);
        let completion = deferred.clone();
        let task: BoxFuture<'static, ()> = Box::pin(async move {
            let value = callable().await;
            completion.resolve(value);
        });
        self.run(task, cancel).await?;
        match deferred.wait().await {
            Ok(value) => Ok(value),
            Err(DeferredError::Cancelled(err)) => Err(ExecuteError::Cancelled(err)),
            Err(other) => Err(ExecuteError::Failed(anyhow::Error::new(other))),
        }
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

// ---------------------------------------------------------------------------
// Immediate / Yield / Spawn
// ---------------------------------------------------------------------------

/// Runs the task in place on the caller's task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

#[async_trait]
impl Executor for ImmediateExecutor {
    async fn run(
        &self,
        task: BoxFuture<'static, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecuteError> {
        cancel.check()?;
        race(task, cancel).await?;
        Ok(())
    }
}

/// Yields to the scheduler once before running in place, so anything
/// already queued gets a chance to run first.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldExecutor;

#[async_trait]
impl Executor for YieldExecutor {
    async fn run(
        &self,
        task: BoxFuture<'static, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecuteError> {
        cancel.check()?;
        tokio::task::yield_now().await;
        cancel.check()?;
        race(task, cancel).await?;
        Ok(())
    }
}

/// Hands the task to the runtime as a fresh top-level task.
///
/// On cancellation the spawned task keeps running detached; the caller is
/// released immediately. The `task` / `macro` scheduling aliases both map
/// to this executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnExecutor;

#[async_trait]
impl Executor for SpawnExecutor {
    async fn run(
        &self,
        task: BoxFuture<'static, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecuteError> {
        cancel.check()?;
        let handle = tokio::spawn(task);
        match race(handle, cancel).await {
            Ok(joined) => {
                joined.map_err(|err| ExecuteError::Failed(anyhow::Error::new(err)))?;
                Ok(())
            }
            Err(cancelled) => Err(cancelled.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Sequential
// ---------------------------------------------------------------------------

type Tail = Mutex<Option<oneshot::Receiver<()>>>;

async fn run_chained<Fut>(
    tail: &Tail,
    cancel: &CancellationToken,
    run: impl FnOnce() -> Fut,
) -> Result<(), ExecuteError>
where
    Fut: Future<Output = Result<(), ExecuteError>>,
{
    let (done_tx, done_rx) = oneshot::channel();
    let predecessor = tail
        .lock()
        .expect("sequential tail poisoned")
        .replace(done_rx);
    if let Some(mut previous) = predecessor {
        tokio::select! {
            biased;
            // A dropped or completed predecessor unblocks the chain.
            _ = &mut previous => {}
            _ = cancel.cancelled() => {
                // Leaving the queue must not let successors overtake the
                // still-running predecessor: relay its completion instead
                // of signalling our own.
                tokio::spawn(async move {
                    let _ = previous.await;
                    let _ = done_tx.send(());
                });
                return Err(cancel.cancel_error().into());
            }
        }
    }
    let result = async {
        cancel.check()?;
        run().await
    }
    .await;
    let _ = done_tx.send(());
    result
}

/// Chains tasks off a serial tail: submission order, and no two tasks
/// overlap a suspension point.
#[derive(Debug, Default)]
pub struct SequentialExecutor {
    tail: Tail,
}

impl SequentialExecutor {
    /// Create an executor with an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Executor for SequentialExecutor {
    async fn run(
        &self,
        task: BoxFuture<'static, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecuteError> {
        run_chained(&self.tail, cancel, || async {
            race(task, cancel).await?;
            Ok(())
        })
        .await
    }
}

/// Serial admission over any inner executor: tasks are dispatched one at a
/// time, in submission order, but run wherever the inner executor runs
/// them.
#[derive(Debug)]
pub struct Sequentialized<E> {
    inner: E,
    tail: Tail,
}

impl<E: Executor> Sequentialized<E> {
    /// Wrap `inner` with serial dispatch.
    #[must_use]
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            tail: Tail::default(),
        }
    }

    /// The wrapped executor.
    #[must_use]
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

/// Enforce sequential dispatch over any executor, retaining its execution
/// locus.
#[must_use]
pub fn sequentialize<E: Executor>(inner: E) -> Sequentialized<E> {
    Sequentialized::new(inner)
}

#[async_trait]
impl<E: Executor> Executor for Sequentialized<E> {
    async fn run(
        &self,
        task: BoxFuture<'static, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecuteError> {
        run_chained(&self.tail, cancel, || self.inner.run(task, cancel)).await
    }
}

// ---------------------------------------------------------------------------
// Concurrent
// ---------------------------------------------------------------------------

/// A [`JobPool`] behind the executor contract: capped concurrency with a
/// bounded admission queue and a shutdown lifecycle.
#[derive(Debug, Clone)]
pub struct ConcurrentExecutor {
    jobs: JobPool,
}

impl ConcurrentExecutor {
    /// A concurrent executor with the given cap and the default queue
    /// bound.
    pub fn new(max_concurrency: usize) -> Result<Self, PoolError> {
        let defaults = WorkerPoolConfig::default();
        Self::with_config(WorkerPoolConfig {
            max_concurrency,
            max_queue_length: defaults.max_queue_length.max(max_concurrency),
        })
    }

    /// A concurrent executor with explicit pool sizing.
    pub fn with_config(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            jobs: JobPool::new(config)?,
        })
    }

    /// Begin a graceful shutdown.
    pub fn shutdown(&self) {
        self.jobs.shutdown();
    }

    /// Immediate shutdown; returns the tasks that never ran.
    pub fn shutdown_now(&self) -> Vec<PoolTask> {
        self.jobs.shutdown_now()
    }

    /// Resolves once fully shut down.
    pub async fn on_shutdown(&self) {
        self.jobs.on_shutdown().await;
    }

    /// `true` once fully shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.jobs.is_shutdown()
    }

    /// `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.jobs.is_shutdown_initiated()
    }
}

#[async_trait]
impl Executor for ConcurrentExecutor {
    async fn run(
        &self,
        task: BoxFuture<'static, ()>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecuteError> {
        cancel.check()?;
        let job = self
            .jobs
            .submit(
                move || async move {
                    task.await;
                    Ok(())
                },
                cancel,
            )
            .map_err(ExecuteError::from)?;
        match job.result().await {
            Ok(()) => Ok(()),
            Err(DeferredError::Cancelled(err)) => Err(ExecuteError::Cancelled(err)),
            Err(other) => Err(ExecuteError::Failed(anyhow::Error::new(other))),
        }
    }
}
