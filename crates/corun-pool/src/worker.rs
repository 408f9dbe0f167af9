// SPDX-License-Identifier: MIT OR Apache-2.0
//! FIFO task queue with a concurrency cap and a shutdown lifecycle.

use corun_sync::Signal;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// An opaque unit of pool work.
pub type PoolTask = BoxFuture<'static, ()>;

/// Sizing for a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum number of tasks running at once. Must be at least 1.
    pub max_concurrency: usize,
    /// Maximum number of queued (not yet running) tasks. Must be at least
    /// `max_concurrency`.
    pub max_queue_length: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_queue_length: 1024,
        }
    }
}

impl WorkerPoolConfig {
    /// Check the construction constraints.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_concurrency < 1 {
            return Err(PoolError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.max_queue_length < self.max_concurrency {
            return Err(PoolError::InvalidConfig(format!(
                "max_queue_length ({}) must be at least max_concurrency ({})",
                self.max_queue_length, self.max_concurrency
            )));
        }
        Ok(())
    }
}

/// Errors from pool construction and submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The configuration violates a construction constraint.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
    /// The queue is at `max_queue_length`.
    #[error("queue length exceeded (max {max})")]
    QueueFull {
        /// The configured queue bound.
        max: usize,
    },
    /// The pool no longer accepts work.
    #[error("pool is shut down")]
    Shutdown,
}

/// Lifecycle of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// Accepting and running work.
    Running,
    /// Draining: no new work, queued and running tasks finish.
    ShutdownInitiated,
    /// Fully stopped.
    Shutdown,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently running.
    pub active: usize,
    /// Lifecycle phase.
    pub phase: PoolPhase,
    /// Configured concurrency cap.
    pub max_concurrency: usize,
    /// Configured queue bound.
    pub max_queue_length: usize,
}

struct PoolState {
    queue: VecDeque<PoolTask>,
    active: usize,
    phase: PoolPhase,
}

struct PoolInner {
    config: WorkerPoolConfig,
    state: Mutex<PoolState>,
    shutdown: Signal,
}

/// A bounded FIFO task runner.
///
/// Tasks are dequeued in submission order; with `max_concurrency > 1` they
/// may complete out of order. Task failures (including panics) are invisible
/// to the pool itself; result observation belongs to the job layer.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("WorkerPool")
            .field("queued", &stats.queued)
            .field("active", &stats.active)
            .field("phase", &stats.phase)
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool after validating `config`.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    active: 0,
                    phase: PoolPhase::Running,
                }),
                shutdown: Signal::new(),
            }),
        })
    }

    /// Create a pool with the default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(WorkerPoolConfig::default()).expect("default pool config is valid")
    }

    /// The pool's configuration.
    #[must_use]
    pub fn config(&self) -> WorkerPoolConfig {
        self.inner.config
    }

    /// Enqueue a task. Admission checks are synchronous: a draining or
    /// stopped pool errors with [`PoolError::Shutdown`], a full queue with
    /// [`PoolError::QueueFull`]. On success a worker slot is kicked if one
    /// is free.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let spawn_worker = {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            if state.phase != PoolPhase::Running {
                return Err(PoolError::Shutdown);
            }
            if state.queue.len() >= self.inner.config.max_queue_length {
                return Err(PoolError::QueueFull {
                    max: self.inner.config.max_queue_length,
                });
            }
            state.queue.push_back(Box::pin(task));
            if state.active < self.inner.config.max_concurrency {
                state.active += 1;
                true
            } else {
                false
            }
        };
        if spawn_worker {
            self.spawn_worker();
        }
        Ok(())
    }

    fn spawn_worker(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let task = {
                    let mut state = inner.state.lock().expect("pool lock poisoned");
                    match state.queue.pop_front() {
                        Some(task) => task,
                        None => {
                            state.active -= 1;
                            if state.active == 0 && state.phase == PoolPhase::ShutdownInitiated {
                                state.phase = PoolPhase::Shutdown;
                                debug!(target: "corun.pool", "pool drained, shutdown complete");
                                inner.shutdown.notify();
                            }
                            return;
                        }
                    }
                };
                if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                    warn!(target: "corun.pool", "pool task panicked");
                }
            }
        });
    }

    /// Begin a graceful shutdown: no new submissions, queued and running
    /// tasks finish, then the shutdown signal fires.
    pub fn shutdown(&self) {
        let finished = {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            if state.phase != PoolPhase::Running {
                return;
            }
            if state.active == 0 && state.queue.is_empty() {
                state.phase = PoolPhase::Shutdown;
                true
            } else {
                state.phase = PoolPhase::ShutdownInitiated;
                false
            }
        };
        debug!(target: "corun.pool", immediate = finished, "shutdown requested");
        if finished {
            self.inner.shutdown.notify();
        }
    }

    /// Immediate shutdown: returns the tasks that never ran. Tasks already
    /// running finish normally, but the pool reports `Shutdown` at once.
    pub fn shutdown_now(&self) -> Vec<PoolTask> {
        let drained = {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            state.phase = PoolPhase::Shutdown;
            state.queue.drain(..).collect::<Vec<_>>()
        };
        debug!(target: "corun.pool", dropped = drained.len(), "immediate shutdown");
        self.inner.shutdown.notify();
        drained
    }

    /// Resolves once the pool has fully shut down.
    pub async fn on_shutdown(&self) {
        self.inner.shutdown.wait().await;
    }

    /// `true` once fully shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.phase() == PoolPhase::Shutdown
    }

    /// `true` once shutdown has been requested (draining or stopped).
    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.phase() != PoolPhase::Running
    }

    /// `true` when the queue is at its bound.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.queued() >= self.inner.config.max_queue_length
    }

    /// Number of queued (not yet running) tasks.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("pool lock poisoned")
            .queue
            .len()
    }

    /// Number of currently running tasks.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.state.lock().expect("pool lock poisoned").active
    }

    /// Lifecycle snapshot.
    #[must_use]
    pub fn phase(&self) -> PoolPhase {
        self.inner.state.lock().expect("pool lock poisoned").phase
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> WorkerPoolStats {
        let state = self.inner.state.lock().expect("pool lock poisoned");
        WorkerPoolStats {
            queued: state.queue.len(),
            active: state.active,
            phase: state.phase,
            max_concurrency: self.inner.config.max_concurrency,
            max_queue_length: self.inner.config.max_queue_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(WorkerPoolConfig::default().validate().is_ok());
        assert!(
            WorkerPoolConfig {
                max_concurrency: 0,
                max_queue_length: 10
            }
            .validate()
            .is_err()
        );
        assert!(
            WorkerPoolConfig {
                max_concurrency: 4,
                max_queue_length: 2
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn config_serde_round_trip() {
        let config = WorkerPoolConfig {
            max_concurrency: 2,
            max_queue_length: 16,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: WorkerPoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn config_parses_from_toml() {
        let config: WorkerPoolConfig =
            toml::from_str("max_concurrency = 2\nmax_queue_length = 8\n").unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.max_queue_length, 8);
    }
}
