// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-pool
//!
//! Bounded execution: a [`WorkerPool`] running opaque tasks through a FIFO
//! queue under a concurrency cap, and a [`JobPool`] on top that wraps each
//! task with a cancellation token and a per-job [`Deferred`] result.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod job;
mod worker;

pub use job::{Job, JobPool};
pub use worker::{PoolError, PoolPhase, PoolTask, WorkerPool, WorkerPoolConfig, WorkerPoolStats};

pub use corun_sync::Deferred;
