// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun
//!
//! Cooperative coordination runtime for async Rust: cancellation tokens,
//! coordination primitives, bounded buffers, worker pools, executors,
//! rate limiting / retry, and a lazy restartable stream pipeline.
//!
//! This crate is a facade re-exporting the member crates under stable
//! module names; depend on the members directly for a smaller footprint.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use corun_buffer as buffer;
pub use corun_cancel as cancel;
pub use corun_exec as exec;
pub use corun_flow as flow;
pub use corun_pool as pool;
pub use corun_resilience as resilience;
pub use corun_sync as sync;
pub use corun_time as time;
pub use corun_util as util;

/// The types most applications start from.
pub mod prelude {
    pub use corun_buffer::{AsyncQueue, OverflowPolicy, RingBuffer};
    pub use corun_cancel::{
        CancelStreamOptions, CancellationSource, CancellationToken, CancelledError, race,
        race_timeout,
    };
    pub use corun_exec::{
        ConcurrentExecutor, Executor, ExecutorExt, ImmediateExecutor, SequentialExecutor,
        SpawnExecutor, YieldExecutor, sequentialize,
    };
    pub use corun_flow::{FlowProcessor, Flowable};
    pub use corun_pool::{JobPool, WorkerPool, WorkerPoolConfig};
    pub use corun_resilience::{RateLimit, RateLimiter, RetrySettings, Retryable, TokenBucket};
    pub use corun_sync::{
        Deferred, DeferredStatus, Monitor, Mutex, Semaphore, Signal, WaitGroup, WaitHandle,
    };
    pub use corun_time::{Deadline, DeadlineExceededError, delay};
}
