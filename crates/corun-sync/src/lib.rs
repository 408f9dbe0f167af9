// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-sync
//!
//! Coordination primitives for cooperative tasks: a manual-reset [`Signal`],
//! a counted [`WaitGroup`], a FIFO [`Semaphore`], an exclusive [`Mutex`],
//! a pulse/wait [`Monitor`], and the externally completable [`Deferred`].
//!
//! Every suspending operation has a cancellation-aware form that accepts a
//! [`CancellationToken`](corun_cancel::CancellationToken); the shared
//! [`WaitHandle`] trait provides `wait_until` / `wait_timeout` on top of a
//! primitive's plain `wait`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod deferred;
mod monitor;
mod mutex;
mod semaphore;
mod signal;
mod waitgroup;

pub use deferred::{Deferred, DeferredError, DeferredStatus};
pub use monitor::Monitor;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use signal::Signal;
pub use waitgroup::WaitGroup;

use corun_cancel::{CancellationToken, CancelledError, race};
use std::future::Future;
use std::time::Duration;

/// Unified waiting contract shared by the primitives.
///
/// Implementors provide [`wait`](WaitHandle::wait); the cancellation-aware
/// and timeout forms come for free.
pub trait WaitHandle: Sync {
    /// Suspend until the handle's condition holds.
    fn wait(&self) -> impl Future<Output = ()> + Send;

    /// Suspend until the condition holds or `token` fires.
    fn wait_until(
        &self,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<(), CancelledError>> + Send {
        async move { race(self.wait(), token).await }
    }

    /// Suspend until the condition holds or `timeout` elapses.
    fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), CancelledError>> + Send {
        async move {
            let token = CancellationToken::with_timeout(timeout);
            race(self.wait(), &token).await
        }
    }
}
