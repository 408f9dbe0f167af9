// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manual-reset event.

use crate::WaitHandle;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A manual-reset event.
///
/// [`notify`](Signal::notify) moves the signal to the signaled state and
/// releases every waiter; the signal stays set until [`reset`](Signal::reset).
/// [`notify_and_reset`](Signal::notify_and_reset) releases the waiters that
/// are currently suspended without leaving the signal set, so a task that
/// waits afterwards blocks until the next notify.
#[derive(Debug, Default)]
pub struct Signal {
    signaled: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create an unsignaled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal that starts in the signaled state.
    #[must_use]
    pub fn signaled() -> Self {
        let signal = Self::new();
        signal.signaled.store(true, Ordering::SeqCst);
        signal
    }

    /// Set the signal and release all current waiters.
    pub fn notify(&self) {
        self.signaled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Move back to the unsignaled state. Does not wake anyone.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::SeqCst);
    }

    /// Release current waiters, then remain unsignaled.
    pub fn notify_and_reset(&self) {
        self.signaled.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Current state snapshot.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Return immediately if signaled, otherwise suspend until the next
    /// notify. The state is observed at the suspension point.
    pub async fn wait(&self) {
        // Listener must exist before the check so a concurrent notify
        // cannot slip between the check and the await.
        let notified = self.notify.notified();
        if self.is_signaled() {
            return;
        }
        notified.await;
    }
}

impl WaitHandle for Signal {
    fn wait(&self) -> impl Future<Output = ()> + Send {
        Signal::wait(self)
    }
}
