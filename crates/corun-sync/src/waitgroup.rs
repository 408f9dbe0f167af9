// SPDX-License-Identifier: MIT OR Apache-2.0
//! Counted completion latch.

use crate::{Signal, WaitHandle};
use std::future::Future;
use std::sync::Mutex;

/// A counted latch in the style of Go's `sync.WaitGroup`.
///
/// [`add`](WaitGroup::add) moves the counter; [`wait`](WaitGroup::wait)
/// completes whenever the counter is zero. The group owns an internal
/// [`Signal`]: a 0 to positive transition resets it, a transition back to
/// zero notifies it.
#[derive(Debug)]
pub struct WaitGroup {
    count: Mutex<i64>,
    signal: Signal,
}

impl WaitGroup {
    /// Create a group with a zero counter (waits complete immediately).
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            signal: Signal::signaled(),
        }
    }

    /// Add `delta` (which may be negative) to the counter.
    ///
    /// # Panics
    ///
    /// Panics immediately if the counter would become negative.
    pub fn add(&self, delta: i64) {
        let mut count = self.count.lock().expect("wait group lock poisoned");
        let next = *count + delta;
        assert!(
            next >= 0,
            "wait group counter driven negative ({} {:+})",
            *count,
            delta
        );
        if *count == 0 && next > 0 {
            self.signal.reset();
        } else if *count > 0 && next == 0 {
            self.signal.notify();
        }
        *count = next;
    }

    /// Decrement the counter by one.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Current counter value.
    #[must_use]
    pub fn count(&self) -> i64 {
        *self.count.lock().expect("wait group lock poisoned")
    }

    /// Suspend until the counter reaches zero.
    pub async fn wait(&self) {
        self.signal.wait().await;
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitHandle for WaitGroup {
    fn wait(&self) -> impl Future<Output = ()> + Send {
        WaitGroup::wait(self)
    }
}
