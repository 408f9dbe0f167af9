// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pulse/wait rendezvous.

use corun_cancel::{CancellationToken, CancelledError, race};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// A rendezvous point where tasks wait for a pulse.
///
/// Pulses are not retained: a task that starts waiting after a pulse does
/// not observe it. Cancelled waiters are skipped by
/// [`pulse_one`](Monitor::pulse_one) so a pulse always reaches a live
/// receiver when one exists.
#[derive(Debug, Default)]
pub struct Monitor {
    waiters: Mutex<VecDeque<oneshot::Sender<()>>>,
}

impl Monitor {
    /// Create a monitor with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until the next pulse.
    pub async fn wait(&self) {
        let receiver = self.enqueue();
        let _ = receiver.await;
    }

    /// Suspend until the next pulse or until `token` fires. A cancelled
    /// waiter no longer counts as a pulse receiver.
    pub async fn wait_until(&self, token: &CancellationToken) -> Result<(), CancelledError> {
        let receiver = self.enqueue();
        race(
            async move {
                let _ = receiver.await;
            },
            token,
        )
        .await
    }

    fn enqueue(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .expect("monitor lock poisoned")
            .push_back(tx);
        rx
    }

    /// Release the oldest live waiter. Returns `true` if one was released.
    pub fn pulse_one(&self) -> bool {
        let mut waiters = self.waiters.lock().expect("monitor lock poisoned");
        while let Some(sender) = waiters.pop_front() {
            if sender.send(()).is_ok() {
                return true;
            }
        }
        false
    }

    /// Release every currently queued waiter; returns how many were live.
    pub fn pulse_all(&self) -> usize {
        let mut waiters = self.waiters.lock().expect("monitor lock poisoned");
        let mut released = 0;
        for sender in waiters.drain(..) {
            if sender.send(()).is_ok() {
                released += 1;
            }
        }
        released
    }

    /// Number of live waiters currently queued.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters
            .lock()
            .expect("monitor lock poisoned")
            .iter()
            .filter(|sender| !sender.is_closed())
            .count()
    }
}
