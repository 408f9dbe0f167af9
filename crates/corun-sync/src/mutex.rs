// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exclusive lock as a one-permit semaphore facade.

use crate::Semaphore;
use corun_cancel::{CancellationToken, CancelledError};
use std::sync::atomic::{AtomicBool, Ordering};

/// An exclusive, non-reentrant async lock.
///
/// Unlike guard-based locks, [`unlock`](Mutex::unlock) is an explicit
/// operation so the lock can be handed across suspension points. Unlocking
/// an unlocked mutex is a no-op.
#[derive(Debug)]
pub struct Mutex {
    semaphore: Semaphore,
    locked: AtomicBool,
}

impl Mutex {
    /// Create an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
            locked: AtomicBool::new(false),
        }
    }

    /// Take the lock without suspending. Returns `false` when held.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        if self.semaphore.try_acquire() {
            self.locked.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Suspend until the lock is available, then take it. Waiters are
    /// served in FIFO order.
    pub async fn lock(&self) {
        self.semaphore.acquire().await;
        self.locked.store(true, Ordering::SeqCst);
    }

    /// Cancellation-aware [`lock`](Mutex::lock).
    pub async fn lock_until(&self, token: &CancellationToken) -> Result<(), CancelledError> {
        self.semaphore.acquire_until(token).await?;
        self.locked.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Release the lock. A no-op when not locked; returns `true` if the
    /// lock was actually released.
    pub fn unlock(&self) -> bool {
        if self.locked.swap(false, Ordering::SeqCst) {
            self.semaphore.release(1);
            true
        } else {
            false
        }
    }

    /// Snapshot of the lock state.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
