// SPDX-License-Identifier: MIT OR Apache-2.0
//! Counted permits with FIFO acquisition.

use corun_cancel::{CancellationToken, CancelledError, race};

/// A counted semaphore with strictly FIFO waiters.
///
/// Permits are not scoped guards: [`acquire`](Semaphore::acquire) takes one
/// permit and [`release`](Semaphore::release) hands permits back, oldest
/// waiter first, with any remainder added to the balance. A waiter removed
/// by cancellation leaves the queue without consuming a permit.
#[derive(Debug)]
pub struct Semaphore {
    inner: tokio::sync::Semaphore,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            inner: tokio::sync::Semaphore::new(permits),
        }
    }

    /// Take a permit without suspending. Returns `false` when none is
    /// available.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        match self.inner.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Suspend until a permit is available, then take it.
    pub async fn acquire(&self) {
        self.inner
            .acquire()
            .await
            .expect("semaphore closed")
            .forget();
    }

    /// Cancellation-aware [`acquire`](Semaphore::acquire). A cancelled
    /// acquirer is removed from the waiter queue.
    pub async fn acquire_until(&self, token: &CancellationToken) -> Result<(), CancelledError> {
        race(self.acquire(), token).await
    }

    /// Return `count` permits. Waiting acquirers are served first, in FIFO
    /// order; the remainder increments the balance.
    pub fn release(&self, count: usize) {
        self.inner.add_permits(count);
    }

    /// Currently available permits (zero whenever anyone is waiting).
    #[must_use]
    pub fn permits(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corun_cancel::CancellationSource;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn try_acquire_on_empty_semaphore_fails() {
        let semaphore = Semaphore::new(0);
        assert!(!semaphore.try_acquire());
    }

    #[test]
    fn try_acquire_consumes_permits() {
        let semaphore = Semaphore::new(2);
        assert!(semaphore.try_acquire());
        assert!(semaphore.try_acquire());
        assert!(!semaphore.try_acquire());
        assert_eq!(semaphore.permits(), 0);
    }

    #[tokio::test]
    async fn release_hands_permits_to_oldest_waiter() {
        let semaphore = Arc::new(Semaphore::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let semaphore = Arc::clone(&semaphore);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                semaphore.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Ensure deterministic queue order.
            tokio::task::yield_now().await;
        }
        semaphore.release(3);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn release_remainder_goes_to_balance() {
        let semaphore = Semaphore::new(0);
        semaphore.release(2);
        assert_eq!(semaphore.permits(), 2);
    }

    #[tokio::test]
    async fn cancelled_acquirer_leaves_the_queue() {
        let semaphore = Arc::new(Semaphore::new(0));
        let source = CancellationSource::new();
        let token = source.token();
        let acquired = Arc::new(AtomicUsize::new(0));

        let cancelled_waiter = {
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move { semaphore.acquire_until(&token).await })
        };
        tokio::task::yield_now().await;

        let live_waiter = {
            let semaphore = Arc::clone(&semaphore);
            let acquired = Arc::clone(&acquired);
            tokio::spawn(async move {
                semaphore.acquire().await;
                acquired.fetch_add(1, Ordering::SeqCst);
            })
        };
        tokio::task::yield_now().await;

        source.cancel();
        assert!(cancelled_waiter.await.unwrap().is_err());

        // The single released permit must reach the live waiter.
        semaphore.release(1);
        live_waiter.await.unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }
}
