// SPDX-License-Identifier: MIT OR Apache-2.0
//! Awaitable multi-producer queue over a ring buffer.

use crate::ring::{OverflowPolicy, RingBuffer};
use corun_cancel::{CancellationToken, CancelledError, race};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;

/// Lifecycle of an [`AsyncQueue`]. Transitions are one-way:
/// `Open` to `ReadOnly` or `Closed`, `ReadOnly` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Enqueue and dequeue both legal.
    Open,
    /// Enqueue forbidden; dequeues drain the remainder, then end.
    ReadOnly,
    /// Both operations terminate; pending dequeues wake with end-of-stream.
    Closed,
}

/// Errors returned by [`AsyncQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The underlying `Fixed`-policy buffer is full.
    #[error("queue buffer full (capacity {capacity})")]
    Full {
        /// Capacity of the refusing buffer.
        capacity: usize,
    },
    /// The queue no longer accepts writes.
    #[error("queue is read-only")]
    ReadOnly,
    /// The queue has been closed.
    #[error("queue is closed")]
    Closed,
}

struct Shape<T> {
    buffer: RingBuffer<T>,
    state: QueueState,
}

struct QueueInner<T> {
    shape: Mutex<Shape<T>>,
    notify: Notify,
}

/// An awaitable FIFO queue: a ring buffer plus a wakeup signal.
///
/// Producers [`enqueue`](AsyncQueue::enqueue) synchronously (backpressure is
/// the buffer's overflow policy); consumers [`dequeue`](AsyncQueue::dequeue)
/// asynchronously, suspending while the queue is open and empty. Handles are
/// cheap clones sharing one queue.
pub struct AsyncQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for AsyncQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for AsyncQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.inner.shape.lock().expect("queue lock poisoned");
        f.debug_struct("AsyncQueue")
            .field("len", &shape.buffer.len())
            .field("state", &shape.state)
            .finish()
    }
}

impl<T: Send + 'static> AsyncQueue<T> {
    /// A queue bounded at `capacity` with the given overflow policy.
    #[must_use]
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_buffer(RingBuffer::new(capacity, policy))
    }

    /// A queue with no practical bound (used by the observable bridge's
    /// default configuration).
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_buffer(RingBuffer::new(usize::MAX, OverflowPolicy::Fixed))
    }

    fn with_buffer(buffer: RingBuffer<T>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                shape: Mutex::new(Shape {
                    buffer,
                    state: QueueState::Open,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Append a value and wake a blocked consumer.
    pub fn enqueue(&self, value: T) -> Result<(), QueueError> {
        {
            let mut shape = self.inner.shape.lock().expect("queue lock poisoned");
            match shape.state {
                QueueState::Open => {}
                QueueState::ReadOnly => return Err(QueueError::ReadOnly),
                QueueState::Closed => return Err(QueueError::Closed),
            }
            shape
                .buffer
                .write(value)
                .map_err(|err| QueueError::Full {
                    capacity: err.capacity,
                })?;
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Remove the oldest value, suspending while the queue is open and
    /// empty. Returns `None` at end-of-stream: when closed, or when
    /// read-only with nothing left to drain.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut shape = self.inner.shape.lock().expect("queue lock poisoned");
                if shape.state == QueueState::Closed {
                    return None;
                }
                if let Some(value) = shape.buffer.read() {
                    return Some(value);
                }
                if shape.state == QueueState::ReadOnly {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Cancellation-aware [`dequeue`](AsyncQueue::dequeue).
    pub async fn dequeue_until(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<T>, CancelledError> {
        race(self.dequeue(), token).await
    }

    /// Remove the oldest value without suspending.
    pub fn try_dequeue(&self) -> Option<T> {
        self.inner
            .shape
            .lock()
            .expect("queue lock poisoned")
            .buffer
            .read()
    }

    /// Forbid further enqueues; blocked consumers drain the remainder and
    /// then observe end-of-stream.
    pub fn set_read_only(&self) {
        {
            let mut shape = self.inner.shape.lock().expect("queue lock poisoned");
            if shape.state == QueueState::Open {
                shape.state = QueueState::ReadOnly;
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Hard-terminate: both operations end and pending dequeues wake with
    /// end-of-stream. Remaining items are discarded.
    pub fn close(&self) {
        {
            let mut shape = self.inner.shape.lock().expect("queue lock poisoned");
            shape.state = QueueState::Closed;
            shape.buffer.clear();
        }
        self.inner.notify.notify_waiters();
    }

    /// Number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .shape
            .lock()
            .expect("queue lock poisoned")
            .buffer
            .len()
    }

    /// `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifecycle snapshot.
    #[must_use]
    pub fn state(&self) -> QueueState {
        self.inner.shape.lock().expect("queue lock poisoned").state
    }

    /// Consume the handle into a stream that drains the queue until
    /// end-of-stream.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self, |queue| async move {
            queue.dequeue().await.map(|value| (value, queue))
        })
    }
}
