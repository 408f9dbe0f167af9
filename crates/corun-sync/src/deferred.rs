// SPDX-License-Identifier: MIT OR Apache-2.0
//! Externally completable future with observable status.

use corun_cancel::{CancelRegistration, CancellationToken, CancelledError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::Notify;

/// Terminal-state machine of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredStatus {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
    /// Settled by cancellation of the bound token.
    RejectedCancelled,
}

/// Error observed by waiters of a settled [`Deferred`].
#[derive(Debug, Clone, Error)]
pub enum DeferredError {
    /// The deferred was rejected with an error.
    #[error("deferred rejected: {0}")]
    Rejected(Arc<anyhow::Error>),
    /// The bound cancellation token fired.
    #[error(transparent)]
    Cancelled(CancelledError),
    /// The resolved value was already handed to an earlier waiter.
    #[error("deferred value already consumed by an earlier waiter")]
    ValueConsumed,
}

type DoneCallback = Box<dyn FnOnce(DeferredStatus) + Send>;

enum State<T> {
    Pending { callbacks: Vec<DoneCallback> },
    Resolved(Option<T>),
    Rejected(Arc<anyhow::Error>),
    RejectedCancelled(CancelledError),
}

impl<T> State<T> {
    fn status(&self) -> DeferredStatus {
        match self {
            State::Pending { .. } => DeferredStatus::Pending,
            State::Resolved(_) => DeferredStatus::Resolved,
            State::Rejected(_) => DeferredStatus::Rejected,
            State::RejectedCancelled(_) => DeferredStatus::RejectedCancelled,
        }
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Notify,
    registration: Mutex<Option<CancelRegistration>>,
}

/// A future whose completion is driven from the outside.
///
/// Transitions are single-shot: the first `resolve`, `reject`, or bound
/// cancellation wins and later calls are no-ops. Handles are cheap clones
/// sharing one state; the resolved value goes to the first waiter while
/// every other observer still sees the terminal status.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.status())
            .finish()
    }
}

impl<T: Send + 'static> Deferred<T> {
    /// Create a pending deferred not bound to any token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    callbacks: Vec::new(),
                }),
                done: Notify::new(),
                registration: Mutex::new(None),
            }),
        }
    }

    /// Create a deferred bound to `token`.
    ///
    /// Starts in `RejectedCancelled` if the token is already cancelled;
    /// otherwise the deferred transitions once when the token fires, and
    /// the registration is released as soon as the deferred settles by any
    /// other path.
    #[must_use]
    pub fn bound_to(token: &CancellationToken) -> Self {
        let deferred = Self::new();
        if let Some(err) = token.reason() {
            deferred.settle(State::RejectedCancelled(err));
            return deferred;
        }
        let weak: Weak<Inner<T>> = Arc::downgrade(&deferred.inner);
        let registration = token.on_cancel(move |err| {
            if let Some(inner) = weak.upgrade() {
                Deferred { inner }.settle(State::RejectedCancelled(err.clone()));
            }
        });
        *deferred
            .inner
            .registration
            .lock()
            .expect("deferred registration poisoned") = Some(registration);
        deferred
    }

    /// Settle with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(State::Resolved(Some(value)))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, error: anyhow::Error) -> bool {
        self.settle(State::Rejected(Arc::new(error)))
    }

    fn settle(&self, next: State<T>) -> bool {
        let status = next.status();
        let callbacks = {
            let mut state = self.inner.state.lock().expect("deferred state poisoned");
            match &mut *state {
                State::Pending { callbacks } => {
                    let callbacks = std::mem::take(callbacks);
                    *state = next;
                    callbacks
                }
                _ => return false,
            }
        };
        // Terminal: the token registration is no longer needed.
        self.inner
            .registration
            .lock()
            .expect("deferred registration poisoned")
            .take();
        for callback in callbacks {
            callback(status);
        }
        self.inner.done.notify_waiters();
        true
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> DeferredStatus {
        self.inner
            .state
            .lock()
            .expect("deferred state poisoned")
            .status()
    }

    /// `true` once the deferred has settled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status() != DeferredStatus::Pending
    }

    /// Observe the terminal status exactly once: immediately when already
    /// settled, otherwise on settlement.
    pub fn on_done<F>(&self, callback: F)
    where
        F: FnOnce(DeferredStatus) + Send + 'static,
    {
        let status = {
            let mut state = self.inner.state.lock().expect("deferred state poisoned");
            match &mut *state {
                State::Pending { callbacks } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                other => other.status(),
            }
        };
        callback(status);
    }

    /// Suspend until the deferred settles.
    ///
    /// The resolved value is handed to the first waiter; later waiters get
    /// [`DeferredError::ValueConsumed`]. Rejection and cancellation errors
    /// are shared by every waiter.
    pub async fn wait(&self) -> Result<T, DeferredError> {
        loop {
            let notified = self.inner.done.notified();
            {
                let mut state = self.inner.state.lock().expect("deferred state poisoned");
                match &mut *state {
                    State::Pending { .. } => {}
                    State::Resolved(value) => {
                        return match value.take() {
                            Some(value) => Ok(value),
                            None => Err(DeferredError::ValueConsumed),
                        };
                    }
                    State::Rejected(err) => return Err(DeferredError::Rejected(Arc::clone(err))),
                    State::RejectedCancelled(err) => {
                        return Err(DeferredError::Cancelled(err.clone()));
                    }
                }
            }
            notified.await;
        }
    }
}

impl<T: Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}
