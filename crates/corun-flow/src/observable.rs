// SPDX-License-Identifier: MIT OR Apache-2.0
//! Push-based observable contract and subscription handle.

use corun_cancel::{CancellationSource, CancellationToken};
use std::sync::Arc;

/// Receiver side of the observable protocol.
///
/// At most one of `on_error` / `on_complete` is delivered, and no `on_next`
/// after either.
pub trait Observer<T>: Send + Sync {
    /// A value was produced.
    fn on_next(&self, value: T);

    /// The stream failed; terminal.
    fn on_error(&self, error: anyhow::Error) {
        let _ = error;
    }

    /// The stream finished; terminal.
    fn on_complete(&self) {}
}

/// Producer side of the observable protocol.
pub trait Observable<T>: Send + Sync {
    /// Attach an observer; the returned [`Subscription`] detaches it.
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription;
}

/// Handle detaching an observer from its producer.
///
/// Backed by a cancellation source: producers watch the subscription's
/// token. [`unsubscribe`](Subscription::unsubscribe) is idempotent, and
/// dropping the handle does *not* detach (subscriptions are
/// fire-and-forget unless explicitly ended).
#[derive(Debug)]
pub struct Subscription {
    source: CancellationSource,
}

impl Subscription {
    /// Wrap a cancellation source as a subscription handle.
    #[must_use]
    pub fn new(source: CancellationSource) -> Self {
        Self { source }
    }

    /// Detach the observer. Idempotent.
    pub fn unsubscribe(&self) {
        self.source.cancel();
    }

    /// `true` while the subscription has not been ended.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.source.is_cancelled()
    }

    /// Token producers watch to learn the subscription ended.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.source.token()
    }
}

/// Options for bridging an [`Observable`] into a flowable.
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    /// Buffer capacity; `None` means unbounded (the default).
    pub buffer_size: Option<usize>,
    /// Overflow policy for a bounded buffer. Defaults to
    /// [`OverflowPolicy::Fixed`](corun_buffer::OverflowPolicy::Fixed),
    /// which turns overflow into a stream error.
    pub overflow: corun_buffer::OverflowPolicy,
    /// Token ending the bridge from the consumer side.
    pub token: CancellationToken,
}

impl BridgeOptions {
    /// Bound the buffer at `capacity` with the given policy.
    #[must_use]
    pub fn bounded(capacity: usize, overflow: corun_buffer::OverflowPolicy) -> Self {
        Self {
            buffer_size: Some(capacity),
            overflow,
            token: CancellationToken::none(),
        }
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_token(mut self, token: &CancellationToken) -> Self {
        self.token = token.clone();
        self
    }
}
