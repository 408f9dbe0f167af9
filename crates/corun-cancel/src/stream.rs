// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation-aware stream wrapping.
//!
//! [`cancellable_stream`] supervises a fallible item stream with a token:
//! when the token fires, the upstream is dropped to release its resources
//! and the wrapper either ends silently or reports the cancellation as an
//! error item, depending on [`CancelStreamOptions::throw_on_cancellation`].

use crate::token::{CancellationToken, CancelledError};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Boxed fallible item stream: the item currency of the flow pipeline.
pub type FallibleStream<T> = Pin<Box<dyn Stream<Item = anyhow::Result<T>> + Send>>;

/// Callback scheduled on the runtime when a wrapped stream observes
/// cancellation. Never invoked inline.
pub type OnCancel = Arc<dyn Fn() + Send + Sync>;

/// Options for [`cancellable_stream`] and flow terminals.
#[derive(Clone, Default)]
pub struct CancelStreamOptions {
    /// Token supervising the stream. Defaults to the inert token.
    pub token: CancellationToken,
    /// When `true`, cancellation of `token` surfaces as an `Err` item;
    /// when `false` (the default) the stream ends silently. A cancellation
    /// error originating from a different token is always re-raised.
    pub throw_on_cancellation: bool,
    /// Scheduled on the runtime when cancellation terminates the stream.
    pub on_cancel: Option<OnCancel>,
}

impl CancelStreamOptions {
    /// Options that end the stream silently when `token` fires.
    #[must_use]
    pub fn with_token(token: &CancellationToken) -> Self {
        Self {
            token: token.clone(),
            ..Self::default()
        }
    }

    /// Options that surface cancellation of `token` as an error item.
    #[must_use]
    pub fn strict(token: &CancellationToken) -> Self {
        Self {
            token: token.clone(),
            throw_on_cancellation: true,
            ..Self::default()
        }
    }

    /// Attach an `on_cancel` callback.
    #[must_use]
    pub fn on_cancel<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for CancelStreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelStreamOptions")
            .field("token", &self.token)
            .field("throw_on_cancellation", &self.throw_on_cancellation)
            .field("has_on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

struct WrapState<T> {
    inner: Option<FallibleStream<T>>,
    options: CancelStreamOptions,
}

/// Wrap `stream` so that every pull races against `options.token`.
///
/// After the token fires no fresh value is ever yielded. Any `Err` item
/// that is a [`CancelledError`] from the supervising token is downgraded to
/// silent termination unless `throw_on_cancellation` is set; cancellations
/// from other tokens and ordinary errors pass through unchanged and end
/// the stream.
pub fn cancellable_stream<T>(
    stream: FallibleStream<T>,
    options: CancelStreamOptions,
) -> FallibleStream<T>
where
    T: Send + 'static,
{
    let state = WrapState {
        inner: Some(stream),
        options,
    };
    Box::pin(futures::stream::unfold(state, |mut state| async move {
        let mut inner = state.inner.take()?;
        tokio::select! {
            biased;
            _ = state.options.token.cancelled() => {
                drop(inner);
                debug!(target: "corun.cancel", token = %state.options.token.id(), "stream cancelled");
                schedule_on_cancel(&state.options);
                if state.options.throw_on_cancellation {
                    let err = state.options.token.cancel_error();
                    return Some((Err(err.into()), state));
                }
                None
            }
            item = inner.next() => match item {
                None => None,
                Some(Ok(value)) => {
                    state.inner = Some(inner);
                    Some((Ok(value), state))
                }
                Some(Err(err)) => {
                    drop(inner);
                    if let Some(cancel) = err.downcast_ref::<CancelledError>() {
                        let ours = !state.options.token.is_none()
                            && cancel.token_id() == state.options.token.id();
                        if ours && !state.options.throw_on_cancellation {
                            schedule_on_cancel(&state.options);
                            return None;
                        }
                    }
                    Some((Err(err), state))
                }
            }
        }
    }))
}

fn schedule_on_cancel(options: &CancelStreamOptions) {
    if let Some(callback) = options.on_cancel.clone() {
        tokio::spawn(async move { callback() });
    }
}
