// SPDX-License-Identifier: MIT OR Apache-2.0
//! Token and source types for cooperative cancellation.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`CancellationToken`]. All clones of a token share one id,
/// so errors can be traced back to the token that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(u64);

impl TokenId {
    /// The id shared by every inert (`none`) token.
    pub const NONE: TokenId = TokenId(0);
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse lifecycle of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    /// The inert sentinel; can never cancel.
    None,
    /// Live and not yet cancelled.
    Active,
    /// Cancelled; terminal.
    Cancelled,
}

/// Why a token was cancelled.
#[derive(Debug, Clone, Default)]
pub enum CancelReason {
    /// Cancelled without further detail.
    #[default]
    Unspecified,
    /// A timeout of the given duration elapsed.
    Timeout(Duration),
    /// Caller-supplied description.
    Message(Arc<str>),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => f.write_str("cancelled"),
            Self::Timeout(d) => write!(f, "timed out after {d:?}"),
            Self::Message(m) => f.write_str(m),
        }
    }
}

/// Error produced by every cancelled suspension in the runtime.
///
/// Carries the id of the originating token, the recorded reason, and an
/// optional cause chain built up when combined tokens relay a constituent's
/// cancellation. Cloneable so any number of waiters can observe the same
/// cancellation.
#[derive(Debug, Clone)]
pub struct CancelledError {
    token: TokenId,
    reason: CancelReason,
    cause: Option<Arc<CancelledError>>,
}

impl CancelledError {
    pub(crate) fn new(token: TokenId, reason: CancelReason) -> Self {
        Self {
            token,
            reason,
            cause: None,
        }
    }

    pub(crate) fn with_cause(token: TokenId, cause: CancelledError) -> Self {
        Self {
            token,
            reason: cause.reason.clone(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// Id of the token that produced this error.
    #[must_use]
    pub fn token_id(&self) -> TokenId {
        self.token
    }

    /// The recorded reason.
    #[must_use]
    pub fn reason(&self) -> &CancelReason {
        &self.reason
    }

    /// Follow the cause chain to the deepest cancellation.
    #[must_use]
    pub fn root_cause(&self) -> &CancelledError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled (token {}): {}", self.token, self.reason)
    }
}

impl std::error::Error for CancelledError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

type Callback = Box<dyn FnOnce(&CancelledError) + Send>;

enum TokenState {
    Active {
        callbacks: Vec<(u64, Callback)>,
        next_callback: u64,
    },
    Cancelled(CancelledError),
}

struct TokenInner {
    id: TokenId,
    deadline: Option<Instant>,
    state: Mutex<TokenState>,
    notify: Notify,
    /// Timer / external-signal tasks that may cancel this token.
    watchers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Registrations a combined token holds on its constituents. Cleared on
    /// cancellation so the combined token detaches once it has fired.
    guards: Mutex<Vec<CancelRegistration>>,
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        // Last clone gone: release any pending timer.
        if let Ok(watchers) = self.watchers.get_mut() {
            for handle in watchers.drain(..) {
                handle.abort();
            }
        }
    }
}

/// A cloneable, cheaply-shareable cancellation token.
///
/// All clones share the same underlying state; once cancelled, a token never
/// returns to the active state. The inert token returned by
/// [`CancellationToken::none`] can never be cancelled and is the `Default`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Option<Arc<TokenInner>>,
}

impl CancellationToken {
    fn make(deadline: Option<Instant>) -> Self {
        Self {
            inner: Some(Arc::new(TokenInner {
                id: TokenId(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed)),
                deadline,
                state: Mutex::new(TokenState::Active {
                    callbacks: Vec::new(),
                    next_callback: 0,
                }),
                notify: Notify::new(),
                watchers: Mutex::new(Vec::new()),
                guards: Mutex::new(Vec::new()),
            })),
        }
    }

    pub(crate) fn new_active() -> Self {
        Self::make(None)
    }

    /// The inert sentinel: never cancels, registration is a no-op.
    #[must_use]
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Returns `true` for the inert sentinel.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.inner.is_none()
    }

    /// Identity of this token; [`TokenId::NONE`] for the inert sentinel.
    #[must_use]
    pub fn id(&self) -> TokenId {
        self.inner.as_ref().map_or(TokenId::NONE, |i| i.id)
    }

    /// Deadline of a timeout token, if this token carries one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.as_ref().and_then(|i| i.deadline)
    }

    /// A token that is born cancelled with the given reason.
    #[must_use]
    pub fn already_cancelled(reason: CancelReason) -> Self {
        let token = Self::make(None);
        token.do_cancel_reason(reason);
        token
    }

    /// A token that cancels itself with [`CancelReason::Timeout`] after
    /// `timeout`.
    ///
    /// The backing timer is released when the token fires or when every
    /// clone has been dropped, whichever comes first. Must be called from
    /// within a Tokio runtime.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let token = Self::make(Some(deadline));
        token.arm(
            tokio::time::sleep_until(deadline),
            CancelReason::Timeout(timeout),
        );
        token
    }

    /// A token that cancels when the given external signal future completes.
    ///
    /// This is the bridge for abort-signal-like integrations: any future
    /// that resolves on an external event can drive a token.
    #[must_use]
    pub fn linked_to<F>(signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = Self::make(None);
        token.arm(signal, CancelReason::Message("external signal".into()));
        token
    }

    fn arm<F>(&self, fut: F, reason: CancelReason)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(inner) = &self.inner else { return };
        let weak = Arc::downgrade(inner);
        let handle = tokio::spawn(async move {
            fut.await;
            if let Some(inner) = weak.upgrade() {
                CancellationToken { inner: Some(inner) }.do_cancel_reason(reason);
            }
        });
        inner
            .watchers
            .lock()
            .expect("watcher lock poisoned")
            .push(handle);
    }

    pub(crate) fn arm_timer(&self, timeout: Duration) {
        self.arm(
            tokio::time::sleep(timeout),
            CancelReason::Timeout(timeout),
        );
    }

    /// Lifecycle snapshot.
    #[must_use]
    pub fn phase(&self) -> TokenPhase {
        match &self.inner {
            None => TokenPhase::None,
            Some(_) if self.is_cancelled() => TokenPhase::Cancelled,
            Some(_) => TokenPhase::Active,
        }
    }

    /// Returns `true` once the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            None => false,
            Some(inner) => matches!(
                *inner.state.lock().expect("token state poisoned"),
                TokenState::Cancelled(_)
            ),
        }
    }

    /// The cancellation error, set iff the token is cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelledError> {
        let inner = self.inner.as_ref()?;
        match &*inner.state.lock().expect("token state poisoned") {
            TokenState::Cancelled(err) => Some(err.clone()),
            TokenState::Active { .. } => None,
        }
    }

    /// The token's cancellation error, or an unspecified one carrying this
    /// token's id when it has not fired. Useful at race boundaries where
    /// the token is known (or about) to be cancelled.
    #[must_use]
    pub fn cancel_error(&self) -> CancelledError {
        self.reason()
            .unwrap_or_else(|| CancelledError::new(self.id(), CancelReason::Unspecified))
    }

    /// Errors with the token's [`CancelledError`] when cancelled, otherwise
    /// returns `Ok(())`. The `throwIfCancelled` guard.
    pub fn check(&self) -> Result<(), CancelledError> {
        match self.reason() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves when the token is cancelled; immediately if it already is.
    /// Never resolves for the inert token.
    pub async fn cancelled(&self) {
        match &self.inner {
            None => std::future::pending::<()>().await,
            Some(inner) => loop {
                // Create the listener before checking so a cancellation
                // between the check and the await cannot be missed.
                let notified = inner.notify.notified();
                if self.is_cancelled() {
                    return;
                }
                notified.await;
            },
        }
    }

    /// Attach a one-shot callback fired on cancellation, or immediately if
    /// the token is already cancelled. Callbacks fire exactly once, in
    /// registration order, on the cancelling task.
    ///
    /// The returned [`CancelRegistration`] unregisters the callback when
    /// dropped; hold it for as long as the callback should stay armed.
    pub fn on_cancel<F>(&self, callback: F) -> CancelRegistration
    where
        F: FnOnce(&CancelledError) + Send + 'static,
    {
        let Some(inner) = &self.inner else {
            return CancelRegistration::inert();
        };
        let mut pending: Option<Callback> = Some(Box::new(callback));
        let outcome = {
            let mut state = inner.state.lock().expect("token state poisoned");
            match &mut *state {
                TokenState::Cancelled(err) => Err(err.clone()),
                TokenState::Active {
                    callbacks,
                    next_callback,
                } => {
                    let id = *next_callback;
                    *next_callback += 1;
                    callbacks.push((id, pending.take().expect("callback taken twice")));
                    Ok(id)
                }
            }
        };
        match outcome {
            Ok(id) => CancelRegistration {
                token: Arc::downgrade(inner),
                id,
            },
            Err(err) => {
                if let Some(cb) = pending.take() {
                    cb(&err);
                }
                CancelRegistration::inert()
            }
        }
    }

    /// Combine several tokens into one that cancels when any of them does.
    ///
    /// Inert tokens are dropped. If any input is already cancelled it is
    /// returned directly (first wins). Among timeout tokens only the one
    /// with the farthest deadline is retained; the earlier timeouts are
    /// subsumed and cannot pre-empt it. With nothing left the inert token
    /// is returned, and a single survivor is returned as-is.
    #[must_use]
    pub fn combine<I>(tokens: I) -> CancellationToken
    where
        I: IntoIterator<Item = CancellationToken>,
    {
        let mut live: Vec<CancellationToken> = Vec::new();
        for token in tokens {
            if token.is_none() {
                continue;
            }
            if token.is_cancelled() {
                return token;
            }
            live.push(token);
        }
        let retained = live
            .iter()
            .filter_map(|t| t.deadline().map(|d| (d, t.id())))
            .max_by_key(|(deadline, _)| *deadline);
        if let Some((_, keep)) = retained {
            live.retain(|t| t.deadline().is_none() || t.id() == keep);
        }
        if live.is_empty() {
            return CancellationToken::none();
        }
        if live.len() == 1 {
            return live.remove(0);
        }
        let combined = CancellationToken::make(retained.map(|(deadline, _)| deadline));
        let mut guards = Vec::with_capacity(live.len());
        for token in &live {
            let downstream = combined.clone();
            guards.push(token.on_cancel(move |err| {
                let relayed = CancelledError::with_cause(downstream.id(), err.clone());
                downstream.do_cancel(relayed);
            }));
        }
        if let Some(inner) = &combined.inner {
            *inner.guards.lock().expect("guard lock poisoned") = guards;
        }
        combined
    }

    pub(crate) fn do_cancel_reason(&self, reason: CancelReason) {
        let err = CancelledError::new(self.id(), reason);
        self.do_cancel(err);
    }

    fn do_cancel(&self, err: CancelledError) {
        let Some(inner) = &self.inner else { return };
        let callbacks = {
            let mut state = inner.state.lock().expect("token state poisoned");
            match &mut *state {
                TokenState::Cancelled(_) => return,
                TokenState::Active { callbacks, .. } => {
                    let callbacks = std::mem::take(callbacks);
                    *state = TokenState::Cancelled(err.clone());
                    callbacks
                }
            }
        };
        for (_, callback) in callbacks {
            callback(&err);
        }
        inner.notify.notify_waiters();
        // Detach from combined sources and stop any pending timer.
        inner.guards.lock().expect("guard lock poisoned").clear();
        for handle in inner
            .watchers
            .lock()
            .expect("watcher lock poisoned")
            .drain(..)
        {
            handle.abort();
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("id", &self.id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Capability to remove a pending cancellation callback.
///
/// Unregisters on drop; call [`forget`](CancelRegistration::forget) to keep
/// the callback armed for the token's whole lifetime.
pub struct CancelRegistration {
    token: Weak<TokenInner>,
    id: u64,
}

impl CancelRegistration {
    fn inert() -> Self {
        Self {
            token: Weak::new(),
            id: 0,
        }
    }

    /// Remove the callback if it has not fired yet. Idempotent.
    pub fn unregister(&mut self) {
        if let Some(inner) = self.token.upgrade()
            && let Ok(mut state) = inner.state.lock()
            && let TokenState::Active { callbacks, .. } = &mut *state
        {
            callbacks.retain(|(id, _)| *id != self.id);
        }
        self.token = Weak::new();
    }

    /// Leave the callback registered forever.
    pub fn forget(mut self) {
        self.token = Weak::new();
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for CancelRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRegistration")
            .field("armed", &(self.token.strong_count() > 0))
            .finish()
    }
}

/// Exclusive owner of a [`CancellationToken`]: the only handle that can
/// cancel it directly.
#[derive(Debug)]
pub struct CancellationSource {
    token: CancellationToken,
}

impl CancellationSource {
    /// Create a source owning a fresh active token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new_active(),
        }
    }

    /// Cloneable token observed by cooperating tasks.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel with [`CancelReason::Unspecified`]. Idempotent.
    pub fn cancel(&self) {
        self.token.do_cancel_reason(CancelReason::Unspecified);
    }

    /// Cancel with a descriptive reason. Only the first cancellation
    /// records a reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.token.do_cancel_reason(reason);
    }

    /// Arm a timer that cancels the token after `timeout`. The timer is
    /// released if the token cancels first or all handles are dropped.
    pub fn cancel_after(&self, timeout: Duration) {
        self.token.arm_timer(timeout);
    }

    /// Returns `true` once the owned token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}
