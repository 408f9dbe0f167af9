// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-util
//!
//! Small glue types: an async memoized [`Lazy`] producer and a single-shot
//! [`OnceFn`]. Optional values are plain `Option<T>` throughout the
//! runtime; no bespoke maybe type exists.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::sync::Mutex;
use tokio::sync::OnceCell;

/// An async memoized producer.
///
/// The factory runs at most once; every caller of [`get`](Lazy::get)
/// awaits the same initialization and then borrows the same value.
pub struct Lazy<T, F> {
    cell: OnceCell<T>,
    init: F,
}

impl<T, F, Fut> Lazy<T, F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = T>,
{
    /// Wrap a factory without running it.
    pub fn new(init: F) -> Self {
        Self {
            cell: OnceCell::new(),
            init,
        }
    }

    /// The memoized value, producing it on first use.
    pub async fn get(&self) -> &T {
        self.cell.get_or_init(|| (self.init)()).await
    }

    /// The value if it has already been produced.
    pub fn try_get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// `true` once the factory has run.
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T: std::fmt::Debug, F> std::fmt::Debug for Lazy<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy").field("value", &self.cell.get()).finish()
    }
}

type BoxedOnce<T> = Box<dyn FnOnce() -> T + Send>;

/// A function that can be called at most once.
///
/// The first [`call`](OnceFn::call) runs the wrapped closure and returns
/// its value; every later call returns `None`.
pub struct OnceFn<T> {
    inner: Mutex<Option<BoxedOnce<T>>>,
}

impl<T> OnceFn<T> {
    /// Wrap a closure.
    pub fn new<F>(callable: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::new(callable))),
        }
    }

    /// Run the closure if it has not run yet.
    pub fn call(&self) -> Option<T> {
        let callable = self.inner.lock().expect("once lock poisoned").take();
        callable.map(|f| f())
    }

    /// `true` once the closure has run (or been taken).
    pub fn is_called(&self) -> bool {
        self.inner.lock().expect("once lock poisoned").is_none()
    }
}

impl<T> std::fmt::Debug for OnceFn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceFn")
            .field("called", &self.is_called())
            .finish()
    }
}
