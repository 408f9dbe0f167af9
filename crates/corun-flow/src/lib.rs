// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-flow
//!
//! A lazy, restartable reactive pipeline. A [`FlowProcessor`] is an
//! immutable chain of per-item stream transforms; a [`Flowable`] closes
//! over a source factory plus such a chain, and every terminal call builds
//! a fresh pipeline instance supervised by a cancellation token.
//!
//! Items travel as `anyhow::Result<T>`: errors flow through the same
//! stream and stages like
//! [`resume_on_error`](FlowProcessor::resume_on_error) decide whether to
//! recover. Cancellation errors remain distinguishable by downcast.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod flowable;
mod observable;
mod processor;

pub use corun_cancel::{CancelStreamOptions, FallibleStream};
pub use flowable::Flowable;
pub use observable::{BridgeOptions, Observable, Observer, Subscription};
pub use processor::FlowProcessor;
