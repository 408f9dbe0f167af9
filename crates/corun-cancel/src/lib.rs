// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-cancel
//!
//! Cooperative cancellation for the corun runtime: cloneable tokens, an
//! exclusive [`CancellationSource`] controller, token combination with
//! timeout subsumption, and cancellation-aware wrappers for futures
//! ([`race`]) and streams ([`cancellable_stream`]).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod race;
mod stream;
mod token;

pub use race::{race, race_timeout};
pub use stream::{CancelStreamOptions, FallibleStream, OnCancel, cancellable_stream};
pub use token::{
    CancelReason, CancelRegistration, CancellationSource, CancellationToken, CancelledError,
    TokenId, TokenPhase,
};
