// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-time
//!
//! Deadline arithmetic and cancellable delays. A [`Deadline`] is an absolute
//! monotonic horizon; [`delay`] is a sleep that a cancellation token can cut
//! short. Dropping a delay future releases its timer.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use corun_cancel::{CancellationToken, CancelledError, race};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// An absolute point in monotonic time after which an operation must abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    instant: Instant,
}

impl Deadline {
    /// A deadline `duration` from now.
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self {
            instant: Instant::now() + duration,
        }
    }

    /// A deadline at an explicit instant.
    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self { instant }
    }

    /// Time left until the deadline, clamped to zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.instant.saturating_duration_since(Instant::now())
    }

    /// `true` once no time remains.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// The underlying instant.
    #[must_use]
    pub fn instant(&self) -> Instant {
        self.instant
    }
}

/// Raised when a deadline has elapsed before (or during) an operation.
#[derive(Debug, Clone, Copy, Default, Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceededError;

/// Sleep for `duration` unless `token` fires first.
pub async fn delay(duration: Duration, token: &CancellationToken) -> Result<(), CancelledError> {
    race(tokio::time::sleep(duration), token).await
}

/// Sleep until `deadline` unless `token` fires first.
pub async fn sleep_until_deadline(
    deadline: &Deadline,
    token: &CancellationToken,
) -> Result<(), CancelledError> {
    race(tokio::time::sleep_until(deadline.instant()), token).await
}
