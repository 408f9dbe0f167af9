// SPDX-License-Identifier: MIT OR Apache-2.0
//! Racing futures against cancellation.

use crate::token::{CancellationToken, CancelledError};
use std::future::Future;
use std::time::Duration;

/// Race `fut` against `token`.
///
/// If the token is already cancelled the future is never polled and the
/// token's error is returned. Otherwise the first to finish wins; a ready
/// value beats a simultaneous cancellation.
pub async fn race<F: Future>(
    fut: F,
    token: &CancellationToken,
) -> Result<F::Output, CancelledError> {
    if let Some(err) = token.reason() {
        return Err(err);
    }
    tokio::select! {
        biased;
        value = fut => Ok(value),
        _ = token.cancelled() => Err(token.cancel_error()),
    }
}

/// Race `fut` against a fresh timeout token.
pub async fn race_timeout<F: Future>(
    fut: F,
    timeout: Duration,
) -> Result<F::Output, CancelledError> {
    let token = CancellationToken::with_timeout(timeout);
    race(fut, &token).await
}
