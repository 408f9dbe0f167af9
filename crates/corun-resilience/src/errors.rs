// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transient / non-retryable error vocabulary and classification.

use corun_cancel::CancelledError;
use corun_time::DeadlineExceededError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Raised by the rate limiter when a limit is hit. Always transient;
/// `retry_after` tells the retrier how long to back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    /// Time until the limit clears.
    pub retry_after: Duration,
}

/// Marks an error as transient, optionally carrying a backoff hint.
#[derive(Debug)]
pub struct RetryableError {
    source: anyhow::Error,
    retry_after: Option<Duration>,
}

impl RetryableError {
    /// Wrap an error as transient.
    #[must_use]
    pub fn new(source: anyhow::Error) -> Self {
        Self {
            source,
            retry_after: None,
        }
    }

    /// Attach a backoff hint.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// The backoff hint, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Unwrap the original error.
    #[must_use]
    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient: {}", self.source)
    }
}

impl std::error::Error for RetryableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Marks an error as final: the retrier gives up immediately. Also used to
/// wrap the last error once attempts are exhausted.
#[derive(Debug)]
pub struct NonRetryableError {
    source: anyhow::Error,
}

impl NonRetryableError {
    /// Wrap an error as final.
    #[must_use]
    pub fn new(source: anyhow::Error) -> Self {
        Self { source }
    }

    /// Unwrap the original error.
    #[must_use]
    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

impl fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "non-retryable: {}", self.source)
    }
}

impl std::error::Error for NonRetryableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Extract a backoff hint from anywhere in the error chain.
#[must_use]
pub fn retry_after_hint(err: &anyhow::Error) -> Option<Duration> {
    for cause in err.chain() {
        if let Some(exceeded) = cause.downcast_ref::<RateLimitExceeded>() {
            return Some(exceeded.retry_after);
        }
        if let Some(marked) = cause.downcast_ref::<RetryableError>()
            && let Some(hint) = marked.retry_after()
        {
            return Some(hint);
        }
        if let Some(crate::limiter::RateLimitError::Exceeded(exceeded)) =
            cause.downcast_ref::<crate::limiter::RateLimitError>()
        {
            return Some(exceeded.retry_after);
        }
    }
    None
}

/// String codes treated as transient when no marker type decides.
const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "500",
    "503",
    "504",
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ETIMEDOUT",
    "EPIPE",
    "EAI_AGAIN",
];

/// Default transience detector.
///
/// Marker types win: cancellations, expired deadlines, and
/// [`NonRetryableError`] are final; [`RetryableError`] and
/// [`RateLimitExceeded`] are transient. Otherwise the error text is scanned
/// for throttling / connection codes.
#[must_use]
pub fn default_is_transient(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if cause.downcast_ref::<CancelledError>().is_some()
            || cause.downcast_ref::<DeadlineExceededError>().is_some()
            || cause.downcast_ref::<NonRetryableError>().is_some()
        {
            return false;
        }
        if cause.downcast_ref::<RetryableError>().is_some()
            || cause.downcast_ref::<RateLimitExceeded>().is_some()
        {
            return true;
        }
        if let Some(limiter) = cause.downcast_ref::<crate::limiter::RateLimitError>() {
            return matches!(limiter, crate::limiter::RateLimitError::Exceeded(_));
        }
    }
    let text = err.to_string();
    TRANSIENT_MARKERS.iter().any(|code| text.contains(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_types_classify() {
        assert!(default_is_transient(&anyhow::Error::new(
            RetryableError::new(anyhow::anyhow!("glitch"))
        )));
        assert!(default_is_transient(&anyhow::Error::new(RateLimitExceeded {
            retry_after: Duration::from_millis(10),
        })));
        assert!(!default_is_transient(&anyhow::Error::new(
            NonRetryableError::new(anyhow::anyhow!("broken"))
        )));
        assert!(!default_is_transient(&anyhow::Error::new(
            DeadlineExceededError
        )));
    }

    #[test]
    fn string_codes_classify() {
        assert!(default_is_transient(&anyhow::anyhow!("HTTP 503 upstream")));
        assert!(default_is_transient(&anyhow::anyhow!("read: ECONNRESET")));
        assert!(!default_is_transient(&anyhow::anyhow!("invalid argument")));
    }

    #[test]
    fn markers_beat_string_codes() {
        // The message contains a transient-looking code, but the marker
        // says final.
        let err =
            anyhow::Error::new(NonRetryableError::new(anyhow::anyhow!("status 503")));
        assert!(!default_is_transient(&err));
    }

    #[test]
    fn hint_is_extracted_from_chain() {
        let err = anyhow::Error::new(
            RetryableError::new(anyhow::anyhow!("throttled"))
                .with_retry_after(Duration::from_millis(250)),
        );
        assert_eq!(retry_after_hint(&err), Some(Duration::from_millis(250)));
        assert_eq!(retry_after_hint(&anyhow::anyhow!("plain")), None);
    }
}
