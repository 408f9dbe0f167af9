// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-resilience
//!
//! Rate limiting and retry for cooperative work: a linearly replenishing
//! [`TokenBucket`], a multi-limit [`RateLimiter`] with all-or-nothing token
//! reservation, and a [`Retryable`] that classifies errors as transient and
//! backs off exponentially under a deadline.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod errors;
mod limiter;
mod retry;

pub use bucket::{BucketError, TokenBucket};
pub use errors::{
    NonRetryableError, RateLimitExceeded, RetryableError, default_is_transient, retry_after_hint,
};
pub use limiter::{
    CostCalculator, RateLimit, RateLimitError, RateLimitRequest, RateLimiter,
};
pub use retry::{Backoff, RetrySettings, Retryable, TransientClassifier};
