// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential-backoff retrier over an executor or rate limiter.

use crate::errors::{NonRetryableError, default_is_transient, retry_after_hint};
use crate::limiter::{RateLimitRequest, RateLimiter};
use corun_cancel::CancellationToken;
use corun_exec::{Executor, ExecutorExt, ImmediateExecutor};
use corun_time::{Deadline, DeadlineExceededError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Serde helper for `Duration` as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Exponential backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub base: Duration,
    /// Growth factor per retry.
    pub factor: u32,
    /// Upper bound for a single delay.
    #[serde(with = "duration_millis")]
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2,
            cap: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before the retry following `completed` failed attempts
    /// (so `completed >= 1`).
    #[must_use]
    pub fn delay_for(&self, completed: u32) -> Duration {
        let exponent = completed.saturating_sub(1);
        let factor = u64::from(self.factor).saturating_pow(exponent);
        let millis = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.cap)
    }
}

/// Settings for a [`Retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total number of attempts (initial call included).
    pub max_retries: u32,
    /// Overall horizon cap: the retrier never works past
    /// `min(deadline.remaining, max_delay)` from the start of the call.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Backoff curve between attempts.
    pub backoff: Backoff,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delay: Duration::from_secs(30),
            backoff: Backoff::default(),
        }
    }
}

/// Decides whether an error is worth retrying.
pub type TransientClassifier = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

enum RunVia {
    Executor(Arc<dyn Executor>),
    RateLimiter(Arc<RateLimiter>),
}

/// Retries a fallible async callable with exponential backoff.
///
/// Attempts run through an executor (default: immediate) or a
/// [`RateLimiter`]; a limiter's `retry_after` becomes the next sleep. Only
/// transient errors (per the classifier) are retried; exhausted attempts
/// wrap the last error in [`NonRetryableError`].
pub struct Retryable {
    settings: RetrySettings,
    classifier: TransientClassifier,
    via: RunVia,
}

impl std::fmt::Debug for Retryable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retryable")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Retryable {
    /// A retrier with the given settings, immediate execution, and the
    /// default classifier.
    #[must_use]
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            classifier: Arc::new(default_is_transient),
            via: RunVia::Executor(Arc::new(ImmediateExecutor)),
        }
    }

    /// Route attempts through an executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.via = RunVia::Executor(executor);
        self
    }

    /// Route attempts through a rate limiter; its `retry_after` hints
    /// drive the backoff.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.via = RunVia::RateLimiter(limiter);
        self
    }

    /// Replace the transience classifier.
    #[must_use]
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    async fn run_once<Fut, T>(&self, attempt: Fut) -> anyhow::Result<T>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match &self.via {
            RunVia::Executor(executor) => executor
                .execute(move || attempt, &CancellationToken::none())
                .await
                .map_err(anyhow::Error::new)?,
            RunVia::RateLimiter(limiter) => limiter
                .execute(move || attempt, RateLimitRequest::default())
                .await
                .map_err(anyhow::Error::new)?,
        }
    }

    /// Run `callable` until it succeeds, a non-transient error occurs, the
    /// deadline (or `max_delay` horizon) is hit, or attempts are
    /// exhausted.
    pub async fn execute<F, Fut, T>(
        &self,
        mut callable: F,
        deadline: Option<Deadline>,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut horizon_cap = self.settings.max_delay;
        if let Some(deadline) = &deadline {
            if deadline.is_expired() {
                return Err(DeadlineExceededError.into());
            }
            horizon_cap = horizon_cap.min(deadline.remaining());
        }
        let horizon = Deadline::after(horizon_cap);

        let attempts = self.settings.max_retries.max(1);
        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                let hint = last_error.as_ref().and_then(retry_after_hint);
                let pause = hint.unwrap_or_else(|| self.settings.backoff.delay_for(attempt - 1));
                if pause > horizon.remaining() {
                    debug!(target: "corun.retry", attempt, "backoff would cross the deadline");
                    return Err(DeadlineExceededError.into());
                }
                debug!(
                    target: "corun.retry",
                    attempt,
                    pause_ms = pause.as_millis() as u64,
                    hinted = hint.is_some(),
                    "backing off"
                );
                tokio::time::sleep(pause).await;
            }
            match self.run_once(callable()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !(self.classifier)(&err) {
                        debug!(target: "corun.retry", error = %err, "non-transient, giving up");
                        return Err(err);
                    }
                    warn!(target: "corun.retry", error = %err, attempt, "transient failure");
                    last_error = Some(err);
                }
            }
        }
        let last = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt was made"));
        Err(anyhow::Error::new(NonRetryableError::new(last)))
    }
}

impl Default for Retryable {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}
