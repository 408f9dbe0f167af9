// SPDX-License-Identifier: MIT OR Apache-2.0
//! Multi-limit rate limiter with all-or-nothing token reservation.

use crate::bucket::{BucketError, TokenBucket};
use crate::errors::RateLimitExceeded;
use corun_cancel::{CancellationToken, CancelledError};
use corun_exec::{ExecuteError, Executor, ExecutorExt, ImmediateExecutor};
use corun_time::DeadlineExceededError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

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

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

/// Declarative limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimit {
    /// Every call costs one token.
    Fixed {
        /// Tokens per interval.
        rate: u64,
        /// Replenishment interval. Defaults to one second.
        #[serde(default = "default_interval", with = "duration_millis")]
        interval: Duration,
    },
    /// Call cost is computed from the request weight by the limiter's
    /// cost calculator.
    Variable {
        /// Tokens per interval.
        rate: u64,
        /// Replenishment interval. Defaults to one second.
        #[serde(default = "default_interval", with = "duration_millis")]
        interval: Duration,
    },
}

impl RateLimit {
    /// A fixed limit with the default one-second interval.
    #[must_use]
    pub fn fixed(rate: u64) -> Self {
        Self::Fixed {
            rate,
            interval: default_interval(),
        }
    }

    /// A variable limit with the default one-second interval.
    #[must_use]
    pub fn variable(rate: u64) -> Self {
        Self::Variable {
            rate,
            interval: default_interval(),
        }
    }
}

/// Maps the caller's request weight to a token cost for variable limits.
pub type CostCalculator = Arc<dyn Fn(u64) -> u64 + Send + Sync>;

/// Per-call input for [`RateLimiter::execute`].
#[derive(Debug, Clone, Default)]
pub struct RateLimitRequest {
    /// Cancellation token for the call.
    pub token: CancellationToken,
    /// Weight consulted by variable limits. Zero is treated as one.
    pub weight: u64,
}

impl RateLimitRequest {
    /// A request with the given token and unit weight.
    #[must_use]
    pub fn with_token(token: &CancellationToken) -> Self {
        Self {
            token: token.clone(),
            weight: 1,
        }
    }

    /// Override the weight.
    #[must_use]
    pub fn weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }
}

/// Errors from rate-limited execution.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The call's token was already cancelled on entry.
    #[error(transparent)]
    DeadlineExceeded(#[from] DeadlineExceededError),
    /// A limit is exhausted; carries the time until it clears.
    #[error(transparent)]
    Exceeded(#[from] RateLimitExceeded),
    /// A limit was asked for an impossible cost. Never retryable.
    #[error(transparent)]
    InvalidCost(#[from] BucketError),
    /// The delegated executor failed or was cancelled mid-run.
    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

impl From<CancelledError> for RateLimitError {
    fn from(err: CancelledError) -> Self {
        Self::Execute(ExecuteError::Cancelled(err))
    }
}

struct LimitEntry {
    bucket: TokenBucket,
    variable: bool,
}

/// Rate-limited execution over one or more token buckets.
///
/// A call must win a token from every bucket; on any failure the tokens
/// already taken are refunded, so a refused call consumes nothing, and the
/// reported `retry_after` is the largest across the failed limits.
pub struct RateLimiter {
    limits: Vec<LimitEntry>,
    cost: Option<CostCalculator>,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limits", &self.limits.len())
            .field("has_cost_calculator", &self.cost.is_some())
            .finish()
    }
}

impl RateLimiter {
    /// Build a limiter over `limits`, executing callables immediately.
    #[must_use]
    pub fn new<I>(limits: I) -> Self
    where
        I: IntoIterator<Item = RateLimit>,
    {
        Self::with_executor(limits, Arc::new(ImmediateExecutor))
    }

    /// Build a limiter delegating admitted calls to `executor`.
    #[must_use]
    pub fn with_executor<I>(limits: I, executor: Arc<dyn Executor>) -> Self
    where
        I: IntoIterator<Item = RateLimit>,
    {
        let limits = limits
            .into_iter()
            .map(|limit| match limit {
                RateLimit::Fixed { rate, interval } => LimitEntry {
                    bucket: TokenBucket::new(rate, interval),
                    variable: false,
                },
                RateLimit::Variable { rate, interval } => LimitEntry {
                    bucket: TokenBucket::new(rate, interval),
                    variable: true,
                },
            })
            .collect();
        Self {
            limits,
            cost: None,
            executor,
        }
    }

    /// Install a cost calculator consulted by variable limits.
    #[must_use]
    pub fn with_cost_calculator<F>(mut self, calculator: F) -> Self
    where
        F: Fn(u64) -> u64 + Send + Sync + 'static,
    {
        self.cost = Some(Arc::new(calculator));
        self
    }

    fn cost_for(&self, entry: &LimitEntry, weight: u64) -> u64 {
        if entry.variable {
            let weight = weight.max(1);
            self.cost.as_ref().map_or(weight, |calc| calc(weight))
        } else {
            1
        }
    }

    /// Reserve tokens from every limit or none, returning the delay until
    /// the request would be admissible (zero means admitted).
    fn reserve(&self, weight: u64) -> Result<Duration, BucketError> {
        let mut taken: Vec<(usize, u64)> = Vec::new();
        let mut delay = Duration::ZERO;
        for (index, entry) in self.limits.iter().enumerate() {
            let cost = self.cost_for(entry, weight);
            let consumed = match entry.bucket.try_consume(cost) {
                Ok(consumed) => consumed,
                Err(err) => {
                    self.refund(&taken);
                    return Err(err);
                }
            };
            if consumed {
                taken.push((index, cost));
            } else {
                match entry.bucket.time_until_consumable(cost) {
                    Ok(wait) => delay = delay.max(wait),
                    Err(err) => {
                        self.refund(&taken);
                        return Err(err);
                    }
                }
            }
        }
        if delay > Duration::ZERO {
            self.refund(&taken);
        }
        Ok(delay)
    }

    fn refund(&self, taken: &[(usize, u64)]) {
        for &(index, cost) in taken {
            self.limits[index].bucket.return_tokens(cost);
        }
    }

    /// Run `callable` if every limit admits it.
    ///
    /// An already-cancelled request token raises
    /// [`DeadlineExceededError`]; an exhausted limit raises
    /// [`RateLimitExceeded`] with the computed `retry_after`, and the call
    /// consumes no tokens.
    pub async fn execute<F, Fut, T>(
        &self,
        callable: F,
        request: RateLimitRequest,
    ) -> Result<T, RateLimitError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if request.token.is_cancelled() {
            return Err(DeadlineExceededError.into());
        }
        let delay = self.reserve(request.weight.max(1))?;
        if delay > Duration::ZERO {
            debug!(target: "corun.ratelimit", retry_after_ms = delay.as_millis() as u64, "limit hit");
            return Err(RateLimitExceeded { retry_after: delay }.into());
        }
        let value = self.executor.execute(callable, &request.token).await?;
        Ok(value)
    }
}
