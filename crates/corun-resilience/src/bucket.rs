// SPDX-License-Identifier: MIT OR Apache-2.0
//! Linearly replenishing token bucket.

use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors from token bucket operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BucketError {
    /// The requested cost is outside `[1, max_balance]`. Never retryable.
    #[error("token cost {cost} outside [1, {max}]")]
    InvalidCost {
        /// The rejected cost.
        cost: u64,
        /// The bucket's maximum balance.
        max: u64,
    },
}

struct BucketState {
    balance: u64,
    last_refill: Instant,
}

/// A token bucket replenishing linearly over its interval.
///
/// The balance grows by `floor(elapsed / interval * max_balance)`, capped at
/// `max_balance`; the sub-token remainder of `elapsed` is preserved so no
/// replenishment time is ever lost.
pub struct TokenBucket {
    max_balance: u64,
    interval: Duration,
    state: Mutex<BucketState>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("max_balance", &self.max_balance)
            .field("interval", &self.interval)
            .field("balance", &self.balance())
            .finish()
    }
}

impl TokenBucket {
    /// Create a bucket holding `max_balance` tokens that fully replenishes
    /// every `replenish_interval`. Starts full.
    ///
    /// # Panics
    ///
    /// Panics if `max_balance` is zero or the interval is zero.
    #[must_use]
    pub fn new(max_balance: u64, replenish_interval: Duration) -> Self {
        assert!(max_balance >= 1, "token bucket needs a positive balance");
        assert!(
            !replenish_interval.is_zero(),
            "replenish interval must be positive"
        );
        Self {
            max_balance,
            interval: replenish_interval,
            state: Mutex::new(BucketState {
                balance: max_balance,
                last_refill: Instant::now(),
            }),
        }
    }

    /// The bucket's maximum balance.
    #[must_use]
    pub fn max_balance(&self) -> u64 {
        self.max_balance
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        let earned = (elapsed.as_nanos() * u128::from(self.max_balance)
            / self.interval.as_nanos())
        .min(u128::from(self.max_balance)) as u64;
        if earned == 0 {
            return;
        }
        state.balance = (state.balance + earned).min(self.max_balance);
        if state.balance == self.max_balance {
            // Full bucket: any remainder is irrelevant.
            state.last_refill = Instant::now();
        } else {
            // Advance by the time the earned tokens were worth, keeping
            // the sub-token remainder.
            let advance_nanos = u128::from(earned) * self.interval.as_nanos()
                / u128::from(self.max_balance);
            state.last_refill += Duration::from_nanos(advance_nanos as u64);
        }
    }

    fn validate(&self, cost: u64) -> Result<(), BucketError> {
        if cost == 0 || cost > self.max_balance {
            return Err(BucketError::InvalidCost {
                cost,
                max: self.max_balance,
            });
        }
        Ok(())
    }

    /// Attempt to deduct `cost` tokens. Returns `false`, leaving the
    /// balance unchanged, when not enough tokens are available.
    pub fn try_consume(&self, cost: u64) -> Result<bool, BucketError> {
        self.validate(cost)?;
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        if state.balance >= cost {
            state.balance -= cost;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Refund `count` tokens, clamped to the maximum balance.
    pub fn return_tokens(&self, count: u64) {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        state.balance = (state.balance + count).min(self.max_balance);
    }

    /// Time until `cost` tokens will be available; zero when they already
    /// are.
    pub fn time_until_consumable(&self, cost: u64) -> Result<Duration, BucketError> {
        self.validate(cost)?;
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        if state.balance >= cost {
            return Ok(Duration::ZERO);
        }
        let needed = cost - state.balance;
        // Ceil so that after the wait the tokens really are available.
        let nanos = (u128::from(needed) * self.interval.as_nanos()
            + u128::from(self.max_balance)
            - 1)
            / u128::from(self.max_balance);
        let total = Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64);
        Ok(total.saturating_sub(state.last_refill.elapsed()))
    }

    /// Current balance snapshot (after replenishment).
    #[must_use]
    pub fn balance(&self) -> u64 {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        state.balance
    }
}
