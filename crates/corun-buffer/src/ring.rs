// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixed-capacity FIFO buffer with a configurable overflow policy.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Rule applied when a write would exceed the buffer's capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the write with [`BufferFullError`].
    #[default]
    Fixed,
    /// Silently discard the incoming value, preserving existing contents.
    Drop,
    /// Evict the oldest value to make room, preserving the most recent N.
    Latest,
}

/// Raised by the `Fixed` overflow policy when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer full (capacity {capacity})")]
pub struct BufferFullError {
    /// Capacity of the buffer that refused the write.
    pub capacity: usize,
}

/// A fixed-capacity FIFO ring buffer.
///
/// Reads always observe a contiguous FIFO slice of the writes; which slice
/// is determined by the [`OverflowPolicy`]: `Drop` keeps the oldest values,
/// `Latest` keeps the newest, and `Fixed` never loses any.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> RingBuffer<T> {
    /// Create a buffer with the given capacity and policy.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity >= 1, "ring buffer capacity must be at least 1");
        Self {
            items: VecDeque::new(),
            capacity,
            policy,
        }
    }

    /// Append a value, applying the overflow policy when full.
    pub fn write(&mut self, value: T) -> Result<(), BufferFullError> {
        if self.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Fixed => {
                    return Err(BufferFullError {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::Drop => return Ok(()),
                OverflowPolicy::Latest => {
                    self.items.pop_front();
                }
            }
        }
        self.items.push_back(value);
        Ok(())
    }

    /// Remove and return the oldest value.
    pub fn read(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Look at the oldest value without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `true` when at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The configured overflow policy.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Discard all buffered values.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate over buffered values in FIFO order without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Drain all buffered values in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}

impl<T> IntoIterator for RingBuffer<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    /// Consume the buffer, yielding values in FIFO order.
    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut buffer = RingBuffer::new(4, OverflowPolicy::Fixed);
        for i in 0..4 {
            buffer.write(i).unwrap();
        }
        assert_eq!(buffer.read(), Some(0));
        assert_eq!(buffer.read(), Some(1));
        buffer.write(4).unwrap();
        assert_eq!(buffer.read(), Some(2));
        assert_eq!(buffer.read(), Some(3));
        assert_eq!(buffer.read(), Some(4));
        assert_eq!(buffer.read(), None);
    }

    #[test]
    fn fixed_policy_errors_when_full() {
        let mut buffer = RingBuffer::new(2, OverflowPolicy::Fixed);
        buffer.write(1).unwrap();
        buffer.write(2).unwrap();
        let err = buffer.write(3).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn drop_policy_preserves_existing_contents() {
        let mut buffer = RingBuffer::new(2, OverflowPolicy::Drop);
        buffer.write(1).unwrap();
        buffer.write(2).unwrap();
        buffer.write(3).unwrap();
        assert_eq!(buffer.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn latest_policy_evicts_oldest() {
        let mut buffer = RingBuffer::new(2, OverflowPolicy::Latest);
        buffer.write(1).unwrap();
        buffer.write(2).unwrap();
        buffer.write(3).unwrap();
        assert_eq!(buffer.into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn latest_with_capacity_one_holds_most_recent() {
        let mut buffer = RingBuffer::new(1, OverflowPolicy::Latest);
        for i in 0..10 {
            buffer.write(i).unwrap();
        }
        assert_eq!(buffer.peek(), Some(&9));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut buffer = RingBuffer::new(2, OverflowPolicy::Fixed);
        buffer.write("a").unwrap();
        assert_eq!(buffer.peek(), Some(&"a"));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buffer = RingBuffer::new(3, OverflowPolicy::Fixed);
        buffer.write(1).unwrap();
        buffer.write(2).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_panics() {
        let _ = RingBuffer::<i32>::new(0, OverflowPolicy::Fixed);
    }

    #[test]
    fn policy_serde_round_trip() {
        for policy in [
            OverflowPolicy::Fixed,
            OverflowPolicy::Drop,
            OverflowPolicy::Latest,
        ] {
            let json = serde_json::to_string(&policy).unwrap();
            let back: OverflowPolicy = serde_json::from_str(&json).unwrap();
            assert_eq!(back, policy);
        }
        assert_eq!(
            serde_json::to_string(&OverflowPolicy::Latest).unwrap(),
            r#""latest""#
        );
    }
}
