// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for the ring buffer FIFO-slice invariant.

use corun_buffer::{OverflowPolicy, RingBuffer};
use proptest::prelude::*;

/// Model the expected surviving window for a policy given every value ever
/// written (after the reads already performed).
fn expected_contents(policy: OverflowPolicy, pending: &[u32], capacity: usize) -> Vec<u32> {
    match policy {
        // Fixed never drops: callers stop writing when full, so pending is
        // already the surviving window.
        OverflowPolicy::Fixed => pending.to_vec(),
        OverflowPolicy::Drop => pending.iter().take(capacity).copied().collect(),
        OverflowPolicy::Latest => {
            let skip = pending.len().saturating_sub(capacity);
            pending.iter().skip(skip).copied().collect()
        }
    }
}

proptest! {
    #[test]
    fn reads_observe_contiguous_fifo_slice(
        capacity in 1usize..8,
        values in proptest::collection::vec(0u32..1000, 0..32),
        policy_pick in 0u8..3,
    ) {
        let policy = match policy_pick {
            0 => OverflowPolicy::Fixed,
            1 => OverflowPolicy::Drop,
            _ => OverflowPolicy::Latest,
        };
        let mut buffer = RingBuffer::new(capacity, policy);
        let mut accepted: Vec<u32> = Vec::new();
        for &value in &values {
            match policy {
                OverflowPolicy::Fixed => {
                    if buffer.write(value).is_ok() {
                        accepted.push(value);
                    } else {
                        // A refused write must leave the buffer untouched.
                        prop_assert!(buffer.is_full());
                    }
                }
                _ => {
                    buffer.write(value).unwrap();
                    accepted.push(value);
                }
            }
        }
        let expected = expected_contents(policy, &accepted, capacity);
        let drained: Vec<u32> = buffer.into_iter().collect();
        prop_assert_eq!(drained, expected);
    }

    #[test]
    fn interleaved_writes_and_reads_stay_fifo(
        capacity in 1usize..6,
        ops in proptest::collection::vec(proptest::bool::ANY, 1..64),
    ) {
        // With the Fixed policy and |writes| - |reads| <= capacity, the
        // buffer must behave exactly like an unbounded FIFO queue.
        let mut buffer = RingBuffer::new(capacity, OverflowPolicy::Fixed);
        let mut model = std::collections::VecDeque::new();
        let mut next = 0u32;
        for is_write in ops {
            if is_write {
                if model.len() < capacity {
                    buffer.write(next).unwrap();
                    model.push_back(next);
                    next += 1;
                }
            } else {
                prop_assert_eq!(buffer.read(), model.pop_front());
            }
            prop_assert_eq!(buffer.len(), model.len());
        }
        let rest: Vec<u32> = buffer.into_iter().collect();
        let model_rest: Vec<u32> = model.into_iter().collect();
        prop_assert_eq!(rest, model_rest);
    }

    #[test]
    fn latest_capacity_one_always_holds_most_recent(values in proptest::collection::vec(0u32..100, 1..20)) {
        let mut buffer = RingBuffer::new(1, OverflowPolicy::Latest);
        for &value in &values {
            buffer.write(value).unwrap();
            prop_assert_eq!(buffer.peek(), Some(&value));
        }
        prop_assert_eq!(buffer.read(), values.last().copied());
    }
}
