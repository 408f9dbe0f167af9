// SPDX-License-Identifier: MIT OR Apache-2.0
//! corun-buffer
//!
//! Bounded FIFO storage for the runtime: a [`RingBuffer`] with pluggable
//! [`OverflowPolicy`], and an awaitable [`AsyncQueue`] layering a signal and
//! a three-state lifecycle (`Open`, `ReadOnly`, `Closed`) on top of it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod queue;
mod ring;

pub use queue::{AsyncQueue, QueueError, QueueState};
pub use ring::{BufferFullError, OverflowPolicy, RingBuffer};
