//! Thread-safe counter used for session ids and action sequence numbers.
//!
//! # Where do sequence numbers appear? (for beginners)
//!
//! IOTP uses increasing counters in two places:
//!
//! - **Session ids** – the server numbers every accepted connection.  The
//!   session registry is ordered by this id, so a stable, never-repeating
//!   value is required.
//! - **Action sequence numbers** – every ACTION a client sends carries one
//!   byte of sequence number, and the server's CONFIRM echoes it back so the
//!   client can match the reply to its request.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64` internally.  `fetch_add` reads, increments
//! and writes the value as one indivisible step, so two sessions can ask for
//! an id at the same moment without ever receiving the same value.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter.
///
/// Values start at 0 and increment by 1 with each call to [`next`].
/// The counter wraps around at `u64::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use iotp_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next_u8(), 1);
/// ```
///
/// [`next`]: SequenceCounter::next
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first [`next`](Self::next) returns `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            inner: AtomicU64::new(first),
        }
    }

    /// Returns the next value and atomically increments the counter.
    ///
    /// `Ordering::Relaxed` is sufficient: the value is only used as an
    /// identifier, never to publish other memory to another thread.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the next value truncated to the one-byte wire sequence number.
    ///
    /// ACTION sequence numbers are a single byte, so they repeat every 256
    /// actions.  That is enough to pair a CONFIRM with the one outstanding
    /// ACTION a client may have in flight.
    pub fn next_u8(&self) -> u8 {
        (self.next() & 0xFF) as u8
    }

    /// Returns the current value without incrementing.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
