// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-writer sequence number generation.
//!
//! Sequence numbers start at 1 and are never reused, not even across a writer
//! restart when a [`SequenceStore`](crate::persistence::SequenceStore) provides
//! the last number handed out.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::SequenceNumber;

/// Monotonic sequence number generator (one per writer).
///
/// # Thread Safety
///
/// `next()` is a single `fetch_add`; concurrent callers always receive
/// distinct, increasing numbers.
///
/// # Example
///
/// ```
/// use hdds_reliable::reliability::SeqNumGenerator;
///
/// let gen = SeqNumGenerator::new();
/// assert_eq!(gen.next(), 1);
/// assert_eq!(gen.next(), 2);
/// ```
#[derive(Debug)]
pub struct SeqNumGenerator {
    /// Next sequence number to assign.
    next: AtomicU64,
}

impl SeqNumGenerator {
    /// Generator starting at sequence number 1.
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Generator resuming after `last` (the last number already used).
    pub fn starting_after(last: SequenceNumber) -> Self {
        Self {
            next: AtomicU64::new(last.saturating_add(1)),
        }
    }

    /// Take the next sequence number.
    #[inline]
    pub fn next(&self) -> SequenceNumber {
        // fetch_add returns the OLD value, which is the one to hand out
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Next number that `next()` would return.
    #[inline]
    pub fn peek(&self) -> SequenceNumber {
        self.next.load(Ordering::Relaxed)
    }

    /// Last number handed out (0 if none yet).
    #[inline]
    pub fn last(&self) -> SequenceNumber {
        self.peek().saturating_sub(1)
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_seqgen_starts_at_one() {
        let gen = SeqNumGenerator::new();
        assert_eq!(gen.last(), 0);
        assert_eq!(gen.next(), 1, "First sequence number should be 1");
    }

    #[test]
    fn test_seqgen_resumes_after_last() {
        let gen = SeqNumGenerator::starting_after(41);
        assert_eq!(gen.peek(), 42);
        assert_eq!(gen.next(), 42);
        assert_eq!(gen.last(), 42);
    }

    #[test]
    fn test_seqgen_concurrent_unique() {
        let gen = Arc::new(SeqNumGenerator::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let gen = Arc::clone(&gen);
            handles.push(thread::spawn(move || {
                (0..500).map(|_| gen.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for seq in h.join().expect("thread should complete") {
                assert!(seen.insert(seq), "duplicate sequence number {}", seq);
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(gen.last(), 4000);
    }
}
