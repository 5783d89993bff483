// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pool of recycled [`CacheChange`] records.
//!
//! Bounds the number of live change envelopes per endpoint and keeps released
//! records around so the write/receive hot path does not allocate.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::change::CacheChange;

/// Pool of change records.
#[derive(Debug)]
pub struct ChangePool {
    free: Mutex<Vec<CacheChange>>,
    outstanding: AtomicUsize,
    /// 0 = unbounded.
    max_size: usize,
}

impl ChangePool {
    /// Create a pool with `initial` preallocated records and at most `max_size`
    /// records reserved at once (0 = unbounded).
    pub fn new(initial: usize, max_size: usize) -> Self {
        let mut free = Vec::with_capacity(initial);
        free.resize_with(initial, CacheChange::default);
        Self {
            free: Mutex::new(free),
            outstanding: AtomicUsize::new(0),
            max_size,
        }
    }

    /// Reserve a blank change record. `None` when `max_size` records are out.
    pub fn reserve_cache(&self) -> Option<CacheChange> {
        let mut free = self.free.lock();
        let outstanding = self.outstanding.load(Ordering::Acquire);
        if self.max_size > 0 && outstanding >= self.max_size {
            log::debug!(
                "[change_pool] exhausted: {} records outstanding (max {})",
                outstanding,
                self.max_size
            );
            return None;
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(free.pop().unwrap_or_default())
    }

    /// Return a record; its payload reference is dropped immediately.
    pub fn release_cache(&self, mut change: CacheChange) {
        change.reset();
        let mut free = self.free.lock();
        free.push(change);
        // Saturating: records built outside the pool may be released into it.
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of reserved records not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle records.
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for ChangePool {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_recycles_records() {
        let pool = ChangePool::new(2, 0);
        assert_eq!(pool.free_count(), 2);

        let mut change = pool.reserve_cache().expect("reserve");
        change.sequence_number = 9;
        assert_eq!(pool.outstanding(), 1);

        pool.release_cache(change);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.free_count(), 2);

        let again = pool.reserve_cache().expect("reserve");
        assert_eq!(again.sequence_number, 0, "record was reset");
    }

    #[test]
    fn bounded_pool_refuses_beyond_max() {
        let pool = ChangePool::new(0, 1);
        let first = pool.reserve_cache().expect("first");
        assert!(pool.reserve_cache().is_none());
        pool.release_cache(first);
        assert!(pool.reserve_cache().is_some());
    }
}
