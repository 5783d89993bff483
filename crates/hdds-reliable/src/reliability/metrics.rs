// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Counters for the reliability protocol.
//!
//! One instance per endpoint; the writer bumps the send-side counters and the
//! reader the receive-side ones. All updates are relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Reliability protocol counters.
#[derive(Debug, Default)]
pub struct ReliableMetrics {
    data_sent: AtomicU64,
    retransmit_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
    gaps_sent: AtomicU64,
    acknacks_received: AtomicU64,
    data_received: AtomicU64,
    duplicates_dropped: AtomicU64,
    out_of_order: AtomicU64,
    acknacks_sent: AtomicU64,
    samples_lost: AtomicU64,
    samples_rejected: AtomicU64,
    max_gap_size: AtomicU64,
}

/// Point-in-time copy of [`ReliableMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub data_sent: u64,
    pub retransmit_sent: u64,
    pub heartbeats_sent: u64,
    pub gaps_sent: u64,
    pub acknacks_received: u64,
    pub data_received: u64,
    pub duplicates_dropped: u64,
    pub out_of_order: u64,
    pub acknacks_sent: u64,
    pub samples_lost: u64,
    pub samples_rejected: u64,
    pub max_gap_size: u64,
}

impl ReliableMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_data_sent(&self, count: u64) {
        self.data_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retransmit_sent(&self, count: u64) {
        self.retransmit_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_heartbeats_sent(&self, count: u64) {
        self.heartbeats_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_gaps_sent(&self, count: u64) {
        self.gaps_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_acknacks_received(&self, count: u64) {
        self.acknacks_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_data_received(&self, count: u64) {
        self.data_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_duplicates_dropped(&self, count: u64) {
        self.duplicates_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_out_of_order(&self, count: u64) {
        self.out_of_order.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_acknacks_sent(&self, count: u64) {
        self.acknacks_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_samples_rejected(&self, count: u64) {
        self.samples_rejected.fetch_add(count, Ordering::Relaxed);
    }

    /// Record `count` samples declared lost in one event.
    pub fn record_lost(&self, count: u64) {
        self.samples_lost.fetch_add(count, Ordering::Relaxed);
        self.update_max_gap_size(count);
    }

    /// Keep the high-water mark of a single loss event.
    fn update_max_gap_size(&self, new_size: u64) {
        let mut current = self.max_gap_size.load(Ordering::Relaxed);
        while new_size > current {
            match self.max_gap_size.compare_exchange_weak(
                current,
                new_size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Copy all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            data_sent: self.data_sent.load(Ordering::Relaxed),
            retransmit_sent: self.retransmit_sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            gaps_sent: self.gaps_sent.load(Ordering::Relaxed),
            acknacks_received: self.acknacks_received.load(Ordering::Relaxed),
            data_received: self.data_received.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            acknacks_sent: self.acknacks_sent.load(Ordering::Relaxed),
            samples_lost: self.samples_lost.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            max_gap_size: self.max_gap_size.load(Ordering::Relaxed),
        }
    }
}
