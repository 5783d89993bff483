// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per matched writer bookkeeping on the reader side.
//!
//! The proxy tracks a watermark: every sequence number at or below it was
//! delivered to the reader history or is known to be irrelevant (GAP, lost
//! behind a HEARTBEAT `first_sn`). Above the watermark it keeps
//! - changes received out of order, waiting for the hole below them,
//! - irrelevant ranges announced by GAPs,
//! - fragmented samples being reassembled.
//!
//! ```text
//!   watermark
//!       v
//!  ... [5] | 6 missing | 7 buffered | 8..10 irrelevant | 11 missing ... max_announced
//! ```
//!
//! Draining moves the watermark over buffered and irrelevant sequence numbers
//! and stops at the first one that is missing, so delivery is strictly in
//! sequence order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MAX_BITMAP_BITS;
use crate::core::rt::ChangePool;
use crate::core::{CacheChange, EntityId, Locator, SequenceNumber, GUID};
use crate::dds::Error;
use crate::endpoint::RemoteEndpointDescriptor;
use crate::history::ReaderHistory;
use crate::protocol::{AckNack, Heartbeat, SequenceNumberSet};

/// Result of offering a received change to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Already delivered, buffered or declared irrelevant.
    Duplicate,
    /// Kept for in-order delivery. `out_of_order` when a hole precedes it.
    Accepted { out_of_order: bool },
    /// Best-effort only: accepted, skipping `lost` sequence numbers.
    AcceptedWithLoss { lost: u64 },
}

/// Result of a fragment arriving.
#[derive(Debug)]
pub enum FragmentOutcome {
    /// Sample already known, fragment dropped.
    Duplicate,
    /// Fragment stored, sample incomplete.
    Partial,
    /// Fragment inconsistent with the sample layout.
    Invalid,
    /// Last fragment arrived; the change carries the complete [`FragmentState`](crate::core::FragmentState).
    Complete(CacheChange),
}

/// Result of a HEARTBEAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Changes that became unobtainable (behind `first_sn`).
    pub lost: u64,
    /// This was the first HEARTBEAT from the writer.
    pub first: bool,
}

/// Result of draining the proxy into the reader history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Set the first time the history refuses the next change.
    pub rejected: Option<SequenceNumber>,
}

/// Remote writer state held by a [`StatefulReader`](super::StatefulReader).
pub struct WriterProxy {
    descriptor: RemoteEndpointDescriptor,
    reliable: bool,
    change_pool: Arc<ChangePool>,
    watermark: SequenceNumber,
    max_announced: SequenceNumber,
    received_ahead: BTreeMap<SequenceNumber, CacheChange>,
    /// `start -> end` (exclusive), non-overlapping.
    irrelevant: BTreeMap<SequenceNumber, SequenceNumber>,
    fragments: BTreeMap<SequenceNumber, CacheChange>,
    last_heartbeat_count: Option<u32>,
    acknack_count: u32,
    acknack_due: Option<Instant>,
    last_acknack_at: Option<Instant>,
    last_acked_base: SequenceNumber,
    rejected_at: Option<SequenceNumber>,
    last_seen: Instant,
    alive: bool,
}

impl WriterProxy {
    /// Proxy for a writer whose changes up to `watermark` were already handled.
    pub fn new(
        descriptor: RemoteEndpointDescriptor,
        reliable: bool,
        change_pool: Arc<ChangePool>,
        watermark: SequenceNumber,
    ) -> Self {
        Self {
            descriptor,
            reliable,
            change_pool,
            watermark,
            max_announced: watermark,
            received_ahead: BTreeMap::new(),
            irrelevant: BTreeMap::new(),
            fragments: BTreeMap::new(),
            last_heartbeat_count: None,
            acknack_count: 0,
            acknack_due: None,
            last_acknack_at: None,
            last_acked_base: 0,
            rejected_at: None,
            last_seen: Instant::now(),
            alive: true,
        }
    }

    pub fn guid(&self) -> GUID {
        self.descriptor.guid
    }

    pub fn descriptor(&self) -> &RemoteEndpointDescriptor {
        &self.descriptor
    }

    pub fn destinations(&self) -> &[Locator] {
        self.descriptor.destinations()
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Highest sequence number delivered or skipped contiguously.
    pub fn watermark(&self) -> SequenceNumber {
        self.watermark
    }

    /// Highest sequence number the writer announced or sent.
    pub fn max_announced(&self) -> SequenceNumber {
        self.max_announced
    }

    /// Number of changes waiting for a hole below them.
    pub fn buffered(&self) -> usize {
        self.received_ahead.len()
    }

    fn irrelevant_range_at(&self, seq: SequenceNumber) -> Option<SequenceNumber> {
        self.irrelevant
            .range(..=seq)
            .next_back()
            .and_then(|(_, &end)| (end > seq).then_some(end))
    }

    /// Whether `seq` needs no further action from the writer.
    pub fn is_known(&self, seq: SequenceNumber) -> bool {
        seq <= self.watermark
            || self.received_ahead.contains_key(&seq)
            || self.irrelevant_range_at(seq).is_some()
    }

    // ========================================================================
    // Incoming changes
    // ========================================================================

    /// Offer a complete change (DATA or reassembled DATA_FRAG).
    ///
    /// Duplicates are handed back to the change pool.
    pub fn received_change_set(&mut self, change: CacheChange) -> ReceiveOutcome {
        let seq = change.sequence_number;
        if self.is_known(seq) {
            self.change_pool.release_cache(change);
            return ReceiveOutcome::Duplicate;
        }
        self.max_announced = self.max_announced.max(seq);
        if let Some(partial) = self.fragments.remove(&seq) {
            self.change_pool.release_cache(partial);
        }

        if !self.reliable {
            // Anything newer is delivered; the hole is given up.
            let lost = seq - self.watermark - 1;
            let keep = self.received_ahead.split_off(&seq);
            for (_, stale) in std::mem::replace(&mut self.received_ahead, keep) {
                self.change_pool.release_cache(stale);
            }
            self.watermark = seq - 1;
            self.prune();
            self.received_ahead.insert(seq, change);
            return if lost > 0 {
                ReceiveOutcome::AcceptedWithLoss { lost }
            } else {
                ReceiveOutcome::Accepted {
                    out_of_order: false,
                }
            };
        }

        let out_of_order = seq != self.watermark + 1;
        self.received_ahead.insert(seq, change);
        ReceiveOutcome::Accepted { out_of_order }
    }

    /// Store one DATA_FRAG. `start` builds the record of a sample seen for the
    /// first time (it must carry `fragment_state`); returning `None` drops the
    /// fragment.
    pub fn received_fragment<F>(
        &mut self,
        seq: SequenceNumber,
        first: u32,
        count: u16,
        data: &[u8],
        start: F,
    ) -> FragmentOutcome
    where
        F: FnOnce() -> Option<CacheChange>,
    {
        if self.is_known(seq) {
            return FragmentOutcome::Duplicate;
        }
        if !self.fragments.contains_key(&seq) {
            match start() {
                Some(change) if change.fragment_state.is_some() => {
                    self.fragments.insert(seq, change);
                }
                Some(change) => {
                    self.change_pool.release_cache(change);
                    return FragmentOutcome::Invalid;
                }
                None => return FragmentOutcome::Invalid,
            }
        }
        self.max_announced = self.max_announced.max(seq);

        let Some(change) = self.fragments.get_mut(&seq) else {
            return FragmentOutcome::Invalid;
        };
        let Some(state) = change.fragment_state.as_mut() else {
            return FragmentOutcome::Invalid;
        };
        if !state.insert(first, count, data) {
            return FragmentOutcome::Invalid;
        }
        if !state.is_complete() {
            return FragmentOutcome::Partial;
        }
        match self.fragments.remove(&seq) {
            Some(change) => FragmentOutcome::Complete(change),
            None => FragmentOutcome::Invalid,
        }
    }

    /// Mark `[start, end)` irrelevant (GAP). Buffered changes in the range are
    /// still delivered.
    pub fn irrelevant_change_set(&mut self, start: SequenceNumber, end: SequenceNumber) {
        let start = start.max(self.watermark + 1);
        if start >= end {
            return;
        }
        self.max_announced = self.max_announced.max(end - 1);

        let mut new_start = start;
        let mut new_end = end;
        if let Some((&s, &e)) = self.irrelevant.range(..=start).next_back() {
            if e >= start {
                new_start = s;
                new_end = new_end.max(e);
            }
        }
        let overlapping: Vec<SequenceNumber> = self
            .irrelevant
            .range(new_start..=new_end)
            .map(|(&s, _)| s)
            .collect();
        for s in overlapping {
            if let Some(e) = self.irrelevant.remove(&s) {
                new_end = new_end.max(e);
            }
        }
        self.irrelevant.insert(new_start, new_end);

        let dropped: Vec<SequenceNumber> = self
            .fragments
            .range(start..end)
            .map(|(&s, _)| s)
            .collect();
        for seq in dropped {
            if let Some(partial) = self.fragments.remove(&seq) {
                self.change_pool.release_cache(partial);
            }
        }
    }

    // ========================================================================
    // HEARTBEAT / ACKNACK
    // ========================================================================

    /// Apply a HEARTBEAT. `None` when its count is stale.
    ///
    /// Sequence numbers below `first_sn` that never arrived are lost; on the
    /// first HEARTBEAT they are skipped without being reported.
    pub fn process_heartbeat(&mut self, hb: &Heartbeat) -> Option<HeartbeatOutcome> {
        if self
            .last_heartbeat_count
            .is_some_and(|last| hb.count <= last)
        {
            return None;
        }
        let first = self.last_heartbeat_count.is_none();
        self.last_heartbeat_count = Some(hb.count);
        self.max_announced = self.max_announced.max(hb.last_sn);

        let mut lost = 0;
        if hb.first_sn > self.watermark + 1 {
            lost = self.unknown_between(self.watermark + 1, hb.first_sn);
            self.irrelevant_change_set(self.watermark + 1, hb.first_sn);
        }
        Some(HeartbeatOutcome {
            lost: if first { 0 } else { lost },
            first,
        })
    }

    /// Count of sequence numbers in `[start, end)` neither received nor irrelevant.
    fn unknown_between(&self, start: SequenceNumber, end: SequenceNumber) -> u64 {
        if start >= end {
            return 0;
        }
        let received = self.received_ahead.range(start..end).count() as u64;
        let irrelevant: u64 = self
            .irrelevant
            .iter()
            .map(|(&s, &e)| e.min(end).saturating_sub(s.max(start)))
            .sum();
        (end - start).saturating_sub(received + irrelevant)
    }

    /// Missing sequence numbers that fit one ACKNACK bitmap, ascending.
    pub fn missing_changes(&self) -> Vec<SequenceNumber> {
        let base = self.watermark + 1;
        let limit = self
            .max_announced
            .min(base + SequenceNumber::from(MAX_BITMAP_BITS) - 1);
        (base..=limit).filter(|seq| !self.is_known(*seq)).collect()
    }

    pub fn has_missing_changes(&self) -> bool {
        !self.missing_changes().is_empty()
    }

    /// True when the last ACKNACK sent already covers the watermark and
    /// nothing is missing.
    pub fn is_acked_state(&self) -> bool {
        self.last_acked_base == self.watermark + 1 && !self.has_missing_changes()
    }

    /// Next ACKNACK for this writer (positive part = watermark + 1).
    pub fn build_acknack(&mut self, reader_id: EntityId, now: Instant) -> AckNack {
        let base = self.watermark + 1;
        let missing = self.missing_changes();
        let set = SequenceNumberSet::from_sequences(base, &missing)
            .unwrap_or_else(|| SequenceNumberSet::empty(base));
        self.acknack_count = self.acknack_count.wrapping_add(1).max(1);
        self.last_acked_base = base;
        self.last_acknack_at = Some(now);
        self.acknack_due = None;
        AckNack::new(reader_id, self.descriptor.guid.entity_id, set, self.acknack_count)
    }

    /// Request an ACKNACK at `at`; the earliest request wins.
    pub fn schedule_acknack(&mut self, at: Instant) {
        if self.acknack_due.map_or(true, |due| at < due) {
            self.acknack_due = Some(at);
        }
    }

    pub fn acknack_due(&self) -> Option<Instant> {
        self.acknack_due
    }

    /// Changes are missing and no ACKNACK went out for `retry`.
    pub fn retry_due(&self, now: Instant, retry: Duration) -> bool {
        self.has_missing_changes()
            && self
                .last_acknack_at
                .map_or(true, |at| now.saturating_duration_since(at) >= retry)
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Move every change that is next in sequence into `history`.
    pub fn deliver_ready(&mut self, history: &mut ReaderHistory) -> Delivery {
        let mut delivery = Delivery::default();
        loop {
            let next = self.watermark + 1;
            if let Some(change) = self.received_ahead.get(&next) {
                if !history.can_accept(change) && !history.contains(change.writer_guid, next) {
                    if self.rejected_at != Some(next) {
                        self.rejected_at = Some(next);
                        delivery.rejected = Some(next);
                    }
                    break;
                }
                if let Some(change) = self.received_ahead.remove(&next) {
                    match history.add_change(change) {
                        Ok(()) => delivery.delivered += 1,
                        Err(Error::DuplicateChange) => {}
                        Err(e) => {
                            log::debug!(
                                "[reader] {} seq={} not stored: {}",
                                self.descriptor.guid,
                                next,
                                e
                            );
                        }
                    }
                }
                self.rejected_at = None;
                self.watermark = next;
                continue;
            }

            match self.irrelevant_range_at(next) {
                Some(end) => {
                    let next_buffered = self
                        .received_ahead
                        .range(next..end)
                        .next()
                        .map(|(&s, _)| s);
                    self.watermark = next_buffered.unwrap_or(end) - 1;
                }
                None => break,
            }
        }
        self.prune();
        delivery
    }

    /// Forget state at or below the watermark.
    fn prune(&mut self) {
        let wm = self.watermark;
        self.irrelevant = std::mem::take(&mut self.irrelevant)
            .into_iter()
            .filter_map(|(s, e)| (e > wm + 1).then_some((s.max(wm + 1), e)))
            .collect();
        let keep = self.fragments.split_off(&(wm + 1));
        for (_, stale) in std::mem::replace(&mut self.fragments, keep) {
            self.change_pool.release_cache(stale);
        }
    }

    // ========================================================================
    // Liveliness
    // ========================================================================

    /// Record traffic from the writer. True if it was considered not alive.
    pub fn assert_liveliness(&mut self, now: Instant) -> bool {
        self.last_seen = now;
        let revived = !self.alive;
        self.alive = true;
        revived
    }

    /// True if the lease just expired.
    pub fn check_lease(&mut self, now: Instant) -> bool {
        if self.alive
            && now.saturating_duration_since(self.last_seen) > self.descriptor.liveliness_lease
        {
            self.alive = false;
            return true;
        }
        false
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

impl Drop for WriterProxy {
    fn drop(&mut self) {
        for (_, change) in std::mem::take(&mut self.received_ahead) {
            self.change_pool.release_cache(change);
        }
        for (_, change) in std::mem::take(&mut self.fragments) {
            self.change_pool.release_cache(change);
        }
    }
}

impl std::fmt::Debug for WriterProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterProxy")
            .field("guid", &self.descriptor.guid)
            .field("reliable", &self.reliable)
            .field("watermark", &self.watermark)
            .field("max_announced", &self.max_announced)
            .field("buffered", &self.received_ahead.len())
            .field("irrelevant", &self.irrelevant)
            .field("alive", &self.alive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FragmentState;
    use crate::qos::QosProfile;

    fn proxy(reliable: bool) -> WriterProxy {
        let qos = if reliable {
            QosProfile::reliable()
        } else {
            QosProfile::best_effort()
        };
        let guid = GUID::new([1; 12], [0, 0, 1, 0x03]);
        let descriptor =
            RemoteEndpointDescriptor::new(guid, Locator::udpv4([127, 0, 0, 1], 7400), &qos);
        WriterProxy::new(descriptor, reliable, Arc::new(ChangePool::default()), 0)
    }

    fn change(seq: SequenceNumber) -> CacheChange {
        CacheChange {
            writer_guid: GUID::new([1; 12], [0, 0, 1, 0x03]),
            sequence_number: seq,
            ..CacheChange::default()
        }
    }

    fn history() -> ReaderHistory {
        ReaderHistory::new(
            &QosProfile::reliable().keep_all(100),
            Arc::new(ChangePool::default()),
        )
    }

    fn heartbeat(first: SequenceNumber, last: SequenceNumber, count: u32) -> Heartbeat {
        Heartbeat {
            reader_id: [0; 4],
            writer_id: [0, 0, 1, 0x03],
            first_sn: first,
            last_sn: last,
            count,
            final_flag: false,
            liveliness: false,
        }
    }

    #[test]
    fn out_of_order_changes_wait_for_the_hole() {
        let mut p = proxy(true);
        let mut h = history();
        assert_eq!(
            p.received_change_set(change(3)),
            ReceiveOutcome::Accepted { out_of_order: true }
        );
        assert_eq!(p.deliver_ready(&mut h).delivered, 0);
        assert_eq!(p.missing_changes(), vec![1, 2]);

        p.received_change_set(change(1));
        assert_eq!(p.deliver_ready(&mut h).delivered, 1);
        p.received_change_set(change(2));
        assert_eq!(p.deliver_ready(&mut h).delivered, 2);
        assert_eq!(p.watermark(), 3);
        let order: Vec<_> = h
            .take(10)
            .into_iter()
            .map(|(c, _)| c.sequence_number)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn duplicates_are_detected() {
        let mut p = proxy(true);
        let mut h = history();
        p.received_change_set(change(1));
        assert_eq!(p.received_change_set(change(1)), ReceiveOutcome::Duplicate);
        p.deliver_ready(&mut h);
        assert_eq!(p.received_change_set(change(1)), ReceiveOutcome::Duplicate);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn gap_skips_irrelevant_range() {
        let mut p = proxy(true);
        let mut h = history();
        for seq in 1..=4 {
            p.received_change_set(change(seq));
        }
        p.deliver_ready(&mut h);
        p.received_change_set(change(8));
        p.irrelevant_change_set(5, 8);
        assert!(p.missing_changes().is_empty());
        assert_eq!(p.deliver_ready(&mut h).delivered, 1);
        assert_eq!(p.watermark(), 8);
    }

    #[test]
    fn irrelevant_ranges_merge() {
        let mut p = proxy(true);
        p.irrelevant_change_set(3, 5);
        p.irrelevant_change_set(7, 9);
        p.irrelevant_change_set(4, 8);
        assert_eq!(p.irrelevant.len(), 1);
        assert_eq!(p.irrelevant.get(&3), Some(&9));
        p.max_announced = 10;
        assert_eq!(p.missing_changes(), vec![1, 2, 9, 10]);
    }

    #[test]
    fn heartbeat_first_sn_reports_loss_after_first() {
        let mut p = proxy(true);
        let first = p.process_heartbeat(&heartbeat(3, 5, 1)).unwrap();
        assert_eq!(first, HeartbeatOutcome { lost: 0, first: true });
        assert_eq!(p.missing_changes(), vec![3, 4, 5]);

        assert!(p.process_heartbeat(&heartbeat(3, 5, 1)).is_none());
        p.received_change_set(change(4));
        let later = p.process_heartbeat(&heartbeat(6, 8, 2)).unwrap();
        assert_eq!(later.lost, 2);
        let mut h = history();
        p.deliver_ready(&mut h);
        assert_eq!(h.len(), 1);
        assert_eq!(p.watermark(), 5);
        assert_eq!(p.missing_changes(), vec![6, 7, 8]);
    }

    #[test]
    fn best_effort_delivers_newer_and_counts_loss() {
        let mut p = proxy(false);
        let mut h = history();
        p.received_change_set(change(1));
        assert_eq!(p.deliver_ready(&mut h).delivered, 1);
        assert_eq!(
            p.received_change_set(change(4)),
            ReceiveOutcome::AcceptedWithLoss { lost: 2 }
        );
        assert_eq!(p.deliver_ready(&mut h).delivered, 1);
        assert_eq!(h.len(), 2);
        assert_eq!(p.received_change_set(change(2)), ReceiveOutcome::Duplicate);
    }

    #[test]
    fn acknack_reflects_watermark_and_holes() {
        let mut p = proxy(true);
        let mut h = history();
        p.received_change_set(change(1));
        p.received_change_set(change(3));
        p.deliver_ready(&mut h);
        let now = Instant::now();
        let an = p.build_acknack([0, 0, 1, 0x04], now);
        assert_eq!(an.ack_base(), 2);
        assert_eq!(an.requested().collect::<Vec<_>>(), vec![2]);
        assert_eq!(an.count, 1);
        assert!(!p.is_acked_state());
        assert!(!p.retry_due(now, Duration::from_millis(50)));
        assert!(p.retry_due(now + Duration::from_millis(50), Duration::from_millis(50)));
    }

    #[test]
    fn fragments_reassemble() {
        let mut p = proxy(true);
        let start = || {
            Some(CacheChange {
                sequence_number: 1,
                fragment_state: Some(FragmentState::new(10, 4)),
                ..CacheChange::default()
            })
        };
        assert!(matches!(
            p.received_fragment(1, 3, 1, b"ij", start),
            FragmentOutcome::Partial
        ));
        assert!(matches!(
            p.received_fragment(1, 1, 1, b"abcd", start),
            FragmentOutcome::Partial
        ));
        match p.received_fragment(1, 2, 1, b"efgh", start) {
            FragmentOutcome::Complete(change) => {
                let state = change.fragment_state.expect("state");
                assert_eq!(state.data(), b"abcdefghij");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn liveliness_lease_expires() {
        let mut p = proxy(true);
        let now = Instant::now();
        assert!(!p.check_lease(now));
        assert!(p.check_lease(now + Duration::from_secs(31)));
        assert!(!p.is_alive());
        assert!(p.assert_liveliness(now + Duration::from_secs(32)));
    }
}
