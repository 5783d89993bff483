// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per matched reader bookkeeping on the writer side.
//!
//! ```text
//!            send pass             transport ok
//!  Unsent ------------> Underway -------------> Unacknowledged
//!    ^                     |                      |       |
//!    +---- transport fail -+            NACK      |       | ACKNACK base > seq
//!                          ^     (after suppression)      v
//!  Requested <-------------+---------------------+   Acknowledged
//!      |    send pass (after nack_response_delay)
//!      +------------------> Underway
//! ```
//!
//! Acknowledged entries are dropped; `low_mark` records that every sequence
//! number up to it is acknowledged (or irrelevant to this reader) and it
//! only moves forward. Best-effort proxies never reach `Unacknowledged`: a
//! change is forgotten as soon as it was handed to the transport.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::core::{Locator, SequenceNumber, GUID};
use crate::endpoint::RemoteEndpointDescriptor;
use crate::qos::Durability;

/// Delivery state of one change towards one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeForReaderStatus {
    /// Never handed to the transport.
    Unsent,
    /// Being sent by a send pass.
    Underway,
    /// NACKed by the reader, waiting for repair.
    Requested,
    /// Sent, waiting for the reader's acknowledgment.
    Unacknowledged,
    /// Acknowledged by the reader.
    Acknowledged,
}

#[derive(Debug, Clone, Copy)]
struct ChangeForReader {
    seq: SequenceNumber,
    status: ChangeForReaderStatus,
    /// Status to fall back to if the send in flight fails.
    resend_as: ChangeForReaderStatus,
    sent_at: Option<Instant>,
}

/// Outcome of a NACK for one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Marked `Requested`.
    Requested,
    /// Already queued for (re)send or sent too recently; ignored.
    Ignored,
    /// Not tracked for this reader; answer with GAP.
    Irrelevant,
}

/// Writer-side state of one matched reader.
#[derive(Debug)]
pub struct ReaderProxy {
    descriptor: RemoteEndpointDescriptor,
    reliable: bool,
    changes: VecDeque<ChangeForReader>,
    low_mark: SequenceNumber,
    highest_added: SequenceNumber,
    last_acknack_count: Option<u32>,
    repair_due: Option<Instant>,
}

impl ReaderProxy {
    /// Proxy for a reader matched while `low_mark` was already acknowledged.
    ///
    /// `reliable` is the effective reliability of the pair.
    pub fn new(descriptor: RemoteEndpointDescriptor, reliable: bool, low_mark: SequenceNumber) -> Self {
        Self {
            descriptor,
            reliable,
            changes: VecDeque::new(),
            low_mark,
            highest_added: low_mark,
            last_acknack_count: None,
            repair_due: None,
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

    pub fn durability(&self) -> Durability {
        self.descriptor.durability
    }

    /// Every sequence number up to this one is acknowledged.
    pub fn low_mark(&self) -> SequenceNumber {
        self.low_mark
    }

    fn position(&self, seq: SequenceNumber) -> Option<usize> {
        self.changes.binary_search_by_key(&seq, |c| c.seq).ok()
    }

    /// Track a new change. Ignored at or below the low mark.
    pub fn add_change(&mut self, seq: SequenceNumber, status: ChangeForReaderStatus) {
        if seq <= self.low_mark {
            return;
        }
        let entry = ChangeForReader {
            seq,
            status,
            resend_as: ChangeForReaderStatus::Unsent,
            sent_at: None,
        };
        self.highest_added = self.highest_added.max(seq);
        match self.changes.back() {
            Some(last) if last.seq >= seq => {
                if let Err(idx) = self.changes.binary_search_by_key(&seq, |c| c.seq) {
                    self.changes.insert(idx, entry);
                }
            }
            _ => self.changes.push_back(entry),
        }
    }

    /// Status of `seq` for this reader; `None` when never tracked.
    pub fn status(&self, seq: SequenceNumber) -> Option<ChangeForReaderStatus> {
        if seq == 0 {
            return None;
        }
        if seq <= self.low_mark {
            return Some(ChangeForReaderStatus::Acknowledged);
        }
        self.position(seq).map(|idx| self.changes[idx].status)
    }

    /// True when `seq` is acknowledged (or irrelevant) for this reader.
    pub fn is_acked(&self, seq: SequenceNumber) -> bool {
        seq <= self.low_mark
    }

    /// True when everything up to `last` is acknowledged.
    pub fn is_acked_up_to(&self, last: SequenceNumber) -> bool {
        self.low_mark >= last
    }

    /// Any change not yet acknowledged.
    pub fn has_unacked(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Changes waiting for a send pass (ignoring the repair delay).
    pub fn has_pending(&self) -> bool {
        self.changes.iter().any(|c| {
            matches!(
                c.status,
                ChangeForReaderStatus::Unsent | ChangeForReaderStatus::Requested
            )
        })
    }

    /// Move `Unsent` changes (and `Requested` ones once the repair is due) to
    /// `Underway`; returns them as `(seq, is_repair)`.
    pub fn take_sendable(&mut self, now: Instant) -> Vec<(SequenceNumber, bool)> {
        let repairs_due = self.repair_due.map_or(true, |due| due <= now);
        if repairs_due {
            self.repair_due = None;
        }
        let mut out = Vec::new();
        for change in self.changes.iter_mut() {
            let is_repair = match change.status {
                ChangeForReaderStatus::Unsent => false,
                ChangeForReaderStatus::Requested if repairs_due => true,
                _ => continue,
            };
            change.resend_as = change.status;
            change.status = ChangeForReaderStatus::Underway;
            out.push((change.seq, is_repair));
        }
        out
    }

    /// Result of the send attempt for an `Underway` change.
    pub fn complete_send(&mut self, seq: SequenceNumber, delivered: bool, now: Instant) {
        let Some(idx) = self.position(seq) else {
            return;
        };
        if self.changes[idx].status != ChangeForReaderStatus::Underway {
            return;
        }
        if !self.reliable {
            // Fire and forget: a failed best-effort send is not retried.
            self.forget_through(seq);
            return;
        }
        let change = &mut self.changes[idx];
        if delivered {
            change.status = ChangeForReaderStatus::Unacknowledged;
            change.sent_at = Some(now);
        } else {
            change.status = change.resend_as;
        }
    }

    /// Best-effort: drop `seq` and move the low mark over what went out.
    fn forget_through(&mut self, seq: SequenceNumber) {
        if let Some(idx) = self.position(seq) {
            self.changes.remove(idx);
        }
        let mark = self
            .changes
            .front()
            .map_or(self.highest_added, |c| c.seq - 1);
        self.low_mark = self.low_mark.max(mark);
    }

    /// Accept a new ACKNACK `count`; `false` for stale or repeated counts.
    pub fn accept_acknack_count(&mut self, count: u32) -> bool {
        match self.last_acknack_count {
            Some(last) if count <= last => false,
            _ => {
                self.last_acknack_count = Some(count);
                true
            }
        }
    }

    /// Everything below `base` is acknowledged. Returns how many tracked
    /// changes became acknowledged.
    pub fn acked_changes_set(&mut self, base: SequenceNumber) -> usize {
        if base == 0 || base - 1 <= self.low_mark {
            return 0;
        }
        let mut acked = 0;
        while let Some(front) = self.changes.front() {
            if front.seq >= base {
                break;
            }
            self.changes.pop_front();
            acked += 1;
        }
        self.low_mark = base - 1;
        acked
    }

    /// Handle a NACK for `seq`.
    ///
    /// NACKs for changes sent less than `suppression` ago are ignored.
    pub fn requested_change(
        &mut self,
        seq: SequenceNumber,
        now: Instant,
        suppression: Duration,
    ) -> NackOutcome {
        if seq <= self.low_mark {
            return NackOutcome::Irrelevant;
        }
        let Some(idx) = self.position(seq) else {
            return NackOutcome::Irrelevant;
        };
        let change = &mut self.changes[idx];
        match change.status {
            ChangeForReaderStatus::Unacknowledged => {
                let recently_sent = change
                    .sent_at
                    .is_some_and(|at| now.saturating_duration_since(at) < suppression);
                if recently_sent {
                    return NackOutcome::Ignored;
                }
                change.status = ChangeForReaderStatus::Requested;
                NackOutcome::Requested
            }
            ChangeForReaderStatus::Underway => {
                // Retry as a repair if the pass in flight fails.
                change.resend_as = ChangeForReaderStatus::Requested;
                NackOutcome::Ignored
            }
            _ => NackOutcome::Ignored,
        }
    }

    /// Delay repairs until `at`; the earliest request wins.
    pub fn schedule_repair(&mut self, at: Instant) {
        if self.repair_due.map_or(true, |due| at < due) {
            self.repair_due = Some(at);
        }
    }

    pub fn repair_due(&self) -> Option<Instant> {
        self.repair_due
    }

    /// Sequence numbers tracked but not yet acknowledged, ascending.
    pub fn unacked_changes(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.changes.iter().map(|c| c.seq)
    }
}
