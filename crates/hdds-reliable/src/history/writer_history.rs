// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side history.
//!
//! Changes are appended in sequence-number order, so the deque stays sorted
//! and `min_seq`/`max_seq` are O(1) while lookups are a binary search.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::core::rt::{ChangePool, PayloadPool};
use crate::core::{CacheChange, ChangeKind, InstanceHandle, SequenceNumber, Timestamp, GUID};
use crate::dds::{Error, Result};
use crate::qos::{History, QosProfile, ResourceLimits, LENGTH_UNLIMITED};
use crate::reliability::SeqNumGenerator;

/// Outcome of asking whether one more change of an instance fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Room available.
    Accept,
    /// `KeepLast`: room is made by evicting this change.
    Evict(SequenceNumber),
    /// `KeepAll` (or instance limit): no room until changes are removed.
    Full,
}

/// Ordered set of changes written by one local writer.
pub struct WriterHistory {
    writer_guid: GUID,
    history: History,
    limits: ResourceLimits,
    changes: VecDeque<CacheChange>,
    instances: HashMap<InstanceHandle, usize>,
    quota_bytes: usize,
    seq_gen: SeqNumGenerator,
    payload_pool: Arc<PayloadPool>,
    change_pool: Arc<ChangePool>,
}

impl WriterHistory {
    pub fn new(
        writer_guid: GUID,
        qos: &QosProfile,
        payload_pool: Arc<PayloadPool>,
        change_pool: Arc<ChangePool>,
    ) -> Self {
        let capacity = qos.resource_limits.max_samples.min(1024);
        Self {
            writer_guid,
            history: qos.history,
            limits: qos.resource_limits,
            changes: VecDeque::with_capacity(capacity),
            instances: HashMap::new(),
            quota_bytes: 0,
            seq_gen: SeqNumGenerator::new(),
            payload_pool,
            change_pool,
        }
    }

    /// Continue numbering after `last` (restart with persisted state).
    ///
    /// Only meaningful before the first change is added.
    pub fn resume_after(&mut self, last: SequenceNumber) {
        if !self.changes.is_empty() || self.seq_gen.last() > last {
            log::warn!(
                "[history] {} ignoring resume_after({}): last assigned is {}",
                self.writer_guid,
                last,
                self.seq_gen.last()
            );
            return;
        }
        self.seq_gen = SeqNumGenerator::starting_after(last);
    }

    /// Reserve a change record (and a payload holding `data`) from the pools.
    ///
    /// The change carries no sequence number until [`add_change`](Self::add_change).
    pub fn new_change(
        &self,
        kind: ChangeKind,
        instance: InstanceHandle,
        data: Option<&[u8]>,
    ) -> Result<CacheChange> {
        let mut change = self.change_pool.reserve_cache().ok_or(Error::OutOfResources)?;
        if let Some(bytes) = data {
            match self.payload_pool.get_payload_from(bytes) {
                Some(payload) => change.serialized_payload = Some(payload),
                None => {
                    self.change_pool.release_cache(change);
                    return Err(Error::OutOfResources);
                }
            }
        }
        change.kind = kind;
        change.writer_guid = self.writer_guid;
        change.instance_handle = instance;
        change.source_timestamp = Some(Timestamp::now());
        Ok(change)
    }

    /// Whether a change of `instance` carrying `payload_len` bytes fits.
    pub fn admission(&self, instance: InstanceHandle, payload_len: usize) -> Admission {
        let per_instance = self.instances.get(&instance).copied().unwrap_or(0);
        let new_instance = per_instance == 0;
        if new_instance
            && self.limits.max_instances != LENGTH_UNLIMITED
            && self.instances.len() >= self.limits.max_instances
        {
            return Admission::Full;
        }

        let over_quota = self.quota_bytes + payload_len > self.limits.max_quota_bytes;
        match self.history {
            History::KeepLast(depth) => {
                let depth = (depth as usize).min(self.limits.max_samples_per_instance);
                if per_instance >= depth {
                    self.oldest_for_instance(instance)
                        .map_or(Admission::Full, Admission::Evict)
                } else if self.changes.len() >= self.limits.max_samples || over_quota {
                    self.min_seq().map_or(Admission::Full, Admission::Evict)
                } else {
                    Admission::Accept
                }
            }
            History::KeepAll => {
                if self.changes.len() >= self.limits.max_samples
                    || per_instance >= self.limits.max_samples_per_instance
                    || over_quota
                {
                    Admission::Full
                } else {
                    Admission::Accept
                }
            }
        }
    }

    /// True when a new change of `instance` needs an eviction or has to wait.
    pub fn is_full_for(&self, instance: InstanceHandle) -> bool {
        self.admission(instance, 0) != Admission::Accept
    }

    /// Assign the next sequence number and append the change.
    ///
    /// Fails with `ResourceLimitExceeded` (and recycles the change) when the
    /// history has no room; callers make room first.
    pub fn add_change(&mut self, mut change: CacheChange) -> Result<SequenceNumber> {
        let payload_len = change.payload_len();
        if self.admission(change.instance_handle, payload_len) != Admission::Accept {
            let instance = change.instance_handle;
            self.change_pool.release_cache(change);
            return Err(Error::ResourceLimitExceeded(format!(
                "writer history full for {:?} ({} changes)",
                instance,
                self.changes.len()
            )));
        }

        let seq = self.seq_gen.next();
        change.sequence_number = seq;
        change.writer_guid = self.writer_guid;
        *self.instances.entry(change.instance_handle).or_insert(0) += 1;
        self.quota_bytes += payload_len;
        self.changes.push_back(change);
        log::trace!("[history] {} added seq={}", self.writer_guid, seq);
        Ok(seq)
    }

    /// Remove `seq`, recycling its record and payload. False if absent.
    pub fn remove_change(&mut self, seq: SequenceNumber) -> bool {
        let Ok(idx) = self
            .changes
            .binary_search_by_key(&seq, |c| c.sequence_number)
        else {
            return false;
        };
        match self.changes.remove(idx) {
            Some(change) => {
                self.forget(&change);
                self.change_pool.release_cache(change);
                true
            }
            None => false,
        }
    }

    /// Remove the oldest change. False when empty.
    pub fn remove_min_change(&mut self) -> bool {
        match self.changes.pop_front() {
            Some(change) => {
                self.forget(&change);
                self.change_pool.release_cache(change);
                true
            }
            None => false,
        }
    }

    fn forget(&mut self, change: &CacheChange) {
        self.quota_bytes = self.quota_bytes.saturating_sub(change.payload_len());
        if let Some(count) = self.instances.get_mut(&change.instance_handle) {
            *count -= 1;
            if *count == 0 {
                self.instances.remove(&change.instance_handle);
            }
        }
    }

    /// Lowest sequence number still held.
    pub fn min_seq(&self) -> Option<SequenceNumber> {
        self.changes.front().map(|c| c.sequence_number)
    }

    /// Highest sequence number still held.
    pub fn max_seq(&self) -> Option<SequenceNumber> {
        self.changes.back().map(|c| c.sequence_number)
    }

    /// Last sequence number ever assigned (0 before the first write).
    pub fn last_sequence(&self) -> SequenceNumber {
        self.seq_gen.last()
    }

    /// HEARTBEAT range: `(first, last)` with `first = last + 1` when empty.
    pub fn heartbeat_range(&self) -> (SequenceNumber, SequenceNumber) {
        let last = self.last_sequence();
        (self.min_seq().unwrap_or(last + 1), last)
    }

    pub fn get_change(&self, seq: SequenceNumber) -> Option<&CacheChange> {
        self.changes
            .binary_search_by_key(&seq, |c| c.sequence_number)
            .ok()
            .and_then(|idx| self.changes.get(idx))
    }

    /// Oldest change of `instance`.
    pub fn oldest_for_instance(&self, instance: InstanceHandle) -> Option<SequenceNumber> {
        self.changes
            .iter()
            .find(|c| c.instance_handle == instance)
            .map(|c| c.sequence_number)
    }

    /// Sequence numbers held, ascending.
    pub fn sequence_numbers(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.changes.iter().map(|c| c.sequence_number)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn writer_guid(&self) -> GUID {
        self.writer_guid
    }

    pub fn payload_pool(&self) -> &Arc<PayloadPool> {
        &self.payload_pool
    }
}

impl Drop for WriterHistory {
    fn drop(&mut self) {
        while self.remove_min_change() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rt::{MemoryPolicy, PoolConfig};

    fn history(qos: &QosProfile) -> WriterHistory {
        let payloads = PayloadPool::new(PoolConfig::new(MemoryPolicy::DynamicReusable, 64));
        WriterHistory::new(
            GUID::new([1; 12], [0, 0, 1, 3]),
            qos,
            payloads,
            Arc::new(ChangePool::default()),
        )
    }

    fn write(h: &mut WriterHistory, instance: InstanceHandle, data: &[u8]) -> SequenceNumber {
        let change = h
            .new_change(ChangeKind::Alive, instance, Some(data))
            .expect("pool");
        h.add_change(change).expect("room")
    }

    #[test]
    fn test_sequence_numbers_start_at_one() {
        let mut h = history(&QosProfile::reliable().keep_last(10));
        assert_eq!(h.heartbeat_range(), (1, 0));
        assert_eq!(write(&mut h, InstanceHandle::NIL, b"a"), 1);
        assert_eq!(write(&mut h, InstanceHandle::NIL, b"b"), 2);
        assert_eq!(h.heartbeat_range(), (1, 2));
        assert_eq!(h.get_change(2).map(CacheChange::payload_to_vec), Some(b"b".to_vec()));
    }

    #[test]
    fn test_keep_last_admission_names_oldest_of_instance() {
        let mut h = history(&QosProfile::reliable().keep_last(2));
        let a = InstanceHandle::from_u64(1);
        let b = InstanceHandle::from_u64(2);
        write(&mut h, a, b"a1");
        write(&mut h, b, b"b1");
        write(&mut h, a, b"a2");

        assert_eq!(h.admission(a, 2), Admission::Evict(1));
        assert_eq!(h.admission(b, 2), Admission::Accept);
        let extra = h.new_change(ChangeKind::Alive, a, None).expect("pool");
        assert!(h.add_change(extra).is_err());

        assert!(h.remove_change(1));
        assert_eq!(write(&mut h, a, b"a3"), 4, "rejected add must not consume a number");
        assert_eq!(h.min_seq(), Some(2));
    }

    #[test]
    fn test_keep_all_reports_full() {
        let mut h = history(&QosProfile::reliable().keep_all(3));
        for _ in 0..3 {
            write(&mut h, InstanceHandle::NIL, b"x");
        }
        assert_eq!(h.admission(InstanceHandle::NIL, 1), Admission::Full);
        assert!(h.is_full_for(InstanceHandle::NIL));
        assert!(h.remove_min_change());
        assert!(!h.is_full_for(InstanceHandle::NIL));
    }

    #[test]
    fn test_remove_recycles_payload() {
        let mut h = history(&QosProfile::reliable());
        write(&mut h, InstanceHandle::NIL, b"payload");
        assert_eq!(h.payload_pool().outstanding(), 1);
        assert!(h.remove_change(1));
        assert!(!h.remove_change(1));
        assert_eq!(h.payload_pool().outstanding(), 0);
        assert_eq!(h.heartbeat_range(), (2, 1));
    }

    #[test]
    fn test_resume_after_persisted_sequence() {
        let mut h = history(&QosProfile::reliable());
        h.resume_after(41);
        assert_eq!(write(&mut h, InstanceHandle::NIL, b"x"), 42);
    }
}
