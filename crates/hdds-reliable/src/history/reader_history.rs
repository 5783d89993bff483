// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side history.
//!
//! Changes arrive from writer proxies already resequenced per writer, so
//! insertion order is sequence order for each writer. Samples stay until the
//! application takes them or `KeepLast` evicts them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::core::rt::ChangePool;
use crate::core::{CacheChange, InstanceHandle, SequenceNumber, GUID};
use crate::dds::{Error, Result};
use crate::qos::{History, QosProfile, ResourceLimits, LENGTH_UNLIMITED};

/// Whether the application already saw a sample through `read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    NotRead,
    Read,
}

#[derive(Debug)]
struct StoredChange {
    change: CacheChange,
    state: SampleState,
}

/// Samples received by one local reader.
pub struct ReaderHistory {
    history: History,
    limits: ResourceLimits,
    changes: VecDeque<StoredChange>,
    keys: HashSet<(GUID, SequenceNumber)>,
    instances: HashMap<InstanceHandle, usize>,
    unread: usize,
    change_pool: Arc<ChangePool>,
}

impl ReaderHistory {
    pub fn new(qos: &QosProfile, change_pool: Arc<ChangePool>) -> Self {
        Self {
            history: qos.history,
            limits: qos.resource_limits,
            changes: VecDeque::new(),
            keys: HashSet::new(),
            instances: HashMap::new(),
            unread: 0,
            change_pool,
        }
    }

    /// Whether `(writer, seq)` is currently held.
    pub fn contains(&self, writer: GUID, seq: SequenceNumber) -> bool {
        self.keys.contains(&(writer, seq))
    }

    /// Whether [`add_change`](Self::add_change) would accept `change`.
    pub fn can_accept(&self, change: &CacheChange) -> bool {
        if self.contains(change.writer_guid, change.sequence_number) {
            return false;
        }
        let per_instance = self.instances.get(&change.instance_handle).copied().unwrap_or(0);
        if per_instance == 0
            && self.limits.max_instances != LENGTH_UNLIMITED
            && self.instances.len() >= self.limits.max_instances
        {
            return false;
        }
        match self.history {
            History::KeepLast(_) => true,
            History::KeepAll => {
                self.changes.len() < self.limits.max_samples
                    && per_instance < self.limits.max_samples_per_instance
            }
        }
    }

    /// Insert a received change.
    ///
    /// `KeepLast` evicts the oldest sample of the instance (or the oldest
    /// overall at `max_samples`). Duplicates fail with `DuplicateChange`,
    /// `KeepAll` overflow with `ResourceLimitExceeded`; the rejected change is
    /// recycled.
    pub fn add_change(&mut self, change: CacheChange) -> Result<()> {
        let key = (change.writer_guid, change.sequence_number);
        if self.keys.contains(&key) {
            self.change_pool.release_cache(change);
            return Err(Error::DuplicateChange);
        }
        if !self.can_accept(&change) {
            let msg = format!(
                "reader history full ({} samples, instance {:?})",
                self.changes.len(),
                change.instance_handle
            );
            self.change_pool.release_cache(change);
            return Err(Error::ResourceLimitExceeded(msg));
        }

        if let History::KeepLast(depth) = self.history {
            let depth = (depth as usize).min(self.limits.max_samples_per_instance);
            let per_instance = self.instances.get(&change.instance_handle).copied().unwrap_or(0);
            if per_instance >= depth {
                let instance = change.instance_handle;
                if let Some(idx) = self
                    .changes
                    .iter()
                    .position(|s| s.change.instance_handle == instance)
                {
                    self.evict_at(idx);
                }
            } else if self.changes.len() >= self.limits.max_samples {
                self.evict_at(0);
            }
        }

        self.keys.insert(key);
        *self.instances.entry(change.instance_handle).or_insert(0) += 1;
        self.unread += 1;
        self.changes.push_back(StoredChange {
            change,
            state: SampleState::NotRead,
        });
        Ok(())
    }

    fn evict_at(&mut self, idx: usize) {
        if let Some(stored) = self.detach(idx) {
            log::debug!(
                "[history] evicting {}:{} to honor KEEP_LAST",
                stored.change.writer_guid,
                stored.change.sequence_number
            );
            self.change_pool.release_cache(stored.change);
        }
    }

    fn detach(&mut self, idx: usize) -> Option<StoredChange> {
        let stored = self.changes.remove(idx)?;
        self.keys
            .remove(&(stored.change.writer_guid, stored.change.sequence_number));
        if let Some(count) = self.instances.get_mut(&stored.change.instance_handle) {
            *count -= 1;
            if *count == 0 {
                self.instances.remove(&stored.change.instance_handle);
            }
        }
        if stored.state == SampleState::NotRead {
            self.unread -= 1;
        }
        Some(stored)
    }

    /// Copy of the oldest not-yet-read sample, which becomes `Read`.
    pub fn read_next(&mut self) -> Option<CacheChange> {
        let stored = self
            .changes
            .iter_mut()
            .find(|s| s.state == SampleState::NotRead)?;
        stored.state = SampleState::Read;
        self.unread -= 1;
        Some(stored.change.clone())
    }

    /// Remove and return the oldest not-yet-read sample.
    pub fn take_next(&mut self) -> Option<CacheChange> {
        let idx = self
            .changes
            .iter()
            .position(|s| s.state == SampleState::NotRead)?;
        self.detach(idx).map(|s| s.change)
    }

    /// Copies of up to `max` oldest samples with their state before this call;
    /// all of them become `Read`.
    pub fn read(&mut self, max: usize) -> Vec<(CacheChange, SampleState)> {
        let mut out = Vec::new();
        for stored in self.changes.iter_mut().take(max) {
            out.push((stored.change.clone(), stored.state));
            if stored.state == SampleState::NotRead {
                stored.state = SampleState::Read;
                self.unread -= 1;
            }
        }
        out
    }

    /// Remove and return up to `max` oldest samples with their state.
    pub fn take(&mut self, max: usize) -> Vec<(CacheChange, SampleState)> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.detach(0) {
                Some(stored) => out.push((stored.change, stored.state)),
                None => break,
            }
        }
        out
    }

    /// Remove one sample, recycling it. False if absent.
    pub fn remove_change(&mut self, writer: GUID, seq: SequenceNumber) -> bool {
        if !self.contains(writer, seq) {
            return false;
        }
        let Some(idx) = self
            .changes
            .iter()
            .position(|s| s.change.writer_guid == writer && s.change.sequence_number == seq)
        else {
            return false;
        };
        match self.detach(idx) {
            Some(stored) => {
                self.change_pool.release_cache(stored.change);
                true
            }
            None => false,
        }
    }

    /// Oldest sample held.
    pub fn min_change(&self) -> Option<&CacheChange> {
        self.changes.front().map(|s| &s.change)
    }

    /// Newest sample held.
    pub fn max_change(&self) -> Option<&CacheChange> {
        self.changes.back().map(|s| &s.change)
    }

    /// Return a record obtained from `take`/`take_next` to the change pool.
    pub fn recycle(&self, change: CacheChange) {
        self.change_pool.release_cache(change);
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl Drop for ReaderHistory {
    fn drop(&mut self) {
        while let Some(stored) = self.changes.pop_front() {
            self.change_pool.release_cache(stored.change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRITER: GUID = GUID::new([2; 12], [0, 0, 1, 3]);

    fn change(seq: SequenceNumber, instance: InstanceHandle) -> CacheChange {
        CacheChange {
            writer_guid: WRITER,
            sequence_number: seq,
            instance_handle: instance,
            ..Default::default()
        }
    }

    fn history(qos: &QosProfile) -> ReaderHistory {
        ReaderHistory::new(qos, Arc::new(ChangePool::default()))
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut h = history(&QosProfile::reliable());
        h.add_change(change(1, InstanceHandle::NIL)).expect("first");
        assert!(matches!(
            h.add_change(change(1, InstanceHandle::NIL)),
            Err(Error::DuplicateChange)
        ));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_keep_last_evicts_oldest_of_instance() {
        let mut h = history(&QosProfile::reliable().keep_last(2));
        let a = InstanceHandle::from_u64(1);
        let b = InstanceHandle::from_u64(2);
        h.add_change(change(1, a)).expect("add");
        h.add_change(change(2, b)).expect("add");
        h.add_change(change(3, a)).expect("add");
        h.add_change(change(4, a)).expect("add");

        assert!(!h.contains(WRITER, 1));
        assert_eq!(h.min_change().map(|c| c.sequence_number), Some(2));
        assert_eq!(h.max_change().map(|c| c.sequence_number), Some(4));
        assert_eq!(h.unread_count(), 3);
    }

    #[test]
    fn test_keep_all_overflow_rejected() {
        let mut h = history(&QosProfile::reliable().keep_all(2));
        h.add_change(change(1, InstanceHandle::NIL)).expect("add");
        h.add_change(change(2, InstanceHandle::NIL)).expect("add");
        assert!(!h.can_accept(&change(3, InstanceHandle::NIL)));
        assert!(matches!(
            h.add_change(change(3, InstanceHandle::NIL)),
            Err(Error::ResourceLimitExceeded(_))
        ));

        let taken = h.take_next().expect("sample");
        assert_eq!(taken.sequence_number, 1);
        h.recycle(taken);
        assert!(h.can_accept(&change(3, InstanceHandle::NIL)));
    }

    #[test]
    fn test_read_then_take_states() {
        let mut h = history(&QosProfile::reliable());
        for seq in 1..=3 {
            h.add_change(change(seq, InstanceHandle::NIL)).expect("add");
        }
        assert_eq!(h.read_next().map(|c| c.sequence_number), Some(1));
        assert_eq!(h.unread_count(), 2);

        let all = h.read(10);
        let states: Vec<_> = all.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            states,
            vec![SampleState::Read, SampleState::NotRead, SampleState::NotRead]
        );
        assert_eq!(h.unread_count(), 0);
        assert!(h.take_next().is_none());

        let taken = h.take(2);
        assert_eq!(taken.len(), 2);
        assert_eq!(h.len(), 1);
        assert!(h.remove_change(WRITER, 3));
        assert!(h.is_empty());
    }
}
