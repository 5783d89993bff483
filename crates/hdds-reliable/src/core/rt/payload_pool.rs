// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted serialized-payload pool.
//!
//! Hands out byte buffers for cache changes under one of four memory policies:
//!
//! | Policy | Slot size | On release |
//! |--------|-----------|------------|
//! | `Preallocated` | fixed `payload_size`, larger requests fail | kept |
//! | `PreallocatedWithRealloc` | starts at `payload_size`, grows on demand | kept |
//! | `DynamicReserve` | exact request size | freed |
//! | `DynamicReusable` | exact request size, reused by any request that fits | kept |
//!
//! Buffers are addressed through generation-checked [`PayloadHandle`]s. The
//! [`SerializedPayload`] wrapper carries an `Arc` back to its owning pool so that
//! whichever subsystem drops the last reference releases into the right pool.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::dds::{Error, Result};

/// Memory management policy of a payload pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryPolicy {
    /// Fixed-size slots; requests above `payload_size` fail.
    Preallocated,
    /// Fixed-size slots that reallocate when a request does not fit.
    #[default]
    PreallocatedWithRealloc,
    /// Allocate per request, free on release.
    DynamicReserve,
    /// Allocate per request, keep released buffers for reuse across sizes.
    DynamicReusable,
}

/// Pool sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub policy: MemoryPolicy,
    /// Slot size for the preallocated policies (bytes).
    pub payload_size: usize,
    /// Slots allocated up front (preallocated policies only).
    pub initial_size: usize,
    /// Maximum number of buffers handed out at once; 0 means unbounded.
    pub max_size: usize,
}

impl PoolConfig {
    /// Unbounded pool with the given policy and slot size.
    pub fn new(policy: MemoryPolicy, payload_size: usize) -> Self {
        Self {
            policy,
            payload_size,
            initial_size: 0,
            max_size: 0,
        }
    }

    /// Set the number of slots allocated at creation.
    #[must_use]
    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Bound the number of simultaneously reserved buffers.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(MemoryPolicy::default(), 1024)
    }
}

/// Handle to a pool slot, invalidated when the slot is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    buffer: Vec<u8>,
    len: usize,
    refcount: u32,
    generation: u32,
}

impl Slot {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity],
            len: 0,
            refcount: 0,
            generation: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<Slot>,
    free: Vec<u32>,
    outstanding: usize,
}

impl PoolState {
    fn slot(&self, handle: PayloadHandle) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.refcount > 0)
    }

    fn slot_mut(&mut self, handle: PayloadHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.refcount > 0)
    }
}

/// Pool of reference-counted payload buffers.
#[derive(Debug)]
pub struct PayloadPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl PayloadPool {
    /// Create a pool. Preallocated policies reserve `initial_size` slots now.
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let mut state = PoolState::default();
        if matches!(
            config.policy,
            MemoryPolicy::Preallocated | MemoryPolicy::PreallocatedWithRealloc
        ) {
            let initial = if config.max_size > 0 {
                config.initial_size.min(config.max_size)
            } else {
                config.initial_size
            };
            for idx in 0..initial {
                state.slots.push(Slot::with_capacity(config.payload_size));
                state.free.push(idx as u32);
            }
        }
        Arc::new(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Reserve a buffer of at least `size` bytes.
    ///
    /// Returns `None` when the policy cannot satisfy the request (fixed slot too
    /// small, or `max_size` buffers already outstanding); callers treat this as
    /// backpressure.
    pub fn get_payload(self: &Arc<Self>, size: usize) -> Option<SerializedPayload> {
        let mut state = self.state.lock();

        if self.config.max_size > 0 && state.outstanding >= self.config.max_size {
            log::debug!(
                "[payload_pool] exhausted: {} buffers outstanding (max {})",
                state.outstanding,
                self.config.max_size
            );
            return None;
        }

        let index = match self.config.policy {
            MemoryPolicy::Preallocated => {
                if size > self.config.payload_size {
                    log::debug!(
                        "[payload_pool] request of {} bytes exceeds fixed slot size {}",
                        size,
                        self.config.payload_size
                    );
                    return None;
                }
                self.take_or_grow(&mut state, self.config.payload_size)
            }
            MemoryPolicy::PreallocatedWithRealloc => {
                let idx = self.take_or_grow(&mut state, self.config.payload_size.max(size));
                let slot = &mut state.slots[idx as usize];
                if slot.buffer.len() < size {
                    slot.buffer.resize(size, 0);
                }
                idx
            }
            MemoryPolicy::DynamicReserve => {
                let idx = self.take_or_grow(&mut state, 0);
                state.slots[idx as usize].buffer = vec![0u8; size];
                idx
            }
            MemoryPolicy::DynamicReusable => {
                let fitting = state
                    .free
                    .iter()
                    .enumerate()
                    .filter(|(_, &i)| state.slots[i as usize].buffer.len() >= size)
                    .min_by_key(|(_, &i)| state.slots[i as usize].buffer.len())
                    .map(|(pos, _)| pos);
                match fitting {
                    Some(pos) => state.free.swap_remove(pos),
                    None => {
                        let idx = self.take_or_grow(&mut state, size);
                        let slot = &mut state.slots[idx as usize];
                        if slot.buffer.len() < size {
                            slot.buffer.resize(size, 0);
                        }
                        idx
                    }
                }
            }
        };

        let slot = &mut state.slots[index as usize];
        slot.refcount = 1;
        slot.len = 0;
        let handle = PayloadHandle {
            index,
            generation: slot.generation,
        };
        state.outstanding += 1;

        Some(SerializedPayload {
            pool: Arc::clone(self),
            handle,
        })
    }

    /// Reserve a buffer and copy `data` into it.
    pub fn get_payload_from(self: &Arc<Self>, data: &[u8]) -> Option<SerializedPayload> {
        let mut payload = self.get_payload(data.len())?;
        // Freshly reserved, never shared, capacity >= data.len()
        payload.fill(data).ok()?;
        Some(payload)
    }

    /// Number of slots currently backed by memory.
    pub fn allocated_size(&self) -> usize {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .filter(|s| !s.buffer.is_empty() || s.refcount > 0)
            .count()
    }

    /// Number of buffers currently referenced by at least one payload.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Number of released slots ready for reuse.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    fn take_or_grow(&self, state: &mut PoolState, capacity: usize) -> u32 {
        if let Some(idx) = state.free.pop() {
            return idx;
        }
        state.slots.push(Slot::with_capacity(capacity));
        (state.slots.len() - 1) as u32
    }

    fn add_ref(&self, handle: PayloadHandle) -> bool {
        let mut state = self.state.lock();
        match state.slot_mut(handle) {
            Some(slot) => {
                slot.refcount += 1;
                true
            }
            None => false,
        }
    }

    fn release(&self, handle: PayloadHandle) {
        let mut state = self.state.lock();
        let policy = self.config.policy;
        let Some(slot) = state.slot_mut(handle) else {
            log::error!("[payload_pool] release of stale handle {:?}", handle);
            return;
        };

        slot.refcount -= 1;
        if slot.refcount > 0 {
            return;
        }

        slot.generation = slot.generation.wrapping_add(1);
        slot.len = 0;
        if policy == MemoryPolicy::DynamicReserve {
            slot.buffer = Vec::new();
        }
        state.free.push(handle.index);
        state.outstanding -= 1;
    }

    fn ref_count(&self, handle: PayloadHandle) -> u32 {
        self.state.lock().slot(handle).map_or(0, |s| s.refcount)
    }
}

/// Shared reference to a pooled payload buffer.
///
/// Cloning takes another reference on the same buffer; the buffer returns to its
/// owning pool when the last clone is dropped.
pub struct SerializedPayload {
    pool: Arc<PayloadPool>,
    handle: PayloadHandle,
}

impl SerializedPayload {
    /// Handle of the underlying slot.
    pub fn handle(&self) -> PayloadHandle {
        self.handle
    }

    /// Number of live references to the buffer.
    pub fn ref_count(&self) -> u32 {
        self.pool.ref_count(self.handle)
    }

    /// Length of the serialized data.
    pub fn len(&self) -> usize {
        let state = self.pool.state.lock();
        state.slot(self.handle).map_or(0, |s| s.len)
    }

    /// True when no data has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the backing buffer.
    pub fn capacity(&self) -> usize {
        let state = self.pool.state.lock();
        state.slot(self.handle).map_or(0, |s| s.buffer.len())
    }

    /// Copy `data` into the buffer.
    ///
    /// Fails when the buffer is shared with another change or too small.
    pub fn fill(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.pool.state.lock();
        let slot = state
            .slot_mut(self.handle)
            .ok_or_else(|| Error::InvalidState("stale payload handle".into()))?;
        if slot.refcount > 1 {
            return Err(Error::InvalidState("payload is shared".into()));
        }
        if data.len() > slot.buffer.len() {
            return Err(Error::ResourceLimitExceeded(format!(
                "payload of {} bytes does not fit in {} byte buffer",
                data.len(),
                slot.buffer.len()
            )));
        }
        slot.buffer[..data.len()].copy_from_slice(data);
        slot.len = data.len();
        Ok(())
    }

    /// Borrow the serialized bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let state = self.pool.state.lock();
        match state.slot(self.handle) {
            Some(slot) => f(&slot.buffer[..slot.len]),
            None => f(&[]),
        }
    }

    /// Copy the serialized bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_bytes(<[u8]>::to_vec)
    }
}

impl Clone for SerializedPayload {
    fn clone(&self) -> Self {
        if !self.pool.add_ref(self.handle) {
            log::error!("[payload_pool] clone of stale handle {:?}", self.handle);
        }
        Self {
            pool: Arc::clone(&self.pool),
            handle: self.handle,
        }
    }
}

impl Drop for SerializedPayload {
    fn drop(&mut self) {
        self.pool.release(self.handle);
    }
}

impl std::fmt::Debug for SerializedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializedPayload")
            .field("handle", &self.handle)
            .field("len", &self.len())
            .finish()
    }
}

impl PartialEq for SerializedPayload {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.pool, &other.pool) {
            // Same pool: read both slots under a single guard.
            let state = self.pool.state.lock();
            let lhs = state.slot(self.handle).map_or(&[][..], |s| &s.buffer[..s.len]);
            let rhs = state.slot(other.handle).map_or(&[][..], |s| &s.buffer[..s.len]);
            return lhs == rhs;
        }
        let mine = self.to_vec();
        other.with_bytes(|theirs| mine.as_slice() == theirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(policy: MemoryPolicy, initial: usize, max: usize) -> Arc<PayloadPool> {
        PayloadPool::new(
            PoolConfig::new(policy, 128)
                .with_initial_size(initial)
                .with_max_size(max),
        )
    }

    #[test]
    fn preallocated_reserves_initial_slots() {
        let p = pool(MemoryPolicy::Preallocated, 10, 0);
        assert_eq!(p.allocated_size(), 10);
        assert_eq!(p.outstanding(), 0);
    }

    #[test]
    fn dynamic_policies_start_empty() {
        assert_eq!(pool(MemoryPolicy::DynamicReserve, 10, 0).allocated_size(), 0);
        assert_eq!(pool(MemoryPolicy::DynamicReusable, 10, 0).allocated_size(), 0);
    }

    #[test]
    fn preallocated_rejects_oversized_request() {
        let p = pool(MemoryPolicy::Preallocated, 1, 0);
        assert!(p.get_payload(129).is_none());
        assert!(p.get_payload(128).is_some());
    }

    #[test]
    fn preallocated_with_realloc_grows_slot() {
        let p = pool(MemoryPolicy::PreallocatedWithRealloc, 1, 0);
        let payload = p.get_payload(4096).expect("realloc should grow");
        assert!(payload.capacity() >= 4096);
    }

    #[test]
    fn bounded_pool_fails_when_exhausted() {
        let p = pool(MemoryPolicy::Preallocated, 2, 2);
        let a = p.get_payload(8).expect("first");
        let _b = p.get_payload(8).expect("second");
        assert!(p.get_payload(8).is_none(), "max_size reached");
        drop(a);
        assert!(p.get_payload(8).is_some(), "released slot reusable");
    }

    #[test]
    fn dynamic_reserve_frees_on_release() {
        let p = pool(MemoryPolicy::DynamicReserve, 0, 0);
        let payloads: Vec<_> = (0..5).map(|_| p.get_payload(64).expect("reserve")).collect();
        assert_eq!(p.allocated_size(), 5);
        drop(payloads);
        assert_eq!(p.allocated_size(), 0);
        assert_eq!(p.outstanding(), 0);
    }

    #[test]
    fn dynamic_reusable_reuses_large_enough_buffer() {
        let p = pool(MemoryPolicy::DynamicReusable, 0, 0);
        let big = p.get_payload(1000).expect("reserve");
        let handle = big.handle();
        drop(big);

        let small = p.get_payload(10).expect("reuse");
        assert_eq!(small.handle().index, handle.index, "same slot reused");
        assert_eq!(small.capacity(), 1000, "no reallocation");
        assert_eq!(p.allocated_size(), 1);
    }

    #[test]
    fn shared_payload_released_on_last_reference() {
        let p = pool(MemoryPolicy::DynamicReusable, 0, 0);
        let first = p.get_payload_from(b"hello").expect("reserve");
        let second = first.clone();
        assert_eq!(first.ref_count(), 2);

        drop(first);
        assert_eq!(p.outstanding(), 1, "still referenced");
        assert_eq!(second.to_vec(), b"hello");

        drop(second);
        assert_eq!(p.outstanding(), 0);
        assert_eq!(p.free_count(), 1);
    }

    #[test]
    fn payload_equality_within_and_across_pools() {
        let p = pool(MemoryPolicy::DynamicReusable, 0, 0);
        let a = p.get_payload_from(b"same").expect("reserve");
        let b = p.get_payload_from(b"same").expect("reserve");
        let c = p.get_payload_from(b"diff").expect("reserve");
        assert!(a == a.clone());
        assert!(a == b);
        assert!(a != c);

        let other = pool(MemoryPolicy::DynamicReserve, 0, 0);
        let d = other.get_payload_from(b"same").expect("reserve");
        assert!(a == d);
        assert!(d != c);
    }

    #[test]
    fn fill_refuses_shared_buffer() {
        let p = pool(MemoryPolicy::DynamicReusable, 0, 0);
        let mut a = p.get_payload(16).expect("reserve");
        let _b = a.clone();
        assert!(a.fill(b"x").is_err());
    }

    #[test]
    fn fill_refuses_oversized_data() {
        let p = pool(MemoryPolicy::Preallocated, 1, 0);
        let mut a = p.get_payload(4).expect("reserve");
        assert!(a.fill(&[0u8; 200]).is_err());
        assert!(a.fill(&[1, 2, 3, 4]).is_ok());
        assert_eq!(a.len(), 4);
    }
}
