// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache change: one sample (or dispose/unregister marker) with its sequence number.

use super::rt::SerializedPayload;
use super::types::{ChangeKind, InstanceHandle, SequenceNumber, Timestamp, GUID};

/// One versioned data sample, written locally or received from a remote writer.
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: GUID,
    pub instance_handle: InstanceHandle,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Option<Timestamp>,
    pub reception_timestamp: Option<Timestamp>,
    /// Pooled payload; `None` for pure dispose/unregister markers.
    pub serialized_payload: Option<SerializedPayload>,
    /// Fragment reception progress for samples arriving as DATA_FRAG.
    pub fragment_state: Option<FragmentState>,
}

impl CacheChange {
    /// Payload length in bytes (0 without payload).
    pub fn payload_len(&self) -> usize {
        self.serialized_payload.as_ref().map_or(0, SerializedPayload::len)
    }

    /// Copy of the payload bytes (empty without payload).
    pub fn payload_to_vec(&self) -> Vec<u8> {
        self.serialized_payload
            .as_ref()
            .map(SerializedPayload::to_vec)
            .unwrap_or_default()
    }

    /// Return the record to its blank state, dropping the payload reference.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Default for CacheChange {
    fn default() -> Self {
        Self {
            kind: ChangeKind::Alive,
            writer_guid: GUID::unknown(),
            instance_handle: InstanceHandle::NIL,
            sequence_number: 0,
            source_timestamp: None,
            reception_timestamp: None,
            serialized_payload: None,
            fragment_state: None,
        }
    }
}

/// Reassembly state of a fragmented sample.
///
/// Fragment numbers are 1-based as on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentState {
    sample_size: u32,
    fragment_size: u16,
    received: Vec<u32>,
    received_count: u32,
    buffer: Vec<u8>,
}

impl FragmentState {
    /// Empty state for a sample of `sample_size` bytes cut in `fragment_size` pieces.
    pub fn new(sample_size: u32, fragment_size: u16) -> Self {
        let total = Self::fragments_for(sample_size, fragment_size);
        Self {
            sample_size,
            fragment_size,
            received: vec![0u32; total.div_ceil(32) as usize],
            received_count: 0,
            buffer: vec![0u8; sample_size as usize],
        }
    }

    fn fragments_for(sample_size: u32, fragment_size: u16) -> u32 {
        if fragment_size == 0 {
            return 0;
        }
        sample_size.div_ceil(u32::from(fragment_size))
    }

    /// Total number of fragments of the sample.
    pub fn total_fragments(&self) -> u32 {
        Self::fragments_for(self.sample_size, self.fragment_size)
    }

    /// Sample size in bytes.
    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    /// Fragment size in bytes.
    pub fn fragment_size(&self) -> u16 {
        self.fragment_size
    }

    /// Whether fragment `num` (1-based) was received.
    pub fn has_fragment(&self, num: u32) -> bool {
        if num == 0 || num > self.total_fragments() {
            return false;
        }
        let bit = num - 1;
        self.received[(bit / 32) as usize] & (1 << (bit % 32)) != 0
    }

    /// Store `fragments` consecutive fragments starting at `first` (1-based).
    ///
    /// Returns `false` when the fragment range or data length is inconsistent
    /// with the sample layout. Duplicates are ignored.
    pub fn insert(&mut self, first: u32, fragments: u16, data: &[u8]) -> bool {
        let total = self.total_fragments();
        let count = u32::from(fragments);
        if first == 0 || count == 0 || first + count - 1 > total {
            return false;
        }

        let frag_size = usize::from(self.fragment_size);
        let start = (first as usize - 1) * frag_size;
        let end = (start + count as usize * frag_size).min(self.sample_size as usize);
        if data.len() < end - start {
            return false;
        }

        self.buffer[start..end].copy_from_slice(&data[..end - start]);
        for num in first..first + count {
            let bit = num - 1;
            let word = &mut self.received[(bit / 32) as usize];
            let mask = 1 << (bit % 32);
            if *word & mask == 0 {
                *word |= mask;
                self.received_count += 1;
            }
        }
        true
    }

    /// True once every fragment was received.
    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_fragments()
    }

    /// Fragment numbers still missing.
    pub fn missing(&self) -> Vec<u32> {
        (1..=self.total_fragments())
            .filter(|n| !self.has_fragment(*n))
            .collect()
    }

    /// Reassembled sample bytes (meaningful once complete).
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_state_reassembles_out_of_order() {
        let sample: Vec<u8> = (0..250u8).collect();
        let mut state = FragmentState::new(250, 100);
        assert_eq!(state.total_fragments(), 3);

        assert!(state.insert(3, 1, &sample[200..]));
        assert!(!state.is_complete());
        assert_eq!(state.missing(), vec![1, 2]);

        assert!(state.insert(1, 2, &sample[..200]));
        assert!(state.is_complete());
        assert_eq!(state.data(), &sample[..]);
    }

    #[test]
    fn fragment_state_rejects_out_of_range() {
        let mut state = FragmentState::new(100, 50);
        assert!(!state.insert(0, 1, &[0; 50]));
        assert!(!state.insert(3, 1, &[0; 50]));
        assert!(!state.insert(1, 1, &[0; 10]), "short data");
    }

    #[test]
    fn duplicate_fragment_counted_once() {
        let mut state = FragmentState::new(100, 50);
        assert!(state.insert(1, 1, &[1; 50]));
        assert!(state.insert(1, 1, &[1; 50]));
        assert!(!state.is_complete());
        assert!(state.insert(2, 1, &[2; 50]));
        assert!(state.is_complete());
    }

    #[test]
    fn reset_drops_payload() {
        let pool = crate::core::rt::PayloadPool::new(crate::core::rt::PoolConfig::default());
        let mut change = CacheChange {
            sequence_number: 4,
            serialized_payload: pool.get_payload_from(b"abc"),
            ..Default::default()
        };
        assert_eq!(pool.outstanding(), 1);
        change.reset();
        assert_eq!(change.sequence_number, 0);
        assert_eq!(pool.outstanding(), 0);
    }
}
