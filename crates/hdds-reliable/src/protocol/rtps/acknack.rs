// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ACKNACK submessage (RTPS 2.3 Section 8.3.7.1)
//!
//! Sent by a reliable reader: `readerSNState.base` acknowledges every sequence
//! number below it, set bits request retransmission.
//!
//! ```text
//! +---------------+---------------+-------------------------------+
//! |   ACKNACK     |X|X|X|X|X|X|F|E|      octetsToNextHeader       |
//! +---------------+---------------+-------------------------------+
//! |                         readerId                              |
//! +---------------------------------------------------------------+
//! |                         writerId                              |
//! +---------------------------------------------------------------+
//! |              readerSNState (SequenceNumberSet)                |
//! +---------------------------------------------------------------+
//! |                           count                               |
//! +---------------------------------------------------------------+
//! ```

use super::{begin_submessage, finish_submessage, SequenceNumberSet, WireReader};
use crate::core::{EntityId, SequenceNumber};
use crate::protocol::{DecodeResult, EncodeResult, FLAG_ACKNACK_FINAL, SUBMSG_ACKNACK};

/// ACKNACK submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckNack {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub reader_sn_state: SequenceNumberSet,
    /// Monotonic per-reader counter; stale ACKNACKs are ignored.
    pub count: u32,
    /// Reader does not want a HEARTBEAT in response.
    pub final_flag: bool,
}

impl AckNack {
    /// Everything below `base` acknowledged, `missing` requested.
    pub fn new(
        reader_id: EntityId,
        writer_id: EntityId,
        reader_sn_state: SequenceNumberSet,
        count: u32,
    ) -> Self {
        Self {
            reader_id,
            writer_id,
            reader_sn_state,
            count,
            final_flag: reader_sn_state.is_empty(),
        }
    }

    /// All sequence numbers below this one are acknowledged.
    pub fn ack_base(&self) -> SequenceNumber {
        self.reader_sn_state.base()
    }

    /// Sequence numbers requested for retransmission.
    pub fn requested(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.reader_sn_state.iter()
    }

    /// Encode with submessage header.
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + 8 + self.reader_sn_state.wire_len() + 4);
        let flags = if self.final_flag { FLAG_ACKNACK_FINAL } else { 0 };
        let start = begin_submessage(&mut buf, SUBMSG_ACKNACK, flags);
        buf.extend_from_slice(&self.reader_id);
        buf.extend_from_slice(&self.writer_id);
        self.reader_sn_state.encode_into(&mut buf);
        buf.extend_from_slice(&self.count.to_le_bytes());
        finish_submessage(&mut buf, start)?;
        Ok(buf)
    }

    /// Decode from submessage flags and body.
    pub fn decode(flags: u8, body: &[u8]) -> DecodeResult<Self> {
        let mut r = WireReader::new(body, flags);
        Ok(Self {
            reader_id: r.entity_id()?,
            writer_id: r.entity_id()?,
            reader_sn_state: SequenceNumberSet::decode(&mut r)?,
            count: r.u32()?,
            final_flag: flags & FLAG_ACKNACK_FINAL != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rtps::Submessage;

    #[test]
    fn test_acknack_pure_ack_is_final() {
        let ack = AckNack::new([0, 0, 1, 7], [0, 0, 1, 2], SequenceNumberSet::empty(6), 3);
        assert!(ack.final_flag);
        let buf = ack.encode().expect("encode");
        // header(4) + ids(8) + base(8) + numBits(4) + count(4)
        assert_eq!(buf.len(), 28);
        assert_eq!(buf[1], 0x03);
    }

    #[test]
    fn test_acknack_with_missing_decodes() {
        let set = SequenceNumberSet::from_sequences(2, &[2, 4]).expect("fits");
        let ack = AckNack::new([0, 0, 1, 7], [0, 0, 1, 2], set, 9);
        assert!(!ack.final_flag);

        let buf = ack.encode().expect("encode");
        let (decoded, _) = Submessage::decode(&buf).expect("decode");
        let Submessage::AckNack(decoded) = decoded else {
            panic!("expected ACKNACK");
        };
        assert_eq!(decoded.ack_base(), 2);
        assert_eq!(decoded.requested().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(decoded.count, 9);
    }
}
