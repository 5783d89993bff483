// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HEARTBEAT submessage (RTPS 2.3 Section 8.3.7.5)
//!
//! Sent by a writer to announce the range of sequence numbers it still holds
//! and to solicit acknowledgments.
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   HEARTBEAT   |X|X|X|X|X|L|F|E|      octetsToNextHeader       |
//! +---------------+---------------+-------------------------------+
//! |                         readerId                              |
//! +---------------------------------------------------------------+
//! |                         writerId                              |
//! +---------------------------------------------------------------+
//! |                     firstSN (SequenceNumber)                  |
//! +---------------------------------------------------------------+
//! |                     lastSN (SequenceNumber)                   |
//! +---------------------------------------------------------------+
//! |                           count                               |
//! +---------------------------------------------------------------+
//! ```

use super::{begin_submessage, finish_submessage, put_seq, WireReader};
use crate::core::{EntityId, SequenceNumber};
use crate::protocol::{
    DecodeResult, EncodeResult, FLAG_HEARTBEAT_FINAL, FLAG_HEARTBEAT_LIVELINESS, SUBMSG_HEARTBEAT,
};

/// HEARTBEAT submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    /// First sequence number still available (max + 1 when the history is empty).
    pub first_sn: SequenceNumber,
    /// Last sequence number written.
    pub last_sn: SequenceNumber,
    /// Monotonic per-writer counter; stale heartbeats are ignored.
    pub count: u32,
    /// No ACKNACK response required.
    pub final_flag: bool,
    /// Heartbeat asserts writer liveliness.
    pub liveliness: bool,
}

impl Heartbeat {
    /// Encoded size: header(4) + ids(8) + first(8) + last(8) + count(4).
    pub const WIRE_LEN: usize = 32;

    /// Encode with submessage header.
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        let mut flags = 0;
        if self.final_flag {
            flags |= FLAG_HEARTBEAT_FINAL;
        }
        if self.liveliness {
            flags |= FLAG_HEARTBEAT_LIVELINESS;
        }
        let start = begin_submessage(&mut buf, SUBMSG_HEARTBEAT, flags);
        buf.extend_from_slice(&self.reader_id);
        buf.extend_from_slice(&self.writer_id);
        put_seq(&mut buf, self.first_sn);
        put_seq(&mut buf, self.last_sn);
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
            first_sn: r.seq()?,
            last_sn: r.seq()?,
            count: r.u32()?,
            final_flag: flags & FLAG_HEARTBEAT_FINAL != 0,
            liveliness: flags & FLAG_HEARTBEAT_LIVELINESS != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rtps::Submessage;

    #[test]
    fn test_heartbeat_layout() {
        let hb = Heartbeat {
            reader_id: [0, 0, 0, 0],
            writer_id: [0, 0, 0x01, 0x02],
            first_sn: 1,
            last_sn: 10,
            count: 5,
            final_flag: false,
            liveliness: false,
        };
        let buf = hb.encode().expect("encode");
        assert_eq!(buf.len(), 32);
        assert_eq!(buf[0], 0x07);
        assert_eq!(buf[1], 0x01);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 28);
        assert_eq!(u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]), 5);
    }

    #[test]
    fn test_heartbeat_final_flag_decodes() {
        let hb = Heartbeat {
            reader_id: [0; 4],
            writer_id: [0, 0, 0x01, 0x02],
            first_sn: 4,
            last_sn: 3,
            count: 1,
            final_flag: true,
            liveliness: true,
        };
        let buf = hb.encode().expect("encode");
        assert_eq!(buf[1], 0x07);
        let (decoded, used) = Submessage::decode(&buf).expect("decode");
        assert_eq!(used, 32);
        assert_eq!(decoded, Submessage::Heartbeat(hb));
    }

    #[test]
    fn test_heartbeat_big_endian_body() {
        let mut body = Vec::new();
        body.extend_from_slice(&[0, 0, 0, 0]);
        body.extend_from_slice(&[0, 0, 1, 2]);
        body.extend_from_slice(&0i32.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&0i32.to_be_bytes());
        body.extend_from_slice(&9u32.to_be_bytes());
        body.extend_from_slice(&3u32.to_be_bytes());

        let hb = Heartbeat::decode(0x00, &body).expect("decode");
        assert_eq!((hb.first_sn, hb.last_sn, hb.count), (2, 9, 3));
    }
}
