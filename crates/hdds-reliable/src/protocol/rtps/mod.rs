// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RTPS submessages (OMG RTPS 2.3 Sec.8.3.7)
//!
//! Typed submessages used by the reliability protocol, each with an encoder
//! (little-endian, header included) and a decoder taking the submessage flags
//! and body.
//!
//! # Submessages
//!
//! - ACKNACK (0x06): reader acknowledgment + retransmission request
//! - HEARTBEAT (0x07): writer's available sequence range
//! - GAP (0x08): irrelevant sequence numbers
//! - INFO_TS (0x09): source timestamp for following submessages
//! - INFO_DST (0x0E): destination participant for following submessages
//! - DATA (0x15): one sample, dispose or unregister
//! - DATA_FRAG (0x16): fragment(s) of a large sample
//!
//! # References
//!
//! - OMG RTPS 2.3 spec: Section 8.3.7 (Submessages)
//! - OMG RTPS 2.3 spec: Section 9.4.5 (SequenceNumberSet)

mod acknack;
mod data;
mod gap;
mod heartbeat;
mod info;
mod seq_set;

pub use acknack::AckNack;
pub use data::{Data, DataFrag, InlineQos};
pub use gap::Gap;
pub use heartbeat::Heartbeat;
pub use info::{InfoDst, InfoTs};
pub use seq_set::{SequenceNumberIter, SequenceNumberSet};

use super::{
    DecodeError, DecodeResult, EncodeError, EncodeResult, FLAG_ENDIANNESS, SUBMSG_ACKNACK,
    SUBMSG_DATA, SUBMSG_DATA_FRAG, SUBMSG_GAP, SUBMSG_HEARTBEAT, SUBMSG_INFO_DST, SUBMSG_INFO_TS,
};
use crate::config::SUBMESSAGE_HEADER_LEN;
use crate::core::types::{seq_from_wire, seq_to_wire, EntityId, SequenceNumber};

/// Any submessage the engine understands, plus a catch-all for the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum Submessage {
    Data(Data),
    DataFrag(DataFrag),
    Heartbeat(Heartbeat),
    AckNack(AckNack),
    Gap(Gap),
    InfoTs(InfoTs),
    InfoDst(InfoDst),
    /// Submessage id not handled by this engine; skipped by receivers.
    Unknown(u8),
}

impl Submessage {
    /// Encode with submessage header.
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        match self {
            Submessage::Data(m) => m.encode(),
            Submessage::DataFrag(m) => m.encode(),
            Submessage::Heartbeat(m) => m.encode(),
            Submessage::AckNack(m) => m.encode(),
            Submessage::Gap(m) => m.encode(),
            Submessage::InfoTs(m) => m.encode(),
            Submessage::InfoDst(m) => m.encode(),
            Submessage::Unknown(_) => Err(EncodeError::InvalidParameter(
                "cannot encode unknown submessage",
            )),
        }
    }

    /// Decode one submessage at the start of `buf`.
    ///
    /// Returns the submessage and the number of bytes consumed. A zero
    /// `octetsToNextHeader` means the submessage extends to the end of `buf`
    /// (except for INFO_TS, whose invalidate form is legitimately empty).
    pub fn decode(buf: &[u8]) -> DecodeResult<(Submessage, usize)> {
        ensure_len(buf, SUBMESSAGE_HEADER_LEN)?;
        let id = buf[0];
        let flags = buf[1];
        let le = flags & FLAG_ENDIANNESS != 0;
        let raw_len = if le {
            u16::from_le_bytes([buf[2], buf[3]])
        } else {
            u16::from_be_bytes([buf[2], buf[3]])
        } as usize;

        let body_len = if raw_len == 0 && id != SUBMSG_INFO_TS {
            buf.len() - SUBMESSAGE_HEADER_LEN
        } else {
            raw_len
        };
        let end = SUBMESSAGE_HEADER_LEN + body_len;
        ensure_len(buf, end)?;
        let body = &buf[SUBMESSAGE_HEADER_LEN..end];

        let submsg = match id {
            SUBMSG_DATA => Submessage::Data(Data::decode(flags, body)?),
            SUBMSG_DATA_FRAG => Submessage::DataFrag(DataFrag::decode(flags, body)?),
            SUBMSG_HEARTBEAT => Submessage::Heartbeat(Heartbeat::decode(flags, body)?),
            SUBMSG_ACKNACK => Submessage::AckNack(AckNack::decode(flags, body)?),
            SUBMSG_GAP => Submessage::Gap(Gap::decode(flags, body)?),
            SUBMSG_INFO_TS => Submessage::InfoTs(InfoTs::decode(flags, body)?),
            SUBMSG_INFO_DST => Submessage::InfoDst(InfoDst::decode(flags, body)?),
            other => Submessage::Unknown(other),
        };
        Ok((submsg, end))
    }
}

// ============================================================================
// Wire helpers shared by the submessage codecs
// ============================================================================

pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> DecodeResult<()> {
    if buf.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Start a submessage: id, flags (LE bit forced) and a length placeholder.
pub(crate) fn begin_submessage(buf: &mut Vec<u8>, id: u8, flags: u8) -> usize {
    let start = buf.len();
    buf.push(id);
    buf.push(flags | FLAG_ENDIANNESS);
    buf.extend_from_slice(&[0, 0]);
    start
}

/// Patch the octetsToNextHeader field of the submessage starting at `start`.
pub(crate) fn finish_submessage(buf: &mut [u8], start: usize) -> EncodeResult<()> {
    let body_len = buf.len() - start - SUBMESSAGE_HEADER_LEN;
    let len = u16::try_from(body_len).map_err(|_| EncodeError::SubmessageTooLarge(body_len))?;
    buf[start + 2..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

pub(crate) fn put_seq(buf: &mut Vec<u8>, seq: SequenceNumber) {
    let (high, low) = seq_to_wire(seq);
    buf.extend_from_slice(&high.to_le_bytes());
    buf.extend_from_slice(&low.to_le_bytes());
}

/// Bounds-checked reader over a submessage body honoring its endianness.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    le: bool,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8], flags: u8) -> Self {
        Self {
            buf,
            pos: 0,
            le: flags & FLAG_ENDIANNESS != 0,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn bytes(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        ensure_len(self.buf, self.pos + n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn skip(&mut self, n: usize) -> DecodeResult<()> {
        self.bytes(n).map(|_| ())
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub(crate) fn array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u16(&mut self) -> DecodeResult<u16> {
        let raw = self.array::<2>()?;
        Ok(if self.le {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    pub(crate) fn u32(&mut self) -> DecodeResult<u32> {
        let raw = self.array::<4>()?;
        Ok(if self.le {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    pub(crate) fn i32(&mut self) -> DecodeResult<i32> {
        let raw = self.array::<4>()?;
        Ok(if self.le {
            i32::from_le_bytes(raw)
        } else {
            i32::from_be_bytes(raw)
        })
    }

    pub(crate) fn entity_id(&mut self) -> DecodeResult<EntityId> {
        self.array::<4>()
    }

    pub(crate) fn seq(&mut self) -> DecodeResult<SequenceNumber> {
        let high = self.i32()?;
        let low = self.u32()?;
        seq_from_wire(high, low).ok_or(DecodeError::InvalidField("negative sequence number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_unknown_submessage_is_skipped() {
        let buf = [0x7F, 0x01, 0x04, 0x00, 1, 2, 3, 4, 0xAA];
        let (submsg, used) = Submessage::decode(&buf).expect("decode");
        assert_eq!(submsg, Submessage::Unknown(0x7F));
        assert_eq!(used, 8);
    }

    #[test]
    fn test_decode_truncated_header() {
        assert!(matches!(
            Submessage::decode(&[0x07, 0x01]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_length_past_buffer() {
        let buf = [0x07, 0x01, 0x1C, 0x00, 0, 0, 0, 0];
        assert!(matches!(
            Submessage::decode(&buf),
            Err(DecodeError::Truncated { needed: 32, .. })
        ));
    }

    #[test]
    fn test_wire_reader_big_endian() {
        let body = [0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05];
        let mut r = WireReader::new(&body, 0x00);
        assert_eq!(r.u32().expect("u32"), 0x0102);
        assert_eq!(r.seq().expect("seq"), 5);
        assert_eq!(r.remaining(), 0);
    }
}
