// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DATA and DATA_FRAG submessages (RTPS 2.3 Section 8.3.7.2-3)
//!
//! DATA carries one serialized sample, or a dispose/unregister notification
//! expressed through inline QoS (key hash + status info, no payload).
//! DATA_FRAG carries consecutive fragments of a sample larger than the
//! configured fragment size.

use super::{begin_submessage, finish_submessage, put_seq, WireReader};
use crate::core::types::{ChangeKind, EntityId, InstanceHandle, SequenceNumber};
use crate::protocol::{
    DecodeError, DecodeResult, EncodeResult, FLAG_DATA_FRAG_INLINE_QOS, FLAG_DATA_FRAG_KEY,
    FLAG_DATA_INLINE_QOS, FLAG_DATA_KEY, FLAG_DATA_PAYLOAD, PID_KEY_HASH, PID_PAD, PID_SENTINEL,
    PID_STATUS_INFO, SUBMSG_DATA, SUBMSG_DATA_FRAG,
};

/// octetsToInlineQos for DATA: readerId + writerId + writerSN.
const DATA_OCTETS_TO_INLINE_QOS: u16 = 16;
/// octetsToInlineQos for DATA_FRAG: DATA fields + fragment bookkeeping.
const DATA_FRAG_OCTETS_TO_INLINE_QOS: u16 = 28;

// ============================================================================
// Inline QoS
// ============================================================================

/// Inline QoS parameters understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InlineQos {
    /// PID_KEY_HASH
    pub key_hash: Option<[u8; 16]>,
    /// PID_STATUS_INFO flags (1 = disposed, 2 = unregistered)
    pub status_info: Option<u32>,
}

impl InlineQos {
    /// Inline QoS announcing `kind` for `instance`; `None` for plain alive samples
    /// of keyless topics.
    pub fn for_change(kind: ChangeKind, instance: InstanceHandle) -> Option<Self> {
        let key_hash = (!instance.is_nil()).then_some(instance.0);
        let status_info = (kind != ChangeKind::Alive).then(|| kind.status_info());
        if key_hash.is_none() && status_info.is_none() {
            return None;
        }
        Some(Self {
            key_hash,
            status_info,
        })
    }

    /// Change kind implied by the status info.
    pub fn change_kind(&self) -> ChangeKind {
        self.status_info
            .map_or(ChangeKind::Alive, ChangeKind::from_status_info)
    }

    /// Instance handle from the key hash (NIL when absent).
    pub fn instance_handle(&self) -> InstanceHandle {
        self.key_hash
            .map_or(InstanceHandle::NIL, InstanceHandle::from_key_hash)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        if let Some(hash) = &self.key_hash {
            buf.extend_from_slice(&PID_KEY_HASH.to_le_bytes());
            buf.extend_from_slice(&16u16.to_le_bytes());
            buf.extend_from_slice(hash);
        }
        if let Some(status) = self.status_info {
            buf.extend_from_slice(&PID_STATUS_INFO.to_le_bytes());
            buf.extend_from_slice(&4u16.to_le_bytes());
            // StatusInfo_t is an octet array; flags live in the last octet
            buf.extend_from_slice(&status.to_be_bytes());
        }
        buf.extend_from_slice(&PID_SENTINEL.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
    }

    fn decode(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let mut qos = Self::default();
        loop {
            let pid = r.u16()?;
            let len = usize::from(r.u16()?);
            match pid {
                PID_SENTINEL => return Ok(qos),
                PID_KEY_HASH if len >= 16 => {
                    qos.key_hash = Some(r.array::<16>()?);
                    r.skip(len - 16)?;
                }
                PID_STATUS_INFO if len >= 4 => {
                    qos.status_info = Some(u32::from_be_bytes(r.array::<4>()?));
                    r.skip(len - 4)?;
                }
                PID_PAD => r.skip(len)?,
                _ => {
                    log::trace!("[rtps] skipping inline QoS pid 0x{:04x} ({} bytes)", pid, len);
                    r.skip(len)?;
                }
            }
        }
    }
}

// ============================================================================
// DATA
// ============================================================================

/// DATA submessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub inline_qos: Option<InlineQos>,
    /// Serialized sample; `None` for dispose/unregister notifications.
    pub payload: Option<Vec<u8>>,
}

impl Data {
    /// Encode with submessage header.
    ///
    /// ```text
    /// +---------------+---------------+-------------------------------+
    /// |     DATA      |X|X|X|X|K|D|Q|E|      octetsToNextHeader       |
    /// +---------------+---------------+-------------------------------+
    /// |   extraFlags                  |      octetsToInlineQos        |
    /// +-------------------------------+-------------------------------+
    /// |  readerId  |  writerId  |  writerSN  | [inlineQos] | [payload] |
    /// +---------------------------------------------------------------+
    /// ```
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let payload_len = self.payload.as_ref().map_or(0, Vec::len);
        let mut buf = Vec::with_capacity(4 + 20 + 32 + payload_len);
        let mut flags = 0;
        if self.inline_qos.is_some() {
            flags |= FLAG_DATA_INLINE_QOS;
        }
        if self.payload.is_some() {
            flags |= FLAG_DATA_PAYLOAD;
        }
        let start = begin_submessage(&mut buf, SUBMSG_DATA, flags);
        buf.extend_from_slice(&0u16.to_le_bytes()); // extraFlags
        buf.extend_from_slice(&DATA_OCTETS_TO_INLINE_QOS.to_le_bytes());
        buf.extend_from_slice(&self.reader_id);
        buf.extend_from_slice(&self.writer_id);
        put_seq(&mut buf, self.writer_sn);
        if let Some(qos) = &self.inline_qos {
            qos.encode_into(&mut buf);
        }
        if let Some(payload) = &self.payload {
            buf.extend_from_slice(payload);
        }
        finish_submessage(&mut buf, start)?;
        Ok(buf)
    }

    /// Decode from submessage flags and body.
    pub fn decode(flags: u8, body: &[u8]) -> DecodeResult<Self> {
        let mut r = WireReader::new(body, flags);
        r.skip(2)?; // extraFlags
        let octets_to_inline_qos = usize::from(r.u16()?);
        let fields_start = r.position();
        let reader_id = r.entity_id()?;
        let writer_id = r.entity_id()?;
        let writer_sn = r.seq()?;
        if writer_sn == 0 {
            return Err(DecodeError::InvalidField("DATA writerSN must be >= 1"));
        }
        // Skip any fields a newer protocol version placed before the inline QoS
        let consumed = r.position() - fields_start;
        if octets_to_inline_qos < consumed {
            return Err(DecodeError::InvalidField("octetsToInlineQos too small"));
        }
        r.skip(octets_to_inline_qos - consumed)?;

        let inline_qos = if flags & FLAG_DATA_INLINE_QOS != 0 {
            Some(InlineQos::decode(&mut r)?)
        } else {
            None
        };
        let payload = if flags & (FLAG_DATA_PAYLOAD | FLAG_DATA_KEY) != 0 {
            Some(r.rest().to_vec())
        } else {
            None
        };

        Ok(Self {
            reader_id,
            writer_id,
            writer_sn,
            inline_qos,
            payload,
        })
    }
}

// ============================================================================
// DATA_FRAG
// ============================================================================

/// DATA_FRAG submessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    /// First fragment number in this submessage (1-based).
    pub fragment_starting_num: u32,
    pub fragments_in_submessage: u16,
    pub fragment_size: u16,
    /// Size of the complete sample.
    pub sample_size: u32,
    pub inline_qos: Option<InlineQos>,
    pub payload: Vec<u8>,
}

impl DataFrag {
    /// Encode with submessage header.
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + 32 + 32 + self.payload.len());
        let flags = if self.inline_qos.is_some() {
            FLAG_DATA_FRAG_INLINE_QOS
        } else {
            0
        };
        let start = begin_submessage(&mut buf, SUBMSG_DATA_FRAG, flags);
        buf.extend_from_slice(&0u16.to_le_bytes()); // extraFlags
        buf.extend_from_slice(&DATA_FRAG_OCTETS_TO_INLINE_QOS.to_le_bytes());
        buf.extend_from_slice(&self.reader_id);
        buf.extend_from_slice(&self.writer_id);
        put_seq(&mut buf, self.writer_sn);
        buf.extend_from_slice(&self.fragment_starting_num.to_le_bytes());
        buf.extend_from_slice(&self.fragments_in_submessage.to_le_bytes());
        buf.extend_from_slice(&self.fragment_size.to_le_bytes());
        buf.extend_from_slice(&self.sample_size.to_le_bytes());
        if let Some(qos) = &self.inline_qos {
            qos.encode_into(&mut buf);
        }
        buf.extend_from_slice(&self.payload);
        finish_submessage(&mut buf, start)?;
        Ok(buf)
    }

    /// Decode from submessage flags and body.
    pub fn decode(flags: u8, body: &[u8]) -> DecodeResult<Self> {
        let mut r = WireReader::new(body, flags);
        r.skip(2)?;
        let octets_to_inline_qos = usize::from(r.u16()?);
        let fields_start = r.position();
        let reader_id = r.entity_id()?;
        let writer_id = r.entity_id()?;
        let writer_sn = r.seq()?;
        let fragment_starting_num = r.u32()?;
        let fragments_in_submessage = r.u16()?;
        let fragment_size = r.u16()?;
        let sample_size = r.u32()?;
        if writer_sn == 0 || fragment_starting_num == 0 || fragment_size == 0 {
            return Err(DecodeError::InvalidField("DATA_FRAG numbering must start at 1"));
        }
        let consumed = r.position() - fields_start;
        if octets_to_inline_qos < consumed {
            return Err(DecodeError::InvalidField("octetsToInlineQos too small"));
        }
        r.skip(octets_to_inline_qos - consumed)?;

        let inline_qos = if flags & FLAG_DATA_FRAG_INLINE_QOS != 0 {
            Some(InlineQos::decode(&mut r)?)
        } else {
            None
        };
        if flags & FLAG_DATA_FRAG_KEY != 0 {
            log::trace!("[rtps] DATA_FRAG carries serialized key, treated as payload");
        }

        Ok(Self {
            reader_id,
            writer_id,
            writer_sn,
            fragment_starting_num,
            fragments_in_submessage,
            fragment_size,
            sample_size,
            inline_qos,
            payload: r.rest().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rtps::Submessage;

    #[test]
    fn test_data_layout() {
        let data = Data {
            reader_id: [0; 4],
            writer_id: [0, 0, 1, 3],
            writer_sn: 42,
            inline_qos: None,
            payload: Some(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        };
        let buf = data.encode().expect("encode");
        assert_eq!(buf[0], 0x15);
        assert_eq!(buf[1], 0x05);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 24);
        assert_eq!(u16::from_le_bytes([buf[6], buf[7]]), 16);
        assert_eq!(&buf[24..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_dispose_carries_key_hash_and_status() {
        let instance = InstanceHandle::from_u64(77);
        let data = Data {
            reader_id: [0; 4],
            writer_id: [0, 0, 1, 2],
            writer_sn: 3,
            inline_qos: InlineQos::for_change(ChangeKind::NotAliveDisposed, instance),
            payload: None,
        };
        let buf = data.encode().expect("encode");
        assert_eq!(buf[1], 0x03); // Q + E, no D

        let (decoded, _) = Submessage::decode(&buf).expect("decode");
        let Submessage::Data(decoded) = decoded else {
            panic!("expected DATA");
        };
        let qos = decoded.inline_qos.expect("inline qos");
        assert_eq!(qos.change_kind(), ChangeKind::NotAliveDisposed);
        assert_eq!(qos.instance_handle(), instance);
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn test_unknown_inline_pid_is_skipped() {
        let mut body = Vec::new();
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&16u16.to_le_bytes());
        body.extend_from_slice(&[0; 4]);
        body.extend_from_slice(&[0, 0, 1, 2]);
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&0x8001u16.to_le_bytes());
        body.extend_from_slice(&4u16.to_le_bytes());
        body.extend_from_slice(&[9, 9, 9, 9]);
        body.extend_from_slice(&PID_SENTINEL.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(b"abc");

        let data = Data::decode(0x07, &body).expect("decode");
        assert_eq!(data.inline_qos, Some(InlineQos::default()));
        assert_eq!(data.payload.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_data_frag_fields() {
        let frag = DataFrag {
            reader_id: [0; 4],
            writer_id: [0, 0, 1, 3],
            writer_sn: 8,
            fragment_starting_num: 2,
            fragments_in_submessage: 1,
            fragment_size: 4,
            sample_size: 10,
            inline_qos: None,
            payload: vec![5, 6, 7, 8],
        };
        let buf = frag.encode().expect("encode");
        assert_eq!(buf[0], 0x16);
        assert_eq!(u16::from_le_bytes([buf[6], buf[7]]), 28);

        let (decoded, used) = Submessage::decode(&buf).expect("decode");
        assert_eq!(used, buf.len());
        assert_eq!(decoded, Submessage::DataFrag(frag));
    }

    #[test]
    fn test_data_rejects_sequence_zero() {
        let data = Data {
            reader_id: [0; 4],
            writer_id: [0; 4],
            writer_sn: 0,
            inline_qos: None,
            payload: Some(vec![1]),
        };
        let buf = data.encode().expect("encode");
        assert!(Submessage::decode(&buf).is_err());
    }
}
