// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS message framing.
//!
//! - [`RtpsHeader`]: the 20-byte message header
//! - [`MessageBuilder`]: packs submessages into messages bounded by the
//!   transport's maximum size, optionally prefixed with INFO_DST
//! - [`MessageReceiver`]: walks a received message, applying INFO_TS and
//!   INFO_DST to the submessages that follow them

use super::rtps::{InfoDst, Submessage};
use super::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::config::{HDDS_VENDOR_ID, PROTOCOL_VERSION, RTPS_HEADER_LEN, RTPS_MAGIC};
use crate::core::types::{GuidPrefix, Timestamp, GUIDPREFIX_UNKNOWN, GUID_PREFIX_LEN};

/// RTPS message header.
///
/// ```text
/// +---------------+---------------+---------------+---------------+
/// |      'R'      |      'T'      |      'P'      |      'S'      |
/// +---------------+---------------+---------------+---------------+
/// | ProtocolVersion version       | VendorId vendorId             |
/// +---------------+---------------+---------------+---------------+
/// |                      GuidPrefix (12 bytes)                    |
/// +---------------+---------------+---------------+---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpsHeader {
    pub version: [u8; 2],
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl RtpsHeader {
    /// Header emitted by this engine for `guid_prefix`.
    pub fn new(guid_prefix: GuidPrefix) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            vendor_id: HDDS_VENDOR_ID,
            guid_prefix,
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&RTPS_MAGIC);
        buf.extend_from_slice(&self.version);
        buf.extend_from_slice(&self.vendor_id);
        buf.extend_from_slice(&self.guid_prefix);
    }

    /// Parse the header at the start of `buf`.
    pub fn decode(buf: &[u8]) -> DecodeResult<Self> {
        if buf.len() < RTPS_HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: RTPS_HEADER_LEN,
                available: buf.len(),
            });
        }
        if buf[0..4] != RTPS_MAGIC {
            return Err(DecodeError::InvalidHeader("missing RTPS magic"));
        }
        if buf[4] != PROTOCOL_VERSION[0] {
            return Err(DecodeError::InvalidHeader("unsupported protocol major version"));
        }
        let mut guid_prefix = [0u8; GUID_PREFIX_LEN];
        guid_prefix.copy_from_slice(&buf[8..RTPS_HEADER_LEN]);
        Ok(Self {
            version: [buf[4], buf[5]],
            vendor_id: [buf[6], buf[7]],
            guid_prefix,
        })
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Packs encoded submessages into size-bounded RTPS messages.
///
/// Submessages added as one group (e.g. INFO_TS + DATA) always land in the
/// same message.
#[derive(Debug)]
pub struct MessageBuilder {
    header: RtpsHeader,
    destination: Option<GuidPrefix>,
    max_size: usize,
    current: Vec<u8>,
    finished: Vec<Vec<u8>>,
}

impl MessageBuilder {
    pub fn new(source_prefix: GuidPrefix, max_size: usize) -> Self {
        Self {
            header: RtpsHeader::new(source_prefix),
            destination: None,
            max_size,
            current: Vec::new(),
            finished: Vec::new(),
        }
    }

    /// Prefix every message with INFO_DST for `prefix`.
    #[must_use]
    pub fn with_destination(mut self, prefix: GuidPrefix) -> Self {
        self.destination = Some(prefix);
        self
    }

    fn preamble_len(&self) -> usize {
        RTPS_HEADER_LEN + if self.destination.is_some() { 16 } else { 0 }
    }

    fn start_message(&mut self) -> EncodeResult<()> {
        self.current.reserve(self.max_size.min(4096));
        self.header.encode_into(&mut self.current);
        if let Some(prefix) = self.destination {
            let info_dst = InfoDst {
                guid_prefix: prefix,
            }
            .encode()?;
            self.current.extend_from_slice(&info_dst);
        }
        Ok(())
    }

    /// Append one submessage.
    pub fn add(&mut self, submessage: &Submessage) -> EncodeResult<()> {
        let encoded = submessage.encode()?;
        self.add_group(&[encoded])
    }

    /// Append already-encoded submessages that must share one message.
    pub fn add_group(&mut self, parts: &[Vec<u8>]) -> EncodeResult<()> {
        let group_len: usize = parts.iter().map(Vec::len).sum();
        let needed = self.preamble_len() + group_len;
        if needed > self.max_size {
            return Err(EncodeError::MessageTooLarge {
                size: needed,
                max: self.max_size,
            });
        }

        if !self.current.is_empty() && self.current.len() + group_len > self.max_size {
            self.finished.push(std::mem::take(&mut self.current));
        }
        if self.current.is_empty() {
            self.start_message()?;
        }
        for part in parts {
            self.current.extend_from_slice(part);
        }
        Ok(())
    }

    /// True when no submessage has been added.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.finished.is_empty()
    }

    /// Completed messages, in order.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.current.is_empty() {
            self.finished.push(self.current);
        }
        self.finished
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// A submessage together with the receiver state in force when it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedSubmessage {
    /// GUID prefix of the sending participant.
    pub source_prefix: GuidPrefix,
    /// Last INFO_TS timestamp, if any.
    pub timestamp: Option<Timestamp>,
    pub submessage: Submessage,
}

/// Interprets received messages for one local participant.
#[derive(Debug, Clone)]
pub struct MessageReceiver {
    local_prefix: GuidPrefix,
}

impl MessageReceiver {
    pub fn new(local_prefix: GuidPrefix) -> Self {
        Self { local_prefix }
    }

    /// Split a message into the submessages addressed to this participant.
    ///
    /// A malformed header fails the whole message. A malformed submessage
    /// ends parsing; the submessages before it are still returned.
    pub fn receive(&self, buf: &[u8]) -> DecodeResult<Vec<ReceivedSubmessage>> {
        let header = RtpsHeader::decode(buf)?;
        let mut out = Vec::new();
        let mut timestamp = None;
        let mut destination = GUIDPREFIX_UNKNOWN;
        let mut offset = RTPS_HEADER_LEN;

        while offset < buf.len() {
            let (submessage, used) = match Submessage::decode(&buf[offset..]) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::debug!(
                        "[receiver] dropping rest of message from {:02x?} at offset {}: {}",
                        header.guid_prefix,
                        offset,
                        e
                    );
                    break;
                }
            };
            offset += used;

            match submessage {
                Submessage::InfoTs(info) => timestamp = info.timestamp,
                Submessage::InfoDst(info) => destination = info.guid_prefix,
                Submessage::Unknown(id) => {
                    log::trace!("[receiver] skipping submessage 0x{:02x}", id);
                }
                other => {
                    if destination != GUIDPREFIX_UNKNOWN && destination != self.local_prefix {
                        continue;
                    }
                    out.push(ReceivedSubmessage {
                        source_prefix: header.guid_prefix,
                        timestamp,
                        submessage: other,
                    });
                }
            }
        }
        Ok(out)
    }
}
