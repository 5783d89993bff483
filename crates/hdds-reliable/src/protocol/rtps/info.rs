// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! INFO_TS and INFO_DST submessages (RTPS 2.3 Section 8.3.7.7-9)
//!
//! Both modify the receiver state applied to the submessages that follow
//! them in the same message.

use super::{begin_submessage, finish_submessage, WireReader};
use crate::core::types::{GuidPrefix, Timestamp, GUID_PREFIX_LEN};
use crate::protocol::{
    DecodeResult, EncodeResult, FLAG_INFO_TS_INVALIDATE, SUBMSG_INFO_DST, SUBMSG_INFO_TS,
};

/// INFO_TS: source timestamp of the following DATA submessages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoTs {
    /// `None` invalidates any previously set timestamp.
    pub timestamp: Option<Timestamp>,
}

impl InfoTs {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
        }
    }

    /// Encode with submessage header (12 bytes, or 4 when invalidating).
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(12);
        match self.timestamp {
            Some(ts) => {
                let start = begin_submessage(&mut buf, SUBMSG_INFO_TS, 0);
                let (seconds, fraction) = ts.to_rtps();
                buf.extend_from_slice(&seconds.to_le_bytes());
                buf.extend_from_slice(&fraction.to_le_bytes());
                finish_submessage(&mut buf, start)?;
            }
            None => {
                let start = begin_submessage(&mut buf, SUBMSG_INFO_TS, FLAG_INFO_TS_INVALIDATE);
                finish_submessage(&mut buf, start)?;
            }
        }
        Ok(buf)
    }

    /// Decode from submessage flags and body.
    pub fn decode(flags: u8, body: &[u8]) -> DecodeResult<Self> {
        if flags & FLAG_INFO_TS_INVALIDATE != 0 {
            return Ok(Self { timestamp: None });
        }
        let mut r = WireReader::new(body, flags);
        let seconds = r.i32()?;
        let fraction = r.u32()?;
        Ok(Self::new(Timestamp::from_rtps(seconds, fraction)))
    }
}

/// INFO_DST: destination participant of the following submessages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoDst {
    /// `GUIDPREFIX_UNKNOWN` addresses every participant.
    pub guid_prefix: GuidPrefix,
}

impl InfoDst {
    /// Encode with submessage header (16 bytes).
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + GUID_PREFIX_LEN);
        let start = begin_submessage(&mut buf, SUBMSG_INFO_DST, 0);
        buf.extend_from_slice(&self.guid_prefix);
        finish_submessage(&mut buf, start)?;
        Ok(buf)
    }

    /// Decode from submessage flags and body.
    pub fn decode(flags: u8, body: &[u8]) -> DecodeResult<Self> {
        let mut r = WireReader::new(body, flags);
        Ok(Self {
            guid_prefix: r.array::<GUID_PREFIX_LEN>()?,
        })
    }
}
