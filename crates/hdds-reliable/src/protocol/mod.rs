// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS wire protocol used by the reliability engine
//!
//! This module contains:
//! - Submessage ids, flags and inline-QoS parameter ids
//! - Typed submessages with encoders and decoders ([`rtps`])
//! - Message framing: header, size-bounded batching and receive-side
//!   INFO_TS / INFO_DST interpretation ([`message`])
//!
//! Encoders always emit little-endian submessages; decoders honor the
//! endianness flag of each submessage.

pub mod message;
pub mod rtps;

pub use message::{MessageBuilder, MessageReceiver, ReceivedSubmessage, RtpsHeader};
pub use rtps::{
    AckNack, Data, DataFrag, Gap, Heartbeat, InfoDst, InfoTs, InlineQos, SequenceNumberSet,
    Submessage,
};

// ============================================================================
// Submessage ids (RTPS 2.3 Sec.9.4.5.1.1)
// ============================================================================

/// ACKNACK submessage id.
pub const SUBMSG_ACKNACK: u8 = 0x06;
/// HEARTBEAT submessage id.
pub const SUBMSG_HEARTBEAT: u8 = 0x07;
/// GAP submessage id.
pub const SUBMSG_GAP: u8 = 0x08;
/// INFO_TS submessage id.
pub const SUBMSG_INFO_TS: u8 = 0x09;
/// INFO_DST submessage id.
pub const SUBMSG_INFO_DST: u8 = 0x0E;
/// DATA submessage id.
pub const SUBMSG_DATA: u8 = 0x15;
/// DATA_FRAG submessage id.
pub const SUBMSG_DATA_FRAG: u8 = 0x16;

// ============================================================================
// Submessage flags
// ============================================================================

/// Endianness flag (set = little-endian), common to all submessages.
pub const FLAG_ENDIANNESS: u8 = 0x01;
/// ACKNACK: Final flag (no HEARTBEAT response wanted).
pub const FLAG_ACKNACK_FINAL: u8 = 0x02;
/// HEARTBEAT: Final flag (no ACKNACK response required).
pub const FLAG_HEARTBEAT_FINAL: u8 = 0x02;
/// HEARTBEAT: Liveliness flag.
pub const FLAG_HEARTBEAT_LIVELINESS: u8 = 0x04;
/// INFO_TS: Invalidate flag (no timestamp follows).
pub const FLAG_INFO_TS_INVALIDATE: u8 = 0x02;
/// DATA: inline QoS present.
pub const FLAG_DATA_INLINE_QOS: u8 = 0x02;
/// DATA: serialized data present.
pub const FLAG_DATA_PAYLOAD: u8 = 0x04;
/// DATA: serialized key present.
pub const FLAG_DATA_KEY: u8 = 0x08;
/// DATA_FRAG: inline QoS present.
pub const FLAG_DATA_FRAG_INLINE_QOS: u8 = 0x02;
/// DATA_FRAG: fragments carry the serialized key.
pub const FLAG_DATA_FRAG_KEY: u8 = 0x04;

// ============================================================================
// Inline QoS parameter ids
// ============================================================================

/// End of a parameter list.
pub const PID_SENTINEL: u16 = 0x0001;
/// Padding parameter.
pub const PID_PAD: u16 = 0x0000;
/// 16-byte instance key hash.
pub const PID_KEY_HASH: u16 = 0x0070;
/// Dispose/unregister status flags.
pub const PID_STATUS_INFO: u16 = 0x0071;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while encoding submessages or messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A submessage body does not fit the 16-bit length field.
    SubmessageTooLarge(usize),
    /// A single submessage group exceeds the maximum message size.
    MessageTooLarge {
        /// Bytes required.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Invalid parameter provided.
    InvalidParameter(&'static str),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubmessageTooLarge(len) => {
                write!(f, "submessage body of {} bytes exceeds 65535", len)
            }
            Self::MessageTooLarge { size, max } => {
                write!(f, "message of {} bytes exceeds maximum {}", size, max)
            }
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Errors that can occur while decoding messages or submessages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before the structure was complete.
    Truncated {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
    /// Message does not start with a valid RTPS header.
    InvalidHeader(&'static str),
    /// A field holds a value outside its legal range.
    InvalidField(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated: need {} bytes, have {}", needed, available)
            }
            Self::InvalidHeader(msg) => write!(f, "invalid RTPS header: {}", msg),
            Self::InvalidField(msg) => write!(f, "invalid field: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for encoding operations.
pub type EncodeResult<T> = Result<T, EncodeError>;
/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
