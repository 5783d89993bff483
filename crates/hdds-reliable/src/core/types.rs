// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS identity and value types shared by every layer.
//!
//! - [`GUID`]: 12-byte prefix + 4-byte entity id
//! - [`SequenceNumber`]: per-writer 64-bit counter, 0 reserved as "unknown"
//! - [`InstanceHandle`]: 16-byte key hash, all zeros for unkeyed topics
//! - [`Timestamp`]: nanoseconds since UNIX epoch, RTPS `Time_t` on the wire
//! - [`Locator`]: transport address handed to the [`Transport`](crate::transport::Transport)

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// GUID prefix length (12 bytes).
pub const GUID_PREFIX_LEN: usize = 12;
/// Entity ID length (4 bytes).
pub const ENTITY_ID_LEN: usize = 4;

/// Participant GUID prefix.
pub type GuidPrefix = [u8; GUID_PREFIX_LEN];

/// RTPS Entity ID (3-byte key + 1-byte kind).
pub type EntityId = [u8; ENTITY_ID_LEN];

/// ENTITYID_UNKNOWN: addresses every matching endpoint.
pub const ENTITYID_UNKNOWN: EntityId = [0x00, 0x00, 0x00, 0x00];
/// ENTITYID_PARTICIPANT.
pub const ENTITYID_PARTICIPANT: EntityId = [0x00, 0x00, 0x01, 0xC1];

/// Entity kind: user-defined writer with key.
pub const ENTITY_KIND_USER_WRITER_WITH_KEY: u8 = 0x02;
/// Entity kind: user-defined writer without key.
pub const ENTITY_KIND_USER_WRITER_NO_KEY: u8 = 0x03;
/// Entity kind: user-defined reader without key.
pub const ENTITY_KIND_USER_READER_NO_KEY: u8 = 0x04;
/// Entity kind: user-defined reader with key.
pub const ENTITY_KIND_USER_READER_WITH_KEY: u8 = 0x07;

/// Unknown GUID prefix (all zeros).
pub const GUIDPREFIX_UNKNOWN: GuidPrefix = [0; GUID_PREFIX_LEN];

/// RTPS GUID (Globally Unique Identifier)
///
/// # Display Format
/// Hex with dots: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GUID {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl GUID {
    /// Create GUID from separate prefix and entity ID
    pub const fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// Create GUID from raw bytes (16 bytes total)
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        let mut entity_id = [0u8; ENTITY_ID_LEN];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self { prefix, entity_id }
    }

    /// Convert GUID to 16-byte array
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix);
        bytes[12..16].copy_from_slice(&self.entity_id);
        bytes
    }

    /// GUID with all zeros (invalid/placeholder)
    pub const fn unknown() -> Self {
        Self {
            prefix: GUIDPREFIX_UNKNOWN,
            entity_id: ENTITYID_UNKNOWN,
        }
    }

    /// Check if GUID is zero (invalid)
    pub fn is_unknown(&self) -> bool {
        self.prefix == GUIDPREFIX_UNKNOWN && self.entity_id == ENTITYID_UNKNOWN
    }
}

impl fmt::Display for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.prefix.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        for byte in &self.entity_id {
            write!(f, ".{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GUID({})", self)
    }
}

/// Build a user endpoint entity id from a 24-bit key and an entity kind.
pub fn user_entity_id(key: u32, kind: u8) -> EntityId {
    let k = key.to_be_bytes();
    [k[1], k[2], k[3], kind]
}

// ============================================================================
// Sequence numbers
// ============================================================================

/// Per-writer sequence number. First valid value is 1.
pub type SequenceNumber = u64;

/// Reserved "unknown" sequence number, never assigned to a change.
pub const SEQUENCENUMBER_UNKNOWN: SequenceNumber = 0;

/// Split a sequence number into its RTPS wire halves (`high: i32`, `low: u32`).
#[inline]
pub fn seq_to_wire(seq: SequenceNumber) -> (i32, u32) {
    ((seq >> 32) as i32, seq as u32)
}

/// Join RTPS wire halves into a sequence number. Negative values map to `None`.
#[inline]
pub fn seq_from_wire(high: i32, low: u32) -> Option<SequenceNumber> {
    if high < 0 {
        return None;
    }
    Some(((high as u64) << 32) | u64::from(low))
}

// ============================================================================
// Instance handle
// ============================================================================

/// Instance identity (16-byte key hash).
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    /// Sentinel used by unkeyed topics.
    pub const NIL: InstanceHandle = InstanceHandle([0; 16]);

    /// Handle from a raw key hash.
    pub const fn from_key_hash(hash: [u8; 16]) -> Self {
        Self(hash)
    }

    /// Handle from a small integer key (tests, simple keyed topics).
    pub fn from_u64(key: u64) -> Self {
        let mut hash = [0u8; 16];
        hash[8..].copy_from_slice(&key.to_be_bytes());
        Self(hash)
    }

    /// True for the unkeyed sentinel.
    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "InstanceHandle(NIL)");
        }
        write!(f, "InstanceHandle(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Change kind
// ============================================================================

/// Kind of a cache change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeKind {
    /// Regular sample carrying data.
    #[default]
    Alive,
    /// Instance disposed by the writer.
    NotAliveDisposed,
    /// Instance unregistered by the writer.
    NotAliveUnregistered,
}

impl ChangeKind {
    /// PID_STATUS_INFO flags for this kind (0 for `Alive`).
    pub fn status_info(self) -> u32 {
        match self {
            ChangeKind::Alive => 0,
            ChangeKind::NotAliveDisposed => 0x1,
            ChangeKind::NotAliveUnregistered => 0x2,
        }
    }

    /// Kind from PID_STATUS_INFO flags. Disposed wins when both bits are set.
    pub fn from_status_info(flags: u32) -> Self {
        if flags & 0x1 != 0 {
            ChangeKind::NotAliveDisposed
        } else if flags & 0x2 != 0 {
            ChangeKind::NotAliveUnregistered
        } else {
            ChangeKind::Alive
        }
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// Point in time, nanoseconds since UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    nanos: u64,
}

impl Timestamp {
    /// Timestamp from current system time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| {
                log::debug!("[time] System time before UNIX epoch, using timestamp 0");
                Duration::from_secs(0)
            });

        Self {
            nanos: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Timestamp from nanoseconds since UNIX epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Nanoseconds since UNIX epoch.
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Timestamp from RTPS `Time_t` (seconds + 2^-32 fraction).
    pub fn from_rtps(seconds: i32, fraction: u32) -> Self {
        let secs = u64::try_from(seconds).unwrap_or(0);
        let nanos_from_fraction = (u64::from(fraction) * 1_000_000_000) >> 32;
        Self {
            nanos: secs * 1_000_000_000 + nanos_from_fraction,
        }
    }

    /// Convert to RTPS `Time_t` (seconds, fraction). Seconds clamp at `i32::MAX`.
    pub fn to_rtps(&self) -> (i32, u32) {
        let seconds = i32::try_from(self.nanos / 1_000_000_000).unwrap_or_else(|_| {
            log::debug!("[time] Timestamp {}ns exceeds RTPS seconds range; clamping", self.nanos);
            i32::MAX
        });
        let remainder = self.nanos % 1_000_000_000;
        // remainder < 1e9, so (remainder << 32) / 1e9 < 2^32
        let fraction = ((remainder << 32) / 1_000_000_000) as u32;
        (seconds, fraction)
    }
}

// ============================================================================
// Locator
// ============================================================================

/// Locator kind: UDPv4.
pub const LOCATOR_KIND_UDPV4: i32 = 1;
/// Locator kind: UDPv6.
pub const LOCATOR_KIND_UDPV6: i32 = 2;

/// Transport address (RTPS `Locator_t`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    /// UDPv4 locator.
    pub fn udpv4(ip: [u8; 4], port: u16) -> Self {
        let mut address = [0u8; 16];
        address[12..16].copy_from_slice(&ip);
        Self {
            kind: LOCATOR_KIND_UDPV4,
            port: u32::from(port),
            address,
        }
    }

    /// Locator from a socket address.
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(v4) => Self::udpv4(v4.octets(), addr.port()),
            IpAddr::V6(v6) => Self {
                kind: LOCATOR_KIND_UDPV6,
                port: u32::from(addr.port()),
                address: v6.octets(),
            },
        }
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LOCATOR_KIND_UDPV4 => write!(
                f,
                "UDPv4:{}.{}.{}.{}:{}",
                self.address[12], self.address[13], self.address[14], self.address[15], self.port
            ),
            _ => write!(f, "Locator(kind={}, port={})", self.kind, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_roundtrips_through_bytes() {
        let guid = GUID::new([1; 12], [0, 0, 1, 0x03]);
        assert_eq!(GUID::from_bytes(guid.as_bytes()), guid);
        assert!(!guid.is_unknown());
        assert!(GUID::unknown().is_unknown());
    }

    #[test]
    fn guid_display_is_dotted_hex() {
        let guid = GUID::new([0; 12], [0, 0, 1, 0xc1]);
        assert_eq!(
            guid.to_string(),
            "00.00.00.00.00.00.00.00.00.00.00.00.00.00.01.c1"
        );
    }

    #[test]
    fn sequence_wire_split() {
        let seq = (7u64 << 32) | 42;
        let (high, low) = seq_to_wire(seq);
        assert_eq!((high, low), (7, 42));
        assert_eq!(seq_from_wire(high, low), Some(seq));
        assert_eq!(seq_from_wire(-1, 0), None);
    }

    #[test]
    fn timestamp_rtps_conversion_keeps_subsecond_precision() {
        let ts = Timestamp::from_nanos(1_500_000_000);
        let (sec, frac) = ts.to_rtps();
        assert_eq!(sec, 1);
        assert_eq!(frac, 0x8000_0000);
        let back = Timestamp::from_rtps(sec, frac);
        assert_eq!(back.as_nanos(), 1_500_000_000);
    }

    #[test]
    fn status_info_maps_change_kinds() {
        for kind in [
            ChangeKind::Alive,
            ChangeKind::NotAliveDisposed,
            ChangeKind::NotAliveUnregistered,
        ] {
            assert_eq!(ChangeKind::from_status_info(kind.status_info()), kind);
        }
    }

    #[test]
    fn user_entity_id_layout() {
        assert_eq!(
            user_entity_id(0x0001_0203, ENTITY_KIND_USER_WRITER_NO_KEY),
            [0x01, 0x02, 0x03, 0x03]
        );
    }
}
