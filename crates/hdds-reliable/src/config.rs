// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration - single source of truth for protocol constants and timing.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time RTPS constants (header, vendor, sizes)
//! - **Level 2 (Dynamic)**: [`RuntimeConfig`] holding the reliability timing
//!   (atomically swappable) and free-form key/value overrides
//!
//! # Example
//!
//! ```
//! use hdds_reliable::config::RuntimeConfig;
//! use std::time::Duration;
//!
//! let config = RuntimeConfig::new();
//! config.set("reliability.heartbeat_period_ms", "20");
//! config.apply_overrides();
//! assert_eq!(config.timing().heartbeat_period, Duration::from_millis(20));
//! ```

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

// =======================================================================
// RTPS message constants (OMG DDS-RTPS v2.3 Sec.8.3.3 / Sec.9.4)
// =======================================================================

/// RTPS protocol magic.
pub const RTPS_MAGIC: [u8; 4] = *b"RTPS";

/// RTPS protocol version emitted in message headers (2.3).
pub const PROTOCOL_VERSION: [u8; 2] = [2, 3];

/// HDDS vendor id.
pub const HDDS_VENDOR_ID: [u8; 2] = [0x01, 0xAA];

/// RTPS message header length.
pub const RTPS_HEADER_LEN: usize = 20;

/// Submessage header length.
pub const SUBMESSAGE_HEADER_LEN: usize = 4;

/// Default maximum RTPS message size (fits a UDP datagram).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_000;

/// Default fragment size for samples that do not fit a single DATA.
pub const DEFAULT_FRAGMENT_SIZE: usize = 64_000;

/// Maximum number of bits in a SequenceNumberSet bitmap.
pub const MAX_BITMAP_BITS: u32 = 256;

// =======================================================================
// Reliability timing defaults
// =======================================================================

/// Default heartbeat period in milliseconds.
pub const DEFAULT_HEARTBEAT_PERIOD_MS: u64 = 100;
/// Default delay before the writer answers a NACK.
pub const DEFAULT_NACK_RESPONSE_DELAY_MS: u64 = 5;
/// Default window during which NACKs for freshly sent changes are ignored.
pub const DEFAULT_NACK_SUPPRESSION_MS: u64 = 0;
/// Default delay before the reader answers a HEARTBEAT.
pub const DEFAULT_HEARTBEAT_RESPONSE_DELAY_MS: u64 = 5;
/// Default delay of the preemptive ACKNACK sent on match.
pub const DEFAULT_INITIAL_ACKNACK_DELAY_MS: u64 = 70;
/// Default fixed period between repeated ACKNACKs while changes are missing.
pub const DEFAULT_ACKNACK_RETRY_MS: u64 = 100;
/// Default liveliness lease announced for remote writers.
pub const DEFAULT_LIVELINESS_LEASE_MS: u64 = 30_000;

// =======================================================================
// Override keys
// =======================================================================

/// Override key: heartbeat period (ms).
pub const KEY_HEARTBEAT_PERIOD_MS: &str = "reliability.heartbeat_period_ms";
/// Override key: NACK response delay (ms).
pub const KEY_NACK_RESPONSE_DELAY_MS: &str = "reliability.nack_response_delay_ms";
/// Override key: NACK suppression duration (ms).
pub const KEY_NACK_SUPPRESSION_MS: &str = "reliability.nack_suppression_ms";
/// Override key: heartbeat response delay (ms).
pub const KEY_HEARTBEAT_RESPONSE_DELAY_MS: &str = "reliability.heartbeat_response_delay_ms";
/// Override key: initial ACKNACK delay (ms).
pub const KEY_INITIAL_ACKNACK_DELAY_MS: &str = "reliability.initial_acknack_delay_ms";
/// Override key: ACKNACK retry period (ms).
pub const KEY_ACKNACK_RETRY_MS: &str = "reliability.acknack_retry_ms";

/// Prefix of environment variables read by [`RuntimeConfig::from_env`].
pub const ENV_PREFIX: &str = "HDDS_RELIABLE_";

/// Timing knobs of the HEARTBEAT/ACKNACK protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliabilityTiming {
    /// Period of writer HEARTBEATs while readers have unacknowledged changes.
    pub heartbeat_period: Duration,
    /// Delay between receiving a NACK and sending the repair.
    pub nack_response_delay: Duration,
    /// NACKs for changes sent less than this long ago are ignored.
    pub nack_suppression_duration: Duration,
    /// Delay between a non-final HEARTBEAT and the ACKNACK answering it.
    pub heartbeat_response_delay: Duration,
    /// Delay of the preemptive ACKNACK sent when a writer is matched.
    pub initial_acknack_delay: Duration,
    /// Fixed delay between repeated ACKNACKs while changes stay missing.
    pub acknack_retry_period: Duration,
}

impl Default for ReliabilityTiming {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_millis(DEFAULT_HEARTBEAT_PERIOD_MS),
            nack_response_delay: Duration::from_millis(DEFAULT_NACK_RESPONSE_DELAY_MS),
            nack_suppression_duration: Duration::from_millis(DEFAULT_NACK_SUPPRESSION_MS),
            heartbeat_response_delay: Duration::from_millis(DEFAULT_HEARTBEAT_RESPONSE_DELAY_MS),
            initial_acknack_delay: Duration::from_millis(DEFAULT_INITIAL_ACKNACK_DELAY_MS),
            acknack_retry_period: Duration::from_millis(DEFAULT_ACKNACK_RETRY_MS),
        }
    }
}

impl ReliabilityTiming {
    /// Aggressive timing for tests and loopback deployments.
    pub fn fast() -> Self {
        Self {
            heartbeat_period: Duration::from_millis(10),
            nack_response_delay: Duration::ZERO,
            nack_suppression_duration: Duration::ZERO,
            heartbeat_response_delay: Duration::ZERO,
            initial_acknack_delay: Duration::from_millis(5),
            acknack_retry_period: Duration::from_millis(10),
        }
    }
}

/// Runtime configuration shared by a participant and its endpoints.
#[derive(Clone)]
pub struct RuntimeConfig {
    timing: Arc<ArcSwap<ReliabilityTiming>>,
    overrides: Arc<DashMap<Arc<str>, Arc<str>>>,
}

impl RuntimeConfig {
    /// Config with default timing and no overrides.
    pub fn new() -> Self {
        Self::with_timing(ReliabilityTiming::default())
    }

    /// Config with explicit timing.
    pub fn with_timing(timing: ReliabilityTiming) -> Self {
        Self {
            timing: Arc::new(ArcSwap::from_pointee(timing)),
            overrides: Arc::new(DashMap::new()),
        }
    }

    /// Config seeded from `HDDS_RELIABLE_*` environment variables.
    ///
    /// `HDDS_RELIABLE_HEARTBEAT_PERIOD_MS=50` maps to `reliability.heartbeat_period_ms`.
    pub fn from_env() -> Self {
        let config = Self::new();
        for (name, value) in std::env::vars() {
            if let Some(suffix) = name.strip_prefix(ENV_PREFIX) {
                let key = format!("reliability.{}", suffix.to_ascii_lowercase());
                config.set(&key, &value);
            }
        }
        config.apply_overrides();
        config
    }

    /// Current timing snapshot (lock-free).
    pub fn timing(&self) -> ReliabilityTiming {
        **self.timing.load()
    }

    /// Replace the timing; running endpoints pick it up on their next tick.
    pub fn set_timing(&self, timing: ReliabilityTiming) {
        self.timing.store(Arc::new(timing));
    }

    /// Set an override value.
    pub fn set(&self, key: &str, value: &str) {
        self.overrides.insert(Arc::from(key), Arc::from(value));
    }

    /// Get an override value.
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        self.overrides.get(key).map(|v| Arc::clone(v.value()))
    }

    /// All overrides whose key starts with `prefix`.
    pub fn search_prefix(&self, prefix: &str) -> Vec<(Arc<str>, Arc<str>)> {
        self.overrides
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (Arc::clone(entry.key()), Arc::clone(entry.value())))
            .collect()
    }

    /// Fold the millisecond overrides into the timing.
    ///
    /// Unparsable values are logged and skipped.
    pub fn apply_overrides(&self) {
        let mut timing = self.timing();
        let fields: [(&str, &mut Duration); 6] = [
            (KEY_HEARTBEAT_PERIOD_MS, &mut timing.heartbeat_period),
            (KEY_NACK_RESPONSE_DELAY_MS, &mut timing.nack_response_delay),
            (KEY_NACK_SUPPRESSION_MS, &mut timing.nack_suppression_duration),
            (KEY_HEARTBEAT_RESPONSE_DELAY_MS, &mut timing.heartbeat_response_delay),
            (KEY_INITIAL_ACKNACK_DELAY_MS, &mut timing.initial_acknack_delay),
            (KEY_ACKNACK_RETRY_MS, &mut timing.acknack_retry_period),
        ];
        for (key, slot) in fields {
            if let Some(value) = self.get(key) {
                match value.trim().parse::<u64>() {
                    Ok(ms) => *slot = Duration::from_millis(ms),
                    Err(e) => log::warn!("[config] ignoring {}={:?}: {}", key, value, e),
                }
            }
        }
        self.set_timing(timing);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("timing", &self.timing())
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = RuntimeConfig::new();
        assert_eq!(config.timing().heartbeat_period, Duration::from_millis(100));
        assert_eq!(config.timing().acknack_retry_period, Duration::from_millis(100));
    }

    #[test]
    fn test_overrides_apply_to_timing() {
        let config = RuntimeConfig::new();
        config.set(KEY_NACK_RESPONSE_DELAY_MS, "0");
        config.set(KEY_ACKNACK_RETRY_MS, "25");
        config.apply_overrides();

        let timing = config.timing();
        assert_eq!(timing.nack_response_delay, Duration::ZERO);
        assert_eq!(timing.acknack_retry_period, Duration::from_millis(25));
    }

    #[test]
    fn test_bad_override_is_ignored() {
        let config = RuntimeConfig::new();
        config.set(KEY_HEARTBEAT_PERIOD_MS, "soon");
        config.apply_overrides();
        assert_eq!(config.timing().heartbeat_period, Duration::from_millis(100));
    }

    #[test]
    fn test_search_prefix() {
        let config = RuntimeConfig::new();
        config.set("reliability.a", "1");
        config.set("reliability.b", "2");
        config.set("other.c", "3");
        assert_eq!(config.search_prefix("reliability.").len(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let config = RuntimeConfig::new();
        let clone = config.clone();
        clone.set_timing(ReliabilityTiming::fast());
        assert_eq!(config.timing(), ReliabilityTiming::fast());
    }
}
