// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS policies consumed by the reliability engine.
//!
//! # Supported Policies
//!
//! - **Reliability**: BestEffort (fire-and-forget) or Reliable (HEARTBEAT/ACKNACK repair)
//! - **History**: KeepLast(n) per instance, KeepAll within ResourceLimits
//! - **Durability**: Volatile, TransientLocal, Persistent (late-joiner replay)
//! - **DestinationOrder**: ByReceptionTimestamp only
//! - **ResourceLimits**: max_samples, max_instances, max_samples_per_instance, max_quota_bytes
//! - **max_blocking_time**: upper bound for a blocked `write()`
//!
//! # Examples
//!
//! ```
//! use hdds_reliable::qos::{History, QosProfile, ResourceLimits};
//!
//! let qos = QosProfile {
//!     history: History::KeepAll,
//!     resource_limits: ResourceLimits {
//!         max_samples: 3,
//!         ..Default::default()
//!     },
//!     ..QosProfile::reliable()
//! };
//! assert!(qos.validate().is_ok());
//! ```

use std::time::Duration;

/// Special value meaning "no limit" (DDS LENGTH_UNLIMITED).
pub const LENGTH_UNLIMITED: usize = usize::MAX;

/// Default `max_blocking_time` for reliable writers (DDS default: 100 ms).
pub const DEFAULT_MAX_BLOCKING_TIME: Duration = Duration::from_millis(100);

/// QoS Profile - collection of policies for a writer or reader
///
/// Validated at endpoint creation (fail-fast on invalid config).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QosProfile {
    /// Reliability policy
    pub reliability: Reliability,
    /// History policy (KeepLast or KeepAll)
    pub history: History,
    /// Durability policy
    pub durability: Durability,
    /// Destination order policy
    pub destination_order: DestinationOrder,
    /// Resource limits (queue sizes, instances)
    pub resource_limits: ResourceLimits,
    /// Maximum time a `write()` may block on a full history
    pub max_blocking_time: Duration,
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            history: History::KeepLast(10),
            durability: Durability::Volatile,
            destination_order: DestinationOrder::ByReceptionTimestamp,
            resource_limits: ResourceLimits::default(),
            max_blocking_time: DEFAULT_MAX_BLOCKING_TIME,
        }
    }
}

impl QosProfile {
    /// Reliable, volatile, KeepLast(10).
    #[must_use]
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::Reliable,
            ..Default::default()
        }
    }

    /// Best-effort, volatile, KeepLast(10).
    #[must_use]
    pub fn best_effort() -> Self {
        Self::default()
    }

    /// Reliable + TransientLocal: late joiners get the retained history.
    #[must_use]
    pub fn transient_local() -> Self {
        Self {
            reliability: Reliability::Reliable,
            durability: Durability::TransientLocal,
            ..Default::default()
        }
    }

    /// Builder-style KeepLast depth.
    #[must_use]
    pub fn keep_last(mut self, depth: u32) -> Self {
        self.history = History::KeepLast(depth);
        self
    }

    /// Builder-style KeepAll with `max_samples`.
    #[must_use]
    pub fn keep_all(mut self, max_samples: usize) -> Self {
        self.history = History::KeepAll;
        self.resource_limits.max_samples = max_samples;
        self
    }

    /// Builder-style `max_blocking_time`.
    #[must_use]
    pub fn max_blocking_time(mut self, duration: Duration) -> Self {
        self.max_blocking_time = duration;
        self
    }

    /// True for `Reliability::Reliable`.
    pub fn is_reliable(&self) -> bool {
        self.reliability == Reliability::Reliable
    }

    /// Per-instance depth implied by the history policy and resource limits.
    pub fn depth_per_instance(&self) -> usize {
        match self.history {
            History::KeepLast(depth) => (depth as usize).min(self.resource_limits.max_samples_per_instance),
            History::KeepAll => self.resource_limits.max_samples_per_instance,
        }
    }

    /// Validate QoS configuration
    ///
    /// # Validation Rules
    ///
    /// - History::KeepLast(n) where n > 0
    /// - History::KeepAll requires ResourceLimits.max_samples > 0
    /// - max_samples >= max_samples_per_instance (both finite)
    /// - KeepLast depth <= max_samples_per_instance
    /// - DestinationOrder::BySourceTimestamp is rejected
    pub fn validate(&self) -> Result<(), String> {
        match self.history {
            History::KeepLast(0) => {
                return Err("History::KeepLast(n) requires n > 0".to_string());
            }
            History::KeepAll => {
                if self.resource_limits.max_samples == 0 {
                    return Err(
                        "History::KeepAll requires ResourceLimits.max_samples > 0".to_string()
                    );
                }
            }
            History::KeepLast(depth) => {
                let rl = &self.resource_limits;
                if rl.max_samples_per_instance != LENGTH_UNLIMITED
                    && depth as usize > rl.max_samples_per_instance
                {
                    return Err(format!(
                        "History::KeepLast({}) exceeds max_samples_per_instance ({})",
                        depth, rl.max_samples_per_instance
                    ));
                }
            }
        }

        let rl = &self.resource_limits;
        if rl.max_samples == 0 {
            return Err("ResourceLimits.max_samples must be > 0".to_string());
        }
        if rl.max_samples != LENGTH_UNLIMITED
            && rl.max_samples_per_instance != LENGTH_UNLIMITED
            && rl.max_samples < rl.max_samples_per_instance
        {
            return Err(format!(
                "max_samples ({}) must be >= max_samples_per_instance ({})",
                rl.max_samples, rl.max_samples_per_instance
            ));
        }

        if self.destination_order == DestinationOrder::BySourceTimestamp {
            return Err("BY_SOURCE_TIMESTAMP DestinationOrder not supported".to_string());
        }

        Ok(())
    }
}

/// Reliability policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Reliability {
    /// Fire-and-forget (no ACKs, no retransmission)
    #[default]
    BestEffort,
    /// Reliable delivery with HEARTBEAT/ACKNACK-driven retransmission
    Reliable,
}

/// History policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum History {
    /// Keep last N samples per instance (oldest evicted first)
    KeepLast(u32),
    /// Keep all samples within resource limits; inserts wait or fail when full.
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(10)
    }
}

/// Durability policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, PartialOrd, Ord)]
pub enum Durability {
    /// Late joiners only see changes written after they matched.
    #[default]
    Volatile,
    /// Writer keeps retained changes for late joiners.
    TransientLocal,
    /// TransientLocal plus sequence state persisted through a `SequenceStore`.
    Persistent,
}

impl Durability {
    /// True when late joiners should receive retained changes.
    pub fn replays_history(self) -> bool {
        self >= Durability::TransientLocal
    }
}

/// Destination order policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DestinationOrder {
    /// Per-writer sequence order as received.
    #[default]
    ByReceptionTimestamp,
    /// Cross-writer ordering by source timestamp (not supported).
    BySourceTimestamp,
}

/// Resource limits for writer/reader histories
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum total samples across all instances
    pub max_samples: usize,
    /// Maximum instances (LENGTH_UNLIMITED = no limit)
    pub max_instances: usize,
    /// Maximum samples per instance (LENGTH_UNLIMITED = no limit)
    pub max_samples_per_instance: usize,
    /// Maximum total payload bytes held by the history
    pub max_quota_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 5000,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
            max_quota_bytes: 100_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_default() {
        let qos = QosProfile::default();

        assert_eq!(qos.reliability, Reliability::BestEffort);
        assert_eq!(qos.history, History::KeepLast(10));
        assert_eq!(qos.durability, Durability::Volatile);
        assert_eq!(qos.max_blocking_time, Duration::from_millis(100));
        assert!(qos.validate().is_ok());
    }

    #[test]
    fn test_qos_validate_invalid_history_zero() {
        let qos = QosProfile::default().keep_last(0);
        let err = qos.validate().unwrap_err();
        assert!(err.contains("History::KeepLast(n) requires n > 0"));
    }

    #[test]
    fn test_qos_validate_keep_all_requires_limits() {
        let qos = QosProfile::reliable().keep_all(0);
        let err = qos.validate().unwrap_err();
        assert!(err.contains("History::KeepAll requires ResourceLimits.max_samples > 0"));
    }

    #[test]
    fn test_qos_validate_depth_above_instance_limit() {
        let mut qos = QosProfile::reliable().keep_last(20);
        qos.resource_limits.max_samples_per_instance = 5;
        assert!(qos.validate().is_err());
    }

    #[test]
    fn test_qos_validate_samples_below_instance_limit() {
        let qos = QosProfile {
            history: History::KeepAll,
            resource_limits: ResourceLimits {
                max_samples: 10,
                max_instances: 5,
                max_samples_per_instance: 20,
                max_quota_bytes: 10_000_000,
            },
            ..Default::default()
        };
        assert!(qos.validate().unwrap_err().contains("max_samples"));
    }

    #[test]
    fn test_by_source_timestamp_rejected() {
        let qos = QosProfile {
            destination_order: DestinationOrder::BySourceTimestamp,
            ..Default::default()
        };
        assert!(qos.validate().unwrap_err().contains("BY_SOURCE_TIMESTAMP"));
    }

    #[test]
    fn test_depth_per_instance() {
        assert_eq!(QosProfile::reliable().keep_last(4).depth_per_instance(), 4);
        assert_eq!(
            QosProfile::reliable().keep_all(3).depth_per_instance(),
            LENGTH_UNLIMITED
        );
    }

    #[test]
    fn test_durability_replays_history() {
        assert!(!Durability::Volatile.replays_history());
        assert!(Durability::TransientLocal.replays_history());
        assert!(Durability::Persistent.replays_history());
    }
}
