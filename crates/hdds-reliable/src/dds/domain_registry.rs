// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Domain registry: the table of participants living in this process.
//!
//! The registry is an explicit object rather than a process-wide static:
//! each test or application creates its own with [`DomainRegistry::init`],
//! hands an `Arc` to the participants it creates and tears it down with
//! [`DomainRegistry::shutdown`].
//!
//! # Architecture
//!
//! ```text
//! DomainRegistry (one per application / test)
//! +-- active: AtomicBool
//! +-- participants: RwLock<HashMap<GuidPrefix, ParticipantEntry>>
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::core::{GuidPrefix, Locator};
use crate::dds::{Error, Result};

/// Domain ID type (0-232 per DDS spec)
pub type DomainId = u32;

/// One registered participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEntry {
    pub guid_prefix: GuidPrefix,
    pub domain_id: DomainId,
    /// Locators on which the participant receives.
    pub unicast_locators: Vec<Locator>,
    pub registered_at: Instant,
}

/// Participants of all domains known to this process.
#[derive(Debug)]
pub struct DomainRegistry {
    active: AtomicBool,
    participants: RwLock<HashMap<GuidPrefix, ParticipantEntry>>,
}

impl DomainRegistry {
    /// Create an active registry.
    pub fn init() -> Arc<Self> {
        log::debug!("[registry] init");
        Arc::new(Self {
            active: AtomicBool::new(true),
            participants: RwLock::new(HashMap::new()),
        })
    }

    /// Drop every entry and refuse further registrations.
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let count = {
                let mut participants = self.participants.write();
                let count = participants.len();
                participants.clear();
                count
            };
            log::debug!("[registry] shutdown ({} participants dropped)", count);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Register a participant. Fails after shutdown or on a duplicate prefix.
    pub fn register(
        &self,
        domain_id: DomainId,
        guid_prefix: GuidPrefix,
        unicast_locators: Vec<Locator>,
    ) -> Result<()> {
        if !self.is_active() {
            return Err(Error::InvalidState("domain registry shut down".to_string()));
        }
        let mut participants = self.participants.write();
        if participants.contains_key(&guid_prefix) {
            return Err(Error::InvalidState(format!(
                "participant {:02x?} already registered",
                guid_prefix
            )));
        }
        participants.insert(
            guid_prefix,
            ParticipantEntry {
                guid_prefix,
                domain_id,
                unicast_locators,
                registered_at: Instant::now(),
            },
        );
        log::debug!("[registry] domain {} + {:02x?}", domain_id, guid_prefix);
        Ok(())
    }

    /// Remove a participant. False if unknown.
    pub fn unregister(&self, guid_prefix: &GuidPrefix) -> bool {
        let removed = self.participants.write().remove(guid_prefix).is_some();
        if removed {
            log::debug!("[registry] - {:02x?}", guid_prefix);
        }
        removed
    }

    pub fn lookup(&self, guid_prefix: &GuidPrefix) -> Option<ParticipantEntry> {
        self.participants.read().get(guid_prefix).cloned()
    }

    /// Participants of `domain_id`, ordered by registration time.
    pub fn participants(&self, domain_id: DomainId) -> Vec<ParticipantEntry> {
        let mut entries: Vec<_> = self
            .participants
            .read()
            .values()
            .filter(|e| e.domain_id == domain_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.registered_at);
        entries
    }

    pub fn participant_count(&self) -> usize {
        self.participants.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_unregister() {
        let registry = DomainRegistry::init();
        registry
            .register(0, [1; 12], vec![Locator::udpv4([127, 0, 0, 1], 7400)])
            .expect("register");
        registry.register(1, [2; 12], Vec::new()).expect("register");

        assert_eq!(registry.participants(0).len(), 1);
        assert_eq!(registry.lookup(&[2; 12]).map(|e| e.domain_id), Some(1));
        assert!(registry.register(0, [1; 12], Vec::new()).is_err());

        assert!(registry.unregister(&[1; 12]));
        assert!(!registry.unregister(&[1; 12]));
        assert!(registry.participants(0).is_empty());
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = DomainRegistry::init();
        let b = DomainRegistry::init();
        a.register(0, [1; 12], Vec::new()).expect("register");
        assert_eq!(a.participant_count(), 1);
        assert_eq!(b.participant_count(), 0);
    }

    #[test]
    fn test_shutdown_refuses_registration() {
        let registry = DomainRegistry::init();
        registry.register(0, [1; 12], Vec::new()).expect("register");
        registry.shutdown();
        assert!(!registry.is_active());
        assert_eq!(registry.participant_count(), 0);
        assert!(matches!(
            registry.register(0, [3; 12], Vec::new()),
            Err(Error::InvalidState(_))
        ));
    }
}
