// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Types shared by writers and readers: the discovery match descriptor and the
//! collaborators an endpoint is built with.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{RuntimeConfig, DEFAULT_LIVELINESS_LEASE_MS};
use crate::core::rt::{ChangePool, PayloadPool};
use crate::core::{Locator, GUID};
use crate::persistence::SequenceStore;
use crate::qos::{Durability, QosProfile, Reliability};
use crate::transport::Transport;

/// What discovery knows about a matched remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpointDescriptor {
    pub guid: GUID,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub reliability: Reliability,
    pub durability: Durability,
    /// Liveliness lease announced by a remote writer (ignored for readers).
    pub liveliness_lease: Duration,
}

impl RemoteEndpointDescriptor {
    /// Descriptor with the QoS of `qos` and one unicast locator.
    pub fn new(guid: GUID, locator: Locator, qos: &QosProfile) -> Self {
        Self {
            guid,
            unicast_locators: vec![locator],
            multicast_locators: Vec::new(),
            reliability: qos.reliability,
            durability: qos.durability,
            liveliness_lease: Duration::from_millis(DEFAULT_LIVELINESS_LEASE_MS),
        }
    }

    #[must_use]
    pub fn with_liveliness_lease(mut self, lease: Duration) -> Self {
        self.liveliness_lease = lease;
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability == Reliability::Reliable
    }

    /// Locators to send to: unicast when known, multicast otherwise.
    pub fn destinations(&self) -> &[Locator] {
        if self.unicast_locators.is_empty() {
            &self.multicast_locators
        } else {
            &self.unicast_locators
        }
    }
}

/// How a writer pushes data to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// `write()` sends on the calling thread.
    #[default]
    Synchronous,
    /// `write()` only enqueues; the participant's delivery thread sends.
    Asynchronous,
}

/// Collaborators shared by the endpoints of one participant.
#[derive(Clone)]
pub struct EndpointContext {
    pub transport: Arc<dyn Transport>,
    pub config: RuntimeConfig,
    pub payload_pool: Arc<PayloadPool>,
    pub change_pool: Arc<ChangePool>,
    /// Locators remote endpoints use to reach this participant.
    pub unicast_locators: Vec<Locator>,
    pub sequence_store: Option<Arc<dyn SequenceStore>>,
}
