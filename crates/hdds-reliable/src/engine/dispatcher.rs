// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound submessage routing for one participant.
//!
//! DATA, DATA_FRAG, HEARTBEAT and GAP go to the addressed reader (every local
//! reader when `readerId` is `ENTITYID_UNKNOWN`); ACKNACK goes to the
//! addressed writer. Endpoints themselves ignore traffic from remote
//! endpoints they are not matched with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::core::types::ENTITYID_UNKNOWN;
use crate::core::{EntityId, GuidPrefix, Locator};
use crate::dds::Result;
use crate::protocol::{MessageReceiver, ReceivedSubmessage, Submessage};
use crate::reader::StatefulReader;
use crate::transport::ReceiveHandler;
use crate::writer::StatefulWriter;

/// Counters updated by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub messages: AtomicU64,
    pub malformed: AtomicU64,
    pub submessages_routed: AtomicU64,
    /// Submessages addressed to no registered endpoint.
    pub orphaned: AtomicU64,
}

/// Routes received messages to the participant's endpoints.
pub struct Dispatcher {
    receiver: MessageReceiver,
    writers: DashMap<EntityId, Weak<StatefulWriter>>,
    readers: DashMap<EntityId, Weak<StatefulReader>>,
    metrics: DispatchMetrics,
}

impl Dispatcher {
    pub fn new(local_prefix: GuidPrefix) -> Self {
        Self {
            receiver: MessageReceiver::new(local_prefix),
            writers: DashMap::new(),
            readers: DashMap::new(),
            metrics: DispatchMetrics::default(),
        }
    }

    pub fn register_writer(&self, writer: &Arc<StatefulWriter>) {
        self.writers
            .insert(writer.guid().entity_id, Arc::downgrade(writer));
    }

    pub fn register_reader(&self, reader: &Arc<StatefulReader>) {
        self.readers
            .insert(reader.guid().entity_id, Arc::downgrade(reader));
    }

    pub fn unregister_writer(&self, entity_id: EntityId) -> bool {
        self.writers.remove(&entity_id).is_some()
    }

    pub fn unregister_reader(&self, entity_id: EntityId) -> bool {
        self.readers.remove(&entity_id).is_some()
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Decode `buf` and hand each submessage to its endpoint.
    ///
    /// Returns the number of submessages routed to at least one endpoint.
    pub fn receive(&self, buf: &[u8]) -> Result<usize> {
        self.metrics.messages.fetch_add(1, Ordering::Relaxed);
        let submessages = match self.receiver.receive(buf) {
            Ok(submessages) => submessages,
            Err(e) => {
                self.metrics.malformed.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        let mut routed = 0;
        for received in &submessages {
            if self.route(received) {
                routed += 1;
            } else {
                self.metrics.orphaned.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.metrics
            .submessages_routed
            .fetch_add(routed as u64, Ordering::Relaxed);
        Ok(routed)
    }

    fn route(&self, received: &ReceivedSubmessage) -> bool {
        let source = received.source_prefix;
        match &received.submessage {
            Submessage::Data(data) => {
                self.for_readers(data.reader_id, |r| {
                    r.process_data(source, received.timestamp, data)
                })
            }
            Submessage::DataFrag(frag) => self.for_readers(frag.reader_id, |r| {
                r.process_data_frag(source, received.timestamp, frag)
            }),
            Submessage::Heartbeat(hb) => {
                self.for_readers(hb.reader_id, |r| r.process_heartbeat(source, hb))
            }
            Submessage::Gap(gap) => self.for_readers(gap.reader_id, |r| r.process_gap(source, gap)),
            Submessage::AckNack(acknack) => {
                let writer = self
                    .writers
                    .get(&acknack.writer_id)
                    .and_then(|entry| entry.value().upgrade());
                match writer {
                    Some(writer) => {
                        writer.process_acknack(source, acknack);
                        true
                    }
                    None => false,
                }
            }
            Submessage::InfoTs(_) | Submessage::InfoDst(_) | Submessage::Unknown(_) => false,
        }
    }

    /// Run `f` on the addressed reader, or on every reader for
    /// `ENTITYID_UNKNOWN`. Map guards are released before `f` runs.
    fn for_readers<F>(&self, reader_id: EntityId, f: F) -> bool
    where
        F: Fn(&StatefulReader),
    {
        let targets: Vec<Arc<StatefulReader>> = if reader_id == ENTITYID_UNKNOWN {
            self.readers
                .iter()
                .filter_map(|entry| entry.value().upgrade())
                .collect()
        } else {
            self.readers
                .get(&reader_id)
                .and_then(|entry| entry.value().upgrade())
                .into_iter()
                .collect()
        };
        for reader in &targets {
            f(reader);
        }
        !targets.is_empty()
    }
}

impl ReceiveHandler for Dispatcher {
    fn on_message(&self, source: &Locator, buf: &[u8]) {
        if let Err(e) = self.receive(buf) {
            log::debug!("[dispatch] dropping message from {:?}: {}", source, e);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("writers", &self.writers.len())
            .field("readers", &self.readers.len())
            .finish_non_exhaustive()
    }
}
