// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS participant: the factory for writers and readers of one GUID prefix.
//!
//! A participant owns the collaborators its endpoints share (transport,
//! runtime config, payload and change pools, optional sequence store), the
//! asynchronous delivery thread and the inbound [`Dispatcher`]. Discovery is
//! external: matches are announced to the endpoints with
//! `matched_reader_add` / `matched_writer_add`.
//!
//! # Example
//!
//! ```
//! use hdds_reliable::core::Locator;
//! use hdds_reliable::dds::DomainRegistry;
//! use hdds_reliable::endpoint::PublishMode;
//! use hdds_reliable::participant::RtpsParticipant;
//! use hdds_reliable::qos::QosProfile;
//! use hdds_reliable::transport::LoopbackNetwork;
//!
//! let registry = DomainRegistry::init();
//! let network = LoopbackNetwork::new();
//! let participant = RtpsParticipant::builder([1; 12])
//!     .domain_id(0)
//!     .build_loopback(&registry, &network, Locator::udpv4([127, 0, 0, 1], 7410))?;
//!
//! let writer = participant.create_writer(QosProfile::reliable(), PublishMode::Synchronous, None)?;
//! assert_eq!(writer.write(b"hello")?, 1);
//! # Ok::<(), hdds_reliable::dds::Error>(())
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crate::config::{ReliabilityTiming, RuntimeConfig};
use crate::core::rt::{ChangePool, PayloadPool, PoolConfig};
use crate::core::types::{
    user_entity_id, ENTITY_KIND_USER_READER_NO_KEY, ENTITY_KIND_USER_WRITER_NO_KEY,
};
use crate::core::{GuidPrefix, Locator, GUID};
use crate::dds::{DomainId, DomainRegistry, ReaderListener, Result, WriterListener};
use crate::endpoint::{EndpointContext, PublishMode};
use crate::engine::{AsyncDeliveryScheduler, Dispatcher};
use crate::persistence::SequenceStore;
use crate::qos::QosProfile;
use crate::reader::StatefulReader;
use crate::transport::{LoopbackBinding, LoopbackNetwork, ReceiveHandler, Transport};
use crate::writer::StatefulWriter;

/// Builder for [`RtpsParticipant`].
pub struct ParticipantBuilder {
    guid_prefix: GuidPrefix,
    domain_id: DomainId,
    config: RuntimeConfig,
    pool_config: PoolConfig,
    change_pool_limits: (usize, usize),
    sequence_store: Option<Arc<dyn SequenceStore>>,
}

impl ParticipantBuilder {
    fn new(guid_prefix: GuidPrefix) -> Self {
        Self {
            guid_prefix,
            domain_id: 0,
            config: RuntimeConfig::new(),
            pool_config: PoolConfig::default(),
            change_pool_limits: (0, 0),
            sequence_store: None,
        }
    }

    #[must_use]
    pub fn domain_id(mut self, domain_id: DomainId) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Share an existing runtime config (and its timing) with this participant.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn timing(self, timing: ReliabilityTiming) -> Self {
        self.config.set_timing(timing);
        self
    }

    #[must_use]
    pub fn payload_pool(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    /// Change records kept ready (`initial`) and the cap (`max`, 0 = unbounded).
    #[must_use]
    pub fn change_pool(mut self, initial: usize, max: usize) -> Self {
        self.change_pool_limits = (initial, max);
        self
    }

    /// Persist writer sequence numbers and reader watermarks.
    #[must_use]
    pub fn sequence_store(mut self, store: Arc<dyn SequenceStore>) -> Self {
        self.sequence_store = Some(store);
        self
    }

    /// Build on an arbitrary transport. Inbound traffic must be fed to
    /// [`RtpsParticipant::dispatcher`] by the caller.
    pub fn build(
        self,
        registry: &Arc<DomainRegistry>,
        transport: Arc<dyn Transport>,
        unicast_locators: Vec<Locator>,
    ) -> Result<Arc<RtpsParticipant>> {
        self.assemble(registry, transport, unicast_locators)
            .map(Arc::new)
    }

    /// Build on `network`, receiving on `locator`.
    pub fn build_loopback(
        self,
        registry: &Arc<DomainRegistry>,
        network: &Arc<LoopbackNetwork>,
        locator: Locator,
    ) -> Result<Arc<RtpsParticipant>> {
        let transport = Arc::new(network.transport(locator));
        let mut participant = self.assemble(registry, transport, vec![locator])?;

        let handler: Arc<dyn ReceiveHandler> = participant.dispatcher.clone();
        let handler: Weak<dyn ReceiveHandler> = Arc::downgrade(&handler);
        participant.binding = Some(network.bind(locator, handler)?);
        Ok(Arc::new(participant))
    }

    fn assemble(
        self,
        registry: &Arc<DomainRegistry>,
        transport: Arc<dyn Transport>,
        unicast_locators: Vec<Locator>,
    ) -> Result<RtpsParticipant> {
        registry.register(self.domain_id, self.guid_prefix, unicast_locators.clone())?;

        let (initial, max) = self.change_pool_limits;
        let ctx = EndpointContext {
            transport,
            config: self.config,
            payload_pool: PayloadPool::new(self.pool_config),
            change_pool: Arc::new(ChangePool::new(initial, max)),
            unicast_locators,
            sequence_store: self.sequence_store,
        };

        log::debug!(
            "[participant] {:02x?} created in domain {}",
            self.guid_prefix,
            self.domain_id
        );
        Ok(RtpsParticipant {
            guid_prefix: self.guid_prefix,
            domain_id: self.domain_id,
            registry: Arc::clone(registry),
            ctx,
            dispatcher: Arc::new(Dispatcher::new(self.guid_prefix)),
            scheduler: AsyncDeliveryScheduler::new(),
            next_entity_key: AtomicU32::new(1),
            binding: None,
        })
    }
}

/// Endpoint factory for one GUID prefix in one domain.
pub struct RtpsParticipant {
    guid_prefix: GuidPrefix,
    domain_id: DomainId,
    registry: Arc<DomainRegistry>,
    ctx: EndpointContext,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<AsyncDeliveryScheduler>,
    next_entity_key: AtomicU32,
    binding: Option<LoopbackBinding>,
}

impl RtpsParticipant {
    pub fn builder(guid_prefix: GuidPrefix) -> ParticipantBuilder {
        ParticipantBuilder::new(guid_prefix)
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid_prefix
    }

    pub fn domain_id(&self) -> DomainId {
        self.domain_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.ctx.config
    }

    pub fn payload_pool(&self) -> &Arc<PayloadPool> {
        &self.ctx.payload_pool
    }

    pub fn change_pool(&self) -> &Arc<ChangePool> {
        &self.ctx.change_pool
    }

    /// Inbound entry point of this participant.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn unicast_locators(&self) -> &[Locator] {
        &self.ctx.unicast_locators
    }

    /// Create a writer. Asynchronous writers share the participant's
    /// delivery thread.
    pub fn create_writer(
        &self,
        qos: QosProfile,
        publish_mode: PublishMode,
        listener: Option<Arc<dyn WriterListener>>,
    ) -> Result<Arc<StatefulWriter>> {
        let guid = self.next_guid(ENTITY_KIND_USER_WRITER_NO_KEY);
        let scheduler = match publish_mode {
            PublishMode::Asynchronous => Some(Arc::clone(&self.scheduler)),
            PublishMode::Synchronous => None,
        };
        let writer = StatefulWriter::new(guid, qos, &self.ctx, publish_mode, scheduler, listener)?;
        self.dispatcher.register_writer(&writer);
        log::debug!("[participant] writer {} created", guid);
        Ok(writer)
    }

    pub fn create_reader(
        &self,
        qos: QosProfile,
        listener: Option<Arc<dyn ReaderListener>>,
    ) -> Result<Arc<StatefulReader>> {
        let guid = self.next_guid(ENTITY_KIND_USER_READER_NO_KEY);
        let reader = StatefulReader::new(guid, qos, &self.ctx, listener)?;
        self.dispatcher.register_reader(&reader);
        log::debug!("[participant] reader {} created", guid);
        Ok(reader)
    }

    /// Stop routing inbound traffic to `writer`.
    pub fn delete_writer(&self, writer: &StatefulWriter) -> bool {
        self.dispatcher.unregister_writer(writer.guid().entity_id)
    }

    pub fn delete_reader(&self, reader: &StatefulReader) -> bool {
        self.dispatcher.unregister_reader(reader.guid().entity_id)
    }

    fn next_guid(&self, kind: u8) -> GUID {
        let key = self.next_entity_key.fetch_add(1, Ordering::Relaxed);
        GUID::new(self.guid_prefix, user_entity_id(key, kind))
    }
}

impl Drop for RtpsParticipant {
    fn drop(&mut self) {
        self.binding.take();
        self.registry.unregister(&self.guid_prefix);
        log::debug!("[participant] {:02x?} dropped", self.guid_prefix);
    }
}

impl std::fmt::Debug for RtpsParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpsParticipant")
            .field("guid_prefix", &self.guid_prefix)
            .field("domain_id", &self.domain_id)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
