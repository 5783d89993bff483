// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateful reliable writer.
//!
//! One mutex guards the history and every [`ReaderProxy`]. A send pass
//! marks the changes it picks `Underway` and encodes them under the lock,
//! then releases the lock before touching the transport; the outcome is
//! written back under the lock afterwards. This keeps the transport (and any
//! receive thread it drives) from ever running with the writer locked.
//!
//! ```text
//! write() -> history.add_change() -> proxies: Unsent
//!    |                                   |
//!    +-- sync: send pass  <--------------+-- async: scheduler.wake_up()
//!
//! timer (heartbeat_period): send pass + HEARTBEAT to reliable readers
//! ACKNACK: ack base -> acknowledged, NACK set -> Requested -> repair / GAP
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::reader_proxy::{ChangeForReaderStatus, NackOutcome, ReaderProxy};
use crate::config::{RuntimeConfig, DEFAULT_FRAGMENT_SIZE};
use crate::core::{
    CacheChange, ChangeKind, EntityId, GuidPrefix, InstanceHandle, Locator, SequenceNumber,
    Timestamp, GUID,
};
use crate::dds::{Error, ListenerEvent, PublicationMatchedStatus, Result, WriterListener};
use crate::endpoint::{EndpointContext, PublishMode, RemoteEndpointDescriptor};
use crate::engine::{AsyncDeliveryScheduler, PeriodicTimer, Tick};
use crate::history::{Admission, WriterHistory};
use crate::persistence::SequenceStore;
use crate::protocol::{
    AckNack, Data, DataFrag, EncodeResult, Gap, Heartbeat, InfoTs, InlineQos, MessageBuilder,
    Submessage,
};
use crate::qos::{Durability, QosProfile};
use crate::reliability::{MetricsSnapshot, ReliableMetrics};
use crate::transport::Transport;

/// Room reserved in each message for RTPS header, INFO_DST, INFO_TS and the
/// DATA_FRAG fixed fields plus inline QoS.
const FRAGMENT_OVERHEAD: usize = 128;

/// Encoded submessages that must travel in the same message.
type Group = Vec<Vec<u8>>;

/// Messages produced by a pass for one reader, plus the changes they carry.
struct Outgoing {
    reader: GUID,
    destinations: Vec<Locator>,
    messages: Vec<Vec<u8>>,
    changes: Vec<SequenceNumber>,
}

struct WriterInner {
    history: WriterHistory,
    proxies: BTreeMap<GUID, ReaderProxy>,
    heartbeat_count: u32,
    total_matched: u32,
}

/// Reliable (or best-effort) RTPS writer tracking one proxy per matched reader.
pub struct StatefulWriter {
    guid: GUID,
    qos: QosProfile,
    inner: Mutex<WriterInner>,
    /// Signalled whenever acknowledgments or history removals happen.
    progress: Condvar,
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    unicast_locators: Vec<Locator>,
    listener: Option<Arc<dyn WriterListener>>,
    metrics: ReliableMetrics,
    publish_mode: PublishMode,
    scheduler: Option<Arc<AsyncDeliveryScheduler>>,
    sequence_store: Option<Arc<dyn SequenceStore>>,
    timer: Mutex<Option<PeriodicTimer>>,
    fragment_size: usize,
}

impl StatefulWriter {
    /// Create a writer and start its heartbeat timer.
    ///
    /// Asynchronous writers need `scheduler`; they register with it here and
    /// unregister on drop.
    pub fn new(
        guid: GUID,
        qos: QosProfile,
        ctx: &EndpointContext,
        publish_mode: PublishMode,
        scheduler: Option<Arc<AsyncDeliveryScheduler>>,
        listener: Option<Arc<dyn WriterListener>>,
    ) -> Result<Arc<Self>> {
        qos.validate().map_err(Error::InvalidQos)?;
        if publish_mode == PublishMode::Asynchronous && scheduler.is_none() {
            return Err(Error::InvalidState(
                "asynchronous writer requires a delivery scheduler".to_string(),
            ));
        }

        let mut history = WriterHistory::new(
            guid,
            &qos,
            Arc::clone(&ctx.payload_pool),
            Arc::clone(&ctx.change_pool),
        );
        if let Some(store) = &ctx.sequence_store {
            if let Some(last) = store.load(guid, GUID::unknown())? {
                log::debug!("[writer] {} resuming after persisted seq={}", guid, last);
                history.resume_after(last);
            }
        }

        let fragment_size = ctx
            .transport
            .max_message_size()
            .saturating_sub(FRAGMENT_OVERHEAD)
            .clamp(1, DEFAULT_FRAGMENT_SIZE);

        let writer = Arc::new(Self {
            guid,
            qos,
            inner: Mutex::new(WriterInner {
                history,
                proxies: BTreeMap::new(),
                heartbeat_count: 0,
                total_matched: 0,
            }),
            progress: Condvar::new(),
            transport: Arc::clone(&ctx.transport),
            config: ctx.config.clone(),
            unicast_locators: ctx.unicast_locators.clone(),
            listener,
            metrics: ReliableMetrics::new(),
            publish_mode,
            scheduler,
            sequence_store: ctx.sequence_store.clone(),
            timer: Mutex::new(None),
            fragment_size,
        });

        let weak = Arc::downgrade(&writer);
        let config = ctx.config.clone();
        let timer = PeriodicTimer::spawn(
            "hdds-writer-hb",
            move || config.timing().heartbeat_period,
            move |tick| match weak.upgrade() {
                Some(writer) => {
                    writer.on_timer(tick);
                    true
                }
                None => false,
            },
        )?;
        *writer.timer.lock() = Some(timer);

        if let Some(scheduler) = &writer.scheduler {
            scheduler.register_writer(&writer)?;
        }

        log::debug!(
            "[writer] created {} ({:?}, {:?}, {:?}, {:?})",
            guid,
            writer.qos.reliability,
            writer.qos.durability,
            writer.qos.history,
            publish_mode
        );
        Ok(writer)
    }

    pub fn guid(&self) -> GUID {
        self.guid
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }

    /// Descriptor a remote reader uses to match this writer.
    pub fn remote_descriptor(&self) -> RemoteEndpointDescriptor {
        RemoteEndpointDescriptor {
            guid: self.guid,
            unicast_locators: self.unicast_locators.clone(),
            multicast_locators: Vec::new(),
            reliability: self.qos.reliability,
            durability: self.qos.durability,
            liveliness_lease: Duration::from_millis(crate::config::DEFAULT_LIVELINESS_LEASE_MS),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ========================================================================
    // Application boundary
    // ========================================================================

    /// Publish a sample of an unkeyed topic.
    pub fn write(&self, data: &[u8]) -> Result<SequenceNumber> {
        self.write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(data))
    }

    /// Publish a sample of `instance`.
    pub fn write_keyed(&self, instance: InstanceHandle, data: &[u8]) -> Result<SequenceNumber> {
        self.write_change(ChangeKind::Alive, instance, Some(data))
    }

    /// Announce that `instance` was disposed.
    pub fn dispose(&self, instance: InstanceHandle) -> Result<SequenceNumber> {
        self.write_change(ChangeKind::NotAliveDisposed, instance, None)
    }

    /// Announce that this writer no longer updates `instance`.
    pub fn unregister_instance(&self, instance: InstanceHandle) -> Result<SequenceNumber> {
        self.write_change(ChangeKind::NotAliveUnregistered, instance, None)
    }

    fn write_change(
        &self,
        kind: ChangeKind,
        instance: InstanceHandle,
        data: Option<&[u8]>,
    ) -> Result<SequenceNumber> {
        let deadline = Instant::now() + self.qos.max_blocking_time;
        let payload_len = data.map_or(0, <[u8]>::len);

        let mut inner = self.inner.lock();
        loop {
            match inner.history.admission(instance, payload_len) {
                Admission::Accept => break,
                Admission::Evict(oldest) => {
                    let acked = inner
                        .proxies
                        .values()
                        .all(|p| !p.is_reliable() || p.is_acked(oldest));
                    if acked || Instant::now() >= deadline {
                        if !acked {
                            log::debug!(
                                "[writer] {} evicting unacknowledged seq={} after {:?}",
                                self.guid,
                                oldest,
                                self.qos.max_blocking_time
                            );
                        }
                        inner.history.remove_change(oldest);
                        continue;
                    }
                    self.progress.wait_until(&mut inner, deadline);
                }
                Admission::Full => {
                    self.remove_acked_changes(&mut inner);
                    if inner.history.admission(instance, payload_len) == Admission::Full {
                        self.release_acked_oldest(&mut inner);
                    }
                    if inner.history.admission(instance, payload_len) != Admission::Full {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        log::debug!(
                            "[writer] {} history full for {:?}, write timed out",
                            self.guid,
                            self.qos.max_blocking_time
                        );
                        return Err(Error::WriteTimeout);
                    }
                    self.progress.wait_until(&mut inner, deadline);
                }
            }
        }

        let change = inner.history.new_change(kind, instance, data)?;
        let seq = inner.history.add_change(change)?;
        for proxy in inner.proxies.values_mut() {
            proxy.add_change(seq, ChangeForReaderStatus::Unsent);
        }
        self.remove_acked_changes(&mut inner);
        drop(inner);

        log::trace!("[writer] {} wrote seq={} ({:?})", self.guid, seq, kind);
        if let Some(store) = &self.sequence_store {
            if let Err(e) = store.store(self.guid, GUID::unknown(), seq) {
                log::warn!("[writer] {} failed to persist seq={}: {}", self.guid, seq, e);
            }
        }
        if let Some(listener) = &self.listener {
            ListenerEvent::SampleWritten {
                writer: self.guid,
                sequence_number: seq,
            }
            .deliver_to_writer(listener.as_ref());
        }

        match (&self.publish_mode, &self.scheduler) {
            (PublishMode::Asynchronous, Some(scheduler)) => scheduler.wake_up(self.guid),
            _ => {
                self.send_any_unsent_changes();
            }
        }
        Ok(seq)
    }

    /// Block until every reliable reader acknowledged everything written.
    ///
    /// Fails with `AckTimeout` (state unchanged) when `timeout` elapses first.
    pub fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if Self::all_acked(&inner) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::AckTimeout);
            }
            self.progress.wait_until(&mut inner, deadline);
        }
    }

    /// True when every reliable reader acknowledged the last written change.
    pub fn is_acked_by_all(&self) -> bool {
        Self::all_acked(&self.inner.lock())
    }

    fn all_acked(inner: &WriterInner) -> bool {
        let last = inner.history.last_sequence();
        inner
            .proxies
            .values()
            .filter(|p| p.is_reliable())
            .all(|p| p.is_acked_up_to(last))
    }

    /// Delivery status of `seq` towards `reader`.
    pub fn reader_proxy_status(
        &self,
        reader: GUID,
        seq: SequenceNumber,
    ) -> Option<ChangeForReaderStatus> {
        self.inner.lock().proxies.get(&reader)?.status(seq)
    }

    /// Sequence numbers `reader` has not acknowledged yet.
    pub fn unacked_changes(&self, reader: GUID) -> Vec<SequenceNumber> {
        self.inner
            .lock()
            .proxies
            .get(&reader)
            .map(|p| p.unacked_changes().collect())
            .unwrap_or_default()
    }

    pub fn matched_readers(&self) -> Vec<GUID> {
        self.inner.lock().proxies.keys().copied().collect()
    }

    /// `(min, max)` sequence numbers still held in the history.
    pub fn history_range(&self) -> Option<(SequenceNumber, SequenceNumber)> {
        let inner = self.inner.lock();
        Some((inner.history.min_seq()?, inner.history.max_seq()?))
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Last sequence number assigned (0 before the first write).
    pub fn last_sequence(&self) -> SequenceNumber {
        self.inner.lock().history.last_sequence()
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Start tracking a reader reported by discovery.
    pub fn matched_reader_add(&self, descriptor: RemoteEndpointDescriptor) -> Result<()> {
        if descriptor.is_reliable() && !self.qos.is_reliable() {
            return Err(Error::InvalidQos(format!(
                "reliable reader {} cannot match best-effort writer {}",
                descriptor.guid, self.guid
            )));
        }
        let reader = descriptor.guid;
        let reliable = self.qos.is_reliable() && descriptor.is_reliable();
        let replay =
            self.qos.durability.replays_history() && descriptor.durability.replays_history();

        let (status, announce, push) = {
            let mut inner = self.inner.lock();
            if inner.proxies.contains_key(&reader) {
                return Err(Error::AlreadyMatched);
            }

            let (first, last) = inner.history.heartbeat_range();
            let proxy = if replay {
                let mut proxy = ReaderProxy::new(descriptor, reliable, first - 1);
                let initial = if reliable {
                    ChangeForReaderStatus::Unacknowledged
                } else {
                    ChangeForReaderStatus::Unsent
                };
                for seq in inner.history.sequence_numbers() {
                    proxy.add_change(seq, initial);
                }
                proxy
            } else {
                // Changes written before the match are irrelevant to it.
                ReaderProxy::new(descriptor, reliable, last)
            };
            let has_history = proxy.has_unacked();
            inner.proxies.insert(reader, proxy);
            inner.total_matched += 1;

            let status = PublicationMatchedStatus {
                total_count: inner.total_matched,
                total_count_change: 1,
                current_count: inner.proxies.len() as u32,
                current_count_change: 1,
                last_subscription_handle: Some(reader),
            };
            (status, reliable && has_history, !reliable && has_history)
        };

        log::debug!(
            "[writer] {} matched reader {} (reliable={}, replay={})",
            self.guid,
            reader,
            reliable,
            replay
        );
        if let Some(listener) = &self.listener {
            ListenerEvent::PublicationMatched(status).deliver_to_writer(listener.as_ref());
        }
        if announce {
            self.heartbeat_pass(Some(reader));
        }
        if push {
            self.send_any_unsent_changes();
        }
        Ok(())
    }

    /// Stop tracking a reader. Pending acknowledgments from it are dropped.
    pub fn matched_reader_remove(&self, reader: GUID) -> Result<()> {
        let status = {
            let mut inner = self.inner.lock();
            if inner.proxies.remove(&reader).is_none() {
                return Err(Error::NotMatched);
            }
            self.remove_acked_changes(&mut inner);
            PublicationMatchedStatus {
                total_count: inner.total_matched,
                total_count_change: 0,
                current_count: inner.proxies.len() as u32,
                current_count_change: -1,
                last_subscription_handle: Some(reader),
            }
        };
        self.progress.notify_all();
        log::debug!("[writer] {} unmatched reader {}", self.guid, reader);
        if let Some(listener) = &self.listener {
            ListenerEvent::PublicationMatched(status).deliver_to_writer(listener.as_ref());
        }
        Ok(())
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Send every change not yet sent (and repairs that are due).
    ///
    /// Returns the number of readers something was sent to. Transport
    /// failures are not reported: failed changes are retried on a later pass.
    pub fn send_any_unsent_changes(&self) -> usize {
        let outgoing = {
            let mut inner = self.inner.lock();
            self.collect_sends(&mut inner, Instant::now())
        };
        let readers = outgoing.len();
        self.transmit(outgoing);
        readers
    }

    /// Send a HEARTBEAT to every reliable reader. Returns how many were sent.
    pub fn send_heartbeat(&self) -> usize {
        self.heartbeat_pass(None)
    }

    /// Process an ACKNACK from a reader of participant `source`.
    pub fn process_acknack(&self, source: GuidPrefix, acknack: &AckNack) {
        let reader = GUID::new(source, acknack.reader_id);
        let now = Instant::now();
        let timing = self.config.timing();
        self.metrics.increment_acknacks_received(1);

        let mut inner = self.inner.lock();
        let last = inner.history.last_sequence();
        let (requested, irrelevant, repair_at, destinations) = {
            let Some(proxy) = inner.proxies.get_mut(&reader) else {
                log::trace!("[writer] {} ACKNACK from unmatched {}", self.guid, reader);
                return;
            };
            if !proxy.accept_acknack_count(acknack.count) {
                log::trace!(
                    "[writer] {} stale ACKNACK count={} from {}",
                    self.guid,
                    acknack.count,
                    reader
                );
                return;
            }

            let mut base = acknack.ack_base();
            if base > last + 1 {
                log::warn!(
                    "[writer] {} reader {} acknowledges up to {} but last written is {}",
                    self.guid,
                    reader,
                    base - 1,
                    last
                );
                base = last + 1;
            }
            proxy.acked_changes_set(base);

            let mut requested = 0usize;
            let mut irrelevant = Vec::new();
            for seq in acknack.requested() {
                if seq > last {
                    log::warn!(
                        "[writer] {} reader {} NACKs seq={} beyond last written {}",
                        self.guid,
                        reader,
                        seq,
                        last
                    );
                    break;
                }
                match proxy.requested_change(seq, now, timing.nack_suppression_duration) {
                    NackOutcome::Requested => requested += 1,
                    NackOutcome::Irrelevant => irrelevant.push(seq),
                    NackOutcome::Ignored => {}
                }
            }

            let repair_at = (requested > 0 && timing.nack_response_delay > Duration::ZERO)
                .then(|| now + timing.nack_response_delay);
            if let Some(at) = repair_at {
                proxy.schedule_repair(at);
            }
            (requested, irrelevant, repair_at, proxy.destinations().to_vec())
        };

        self.remove_acked_changes(&mut inner);
        let mut outgoing = Vec::new();
        if !irrelevant.is_empty() {
            if let Some(messages) = self.gap_messages(reader, &irrelevant) {
                self.metrics.increment_gaps_sent(1);
                outgoing.push(Outgoing {
                    reader,
                    destinations,
                    messages,
                    changes: Vec::new(),
                });
            }
        }
        if requested > 0 && repair_at.is_none() {
            outgoing.extend(self.collect_sends(&mut inner, now));
        }
        drop(inner);
        self.progress.notify_all();

        if let Some(at) = repair_at {
            if let Some(timer) = self.timer.lock().as_ref() {
                timer.schedule(at);
            }
        }
        self.transmit(outgoing);
    }

    fn on_timer(&self, tick: Tick) {
        self.send_any_unsent_changes();
        if tick == Tick::Periodic {
            self.heartbeat_pass(None);
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Volatile writers drop changes every matched reader has acknowledged.
    fn remove_acked_changes(&self, inner: &mut WriterInner) {
        if self.qos.durability != Durability::Volatile {
            return;
        }
        let mut removed = 0;
        while let Some(min) = inner.history.min_seq() {
            if !inner.proxies.values().all(|p| p.is_acked(min)) {
                break;
            }
            inner.history.remove_change(min);
            removed += 1;
        }
        if removed > 0 {
            log::trace!(
                "[writer] {} released {} acknowledged changes",
                self.guid,
                removed
            );
        }
    }

    /// Free one slot of a full history, whatever the durability, when every
    /// reliable reader acknowledged the oldest change.
    fn release_acked_oldest(&self, inner: &mut WriterInner) {
        let Some(min) = inner.history.min_seq() else {
            return;
        };
        if !inner
            .proxies
            .values()
            .all(|p| !p.is_reliable() || p.is_acked(min))
        {
            return;
        }
        inner.history.remove_change(min);
        log::trace!("[writer] {} released acknowledged seq={} for space", self.guid, min);
    }

    fn builder_for(&self, reader: GUID) -> MessageBuilder {
        MessageBuilder::new(self.guid.prefix, self.transport.max_message_size())
            .with_destination(reader.prefix)
    }

    fn heartbeat(&self, inner: &mut WriterInner, reader: GUID) -> Option<Heartbeat> {
        let (first_sn, last_sn) = inner.history.heartbeat_range();
        let proxy = inner.proxies.get(&reader)?;
        let final_flag = !proxy.has_pending() && proxy.is_acked_up_to(last_sn);
        inner.heartbeat_count = inner.heartbeat_count.wrapping_add(1).max(1);
        Some(Heartbeat {
            reader_id: reader.entity_id,
            writer_id: self.guid.entity_id,
            first_sn,
            last_sn,
            count: inner.heartbeat_count,
            final_flag,
            liveliness: false,
        })
    }

    /// HEARTBEAT to `only` or to every reliable reader.
    fn heartbeat_pass(&self, only: Option<GUID>) -> usize {
        let outgoing: Vec<Outgoing> = {
            let mut inner = self.inner.lock();
            let targets: Vec<(GUID, Vec<Locator>)> = inner
                .proxies
                .values()
                .filter(|p| p.is_reliable() && only.map_or(true, |g| g == p.guid()))
                .map(|p| (p.guid(), p.destinations().to_vec()))
                .collect();
            targets
                .into_iter()
                .filter_map(|(reader, destinations)| {
                    let hb = self.heartbeat(&mut inner, reader)?;
                    let mut builder = self.builder_for(reader);
                    if let Err(e) = builder.add(&Submessage::Heartbeat(hb)) {
                        log::warn!("[writer] {} cannot encode HEARTBEAT: {}", self.guid, e);
                        return None;
                    }
                    Some(Outgoing {
                        reader,
                        destinations,
                        messages: builder.finish(),
                        changes: Vec::new(),
                    })
                })
                .collect()
        };
        let sent = outgoing.len();
        self.metrics.increment_heartbeats_sent(sent as u64);
        self.transmit(outgoing);
        sent
    }

    fn gap_messages(&self, reader: GUID, irrelevant: &[SequenceNumber]) -> Option<Vec<Vec<u8>>> {
        let mut builder = self.builder_for(reader);
        for gap in Gap::covering(reader.entity_id, self.guid.entity_id, irrelevant) {
            if let Err(e) = builder.add(&Submessage::Gap(gap)) {
                log::warn!("[writer] {} cannot encode GAP: {}", self.guid, e);
                return None;
            }
        }
        Some(builder.finish())
    }

    /// Pick sendable changes of every proxy and encode them.
    fn collect_sends(&self, inner: &mut WriterInner, now: Instant) -> Vec<Outgoing> {
        let readers: Vec<GUID> = inner.proxies.keys().copied().collect();
        let mut outgoing = Vec::new();

        for reader in readers {
            let WriterInner {
                history, proxies, ..
            } = &mut *inner;
            let Some(proxy) = proxies.get_mut(&reader) else {
                continue;
            };
            let sendable = proxy.take_sendable(now);
            if sendable.is_empty() {
                continue;
            }

            let reliable = proxy.is_reliable();
            let mut builder = self.builder_for(reader);
            let mut changes = Vec::with_capacity(sendable.len());
            let mut irrelevant = Vec::new();
            for (seq, is_repair) in sendable {
                let encoded = history
                    .get_change(seq)
                    .map(|change| self.encode_change(change, reader.entity_id));
                match encoded {
                    Some(Ok(groups)) => {
                        let added = groups.iter().try_for_each(|g| builder.add_group(g));
                        match added {
                            Ok(()) => {
                                if is_repair {
                                    self.metrics.increment_retransmit_sent(1);
                                } else {
                                    self.metrics.increment_data_sent(1);
                                }
                                changes.push(seq);
                            }
                            Err(e) => {
                                log::warn!(
                                    "[writer] {} seq={} does not fit a message: {}",
                                    self.guid,
                                    seq,
                                    e
                                );
                                irrelevant.push(seq);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("[writer] {} cannot encode seq={}: {}", self.guid, seq, e);
                        irrelevant.push(seq);
                    }
                    None => irrelevant.push(seq),
                }
            }

            if !irrelevant.is_empty() {
                if reliable {
                    for gap in Gap::covering(reader.entity_id, self.guid.entity_id, &irrelevant) {
                        if let Err(e) = builder.add(&Submessage::Gap(gap)) {
                            log::warn!("[writer] {} cannot encode GAP: {}", self.guid, e);
                        }
                    }
                    self.metrics.increment_gaps_sent(1);
                    changes.extend_from_slice(&irrelevant);
                } else {
                    for seq in &irrelevant {
                        proxy.complete_send(*seq, true, now);
                    }
                }
            }

            let destinations = proxy.destinations().to_vec();
            if reliable && !changes.is_empty() {
                if let Some(hb) = self.heartbeat(inner, reader) {
                    if builder.add(&Submessage::Heartbeat(hb)).is_ok() {
                        self.metrics.increment_heartbeats_sent(1);
                    }
                }
            }
            if builder.is_empty() {
                continue;
            }
            outgoing.push(Outgoing {
                reader,
                destinations,
                messages: builder.finish(),
                changes,
            });
        }
        outgoing
    }

    /// DATA (or DATA_FRAG series) for `change`, each preceded by INFO_TS.
    fn encode_change(&self, change: &CacheChange, reader_id: EntityId) -> EncodeResult<Vec<Group>> {
        let info_ts = InfoTs::new(change.source_timestamp.unwrap_or_else(Timestamp::now)).encode()?;
        let inline_qos = InlineQos::for_change(change.kind, change.instance_handle);

        let Some(payload) = change.serialized_payload.as_ref() else {
            let data = Data {
                reader_id,
                writer_id: self.guid.entity_id,
                writer_sn: change.sequence_number,
                inline_qos,
                payload: None,
            };
            return Ok(vec![vec![info_ts, data.encode()?]]);
        };

        if payload.len() <= self.fragment_size {
            let data = Data {
                reader_id,
                writer_id: self.guid.entity_id,
                writer_sn: change.sequence_number,
                inline_qos,
                payload: Some(payload.to_vec()),
            };
            return Ok(vec![vec![info_ts, data.encode()?]]);
        }

        let sample_size = payload.len() as u32;
        let fragment_size = self.fragment_size as u16;
        payload.with_bytes(|bytes| {
            bytes
                .chunks(self.fragment_size)
                .enumerate()
                .map(|(idx, chunk)| {
                    let frag = DataFrag {
                        reader_id,
                        writer_id: self.guid.entity_id,
                        writer_sn: change.sequence_number,
                        fragment_starting_num: idx as u32 + 1,
                        fragments_in_submessage: 1,
                        fragment_size,
                        sample_size,
                        inline_qos,
                        payload: chunk.to_vec(),
                    };
                    frag.encode().map(|encoded| vec![info_ts.clone(), encoded])
                })
                .collect()
        })
    }

    /// Hand messages to the transport (no lock held) and record the outcome.
    fn transmit(&self, outgoing: Vec<Outgoing>) {
        if outgoing.is_empty() {
            return;
        }
        let results: Vec<(GUID, Vec<SequenceNumber>, bool)> = outgoing
            .into_iter()
            .map(|o| {
                let delivered = self.send_messages(&o.destinations, &o.messages);
                if !delivered {
                    log::debug!(
                        "[writer] {} transport refused messages for {}",
                        self.guid,
                        o.reader
                    );
                }
                (o.reader, o.changes, delivered)
            })
            .collect();

        if results.iter().all(|(_, changes, _)| changes.is_empty()) {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        for (reader, changes, delivered) in results {
            if let Some(proxy) = inner.proxies.get_mut(&reader) {
                for seq in changes {
                    proxy.complete_send(seq, delivered, now);
                }
            }
        }
        self.remove_acked_changes(&mut inner);
        drop(inner);
        self.progress.notify_all();
    }

    fn send_messages(&self, destinations: &[Locator], messages: &[Vec<u8>]) -> bool {
        let mut delivered = !destinations.is_empty();
        for message in messages {
            let mut reached = false;
            for destination in destinations {
                reached |= self.transport.send(destination, message);
            }
            delivered &= reached;
        }
        delivered
    }
}

impl Drop for StatefulWriter {
    fn drop(&mut self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.unregister_writer(self.guid);
        }
        self.timer.get_mut().take();
        log::debug!("[writer] {} dropped", self.guid);
    }
}

impl std::fmt::Debug for StatefulWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulWriter")
            .field("guid", &self.guid)
            .field("qos", &self.qos)
            .field("publish_mode", &self.publish_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReliabilityTiming;
    use crate::core::rt::{ChangePool, PayloadPool, PoolConfig};
    use crate::protocol::{MessageReceiver, SequenceNumberSet};
    use crate::qos::QosProfile;

    const WRITER_PREFIX: GuidPrefix = [1; 12];
    const READER_PREFIX: GuidPrefix = [2; 12];

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Locator, Vec<u8>)>>,
    }

    impl Transport for Recorder {
        fn send(&self, destination: &Locator, buf: &[u8]) -> bool {
            self.sent.lock().push((*destination, buf.to_vec()));
            true
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<Submessage> {
            let receiver = MessageReceiver::new(READER_PREFIX);
            std::mem::take(&mut *self.sent.lock())
                .into_iter()
                .flat_map(|(_, buf)| receiver.receive(&buf).expect("decode"))
                .map(|r| r.submessage)
                .collect()
        }
    }

    fn context(transport: Arc<Recorder>) -> EndpointContext {
        let mut timing = ReliabilityTiming::fast();
        // Keep the periodic pass out of the way.
        timing.heartbeat_period = Duration::from_secs(30);
        EndpointContext {
            transport,
            config: RuntimeConfig::with_timing(timing),
            payload_pool: PayloadPool::new(PoolConfig::default()),
            change_pool: Arc::new(ChangePool::new(8, 0)),
            unicast_locators: vec![Locator::udpv4([127, 0, 0, 1], 7400)],
            sequence_store: None,
        }
    }

    fn writer_guid() -> GUID {
        GUID::new(WRITER_PREFIX, [0, 0, 1, 0x03])
    }

    fn reader(qos: &QosProfile) -> RemoteEndpointDescriptor {
        RemoteEndpointDescriptor::new(
            GUID::new(READER_PREFIX, [0, 0, 1, 0x04]),
            Locator::udpv4([127, 0, 0, 1], 7410),
            qos,
        )
    }

    fn writer(qos: QosProfile, transport: &Arc<Recorder>) -> Arc<StatefulWriter> {
        StatefulWriter::new(
            writer_guid(),
            qos,
            &context(Arc::clone(transport)),
            PublishMode::Synchronous,
            None,
            None,
        )
        .expect("writer")
    }

    fn acknack(base: SequenceNumber, missing: &[SequenceNumber], count: u32) -> AckNack {
        AckNack::new(
            [0, 0, 1, 0x04],
            [0, 0, 1, 0x03],
            SequenceNumberSet::from_sequences(base, missing).expect("set"),
            count,
        )
    }

    fn data_seqs(submessages: &[Submessage]) -> Vec<SequenceNumber> {
        submessages
            .iter()
            .filter_map(|s| match s {
                Submessage::Data(d) => Some(d.writer_sn),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sequence_numbers_increase_by_one() {
        let transport = Arc::new(Recorder::default());
        let w = writer(QosProfile::reliable(), &transport);
        assert_eq!(w.write(b"a").unwrap(), 1);
        assert_eq!(w.write(b"b").unwrap(), 2);
        assert_eq!(w.dispose(InstanceHandle::from_u64(7)).unwrap(), 3);
        assert_eq!(w.last_sequence(), 3);
        // Volatile and unmatched: nothing is retained.
        assert_eq!(w.history_len(), 0);
    }

    #[test]
    fn acknack_base_acknowledges_and_releases() {
        let transport = Arc::new(Recorder::default());
        let w = writer(QosProfile::reliable(), &transport);
        let r = reader(&QosProfile::reliable());
        let reader_guid = r.guid;
        w.matched_reader_add(r).unwrap();

        w.write(b"one").unwrap();
        w.write(b"two").unwrap();
        assert_eq!(data_seqs(&transport.take()), vec![1, 2]);
        assert_eq!(
            w.reader_proxy_status(reader_guid, 1),
            Some(ChangeForReaderStatus::Unacknowledged)
        );
        assert!(!w.is_acked_by_all());

        w.process_acknack(READER_PREFIX, &acknack(3, &[], 1));
        assert_eq!(
            w.reader_proxy_status(reader_guid, 2),
            Some(ChangeForReaderStatus::Acknowledged)
        );
        assert!(w.is_acked_by_all());
        assert_eq!(w.history_len(), 0);
        assert!(w.wait_for_acknowledgments(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn nack_triggers_repair() {
        let transport = Arc::new(Recorder::default());
        let w = writer(QosProfile::reliable(), &transport);
        w.matched_reader_add(reader(&QosProfile::reliable())).unwrap();
        for payload in [b"1", b"2", b"3"] {
            w.write(payload).unwrap();
        }
        transport.take();

        w.process_acknack(READER_PREFIX, &acknack(2, &[2], 1));
        assert_eq!(data_seqs(&transport.take()), vec![2]);
        assert_eq!(w.metrics().retransmit_sent, 1);

        // Same count again is stale.
        w.process_acknack(READER_PREFIX, &acknack(2, &[2], 1));
        assert!(data_seqs(&transport.take()).is_empty());
    }

    #[test]
    fn nack_for_evicted_change_gets_gap() {
        let transport = Arc::new(Recorder::default());
        let qos = QosProfile::reliable()
            .keep_last(1)
            .max_blocking_time(Duration::from_millis(5));
        let w = writer(qos, &transport);
        w.matched_reader_add(reader(&QosProfile::reliable())).unwrap();
        w.write(b"first").unwrap();
        w.write(b"second").unwrap();
        transport.take();
        assert_eq!(w.history_range(), Some((2, 2)));

        w.process_acknack(READER_PREFIX, &acknack(1, &[1], 1));
        let sent = transport.take();
        assert!(data_seqs(&sent).is_empty());
        assert!(sent
            .iter()
            .any(|s| matches!(s, Submessage::Gap(g) if g.irrelevant().any(|seq| seq == 1))));
    }

    #[test]
    fn keep_all_full_history_times_out() {
        let transport = Arc::new(Recorder::default());
        let qos = QosProfile::reliable()
            .keep_all(2)
            .max_blocking_time(Duration::from_millis(40));
        let w = writer(qos, &transport);
        w.matched_reader_add(reader(&QosProfile::reliable())).unwrap();
        w.write(b"a").unwrap();
        w.write(b"b").unwrap();

        let start = Instant::now();
        assert!(matches!(w.write(b"c"), Err(Error::WriteTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(w.last_sequence(), 2);

        w.process_acknack(READER_PREFIX, &acknack(2, &[], 1));
        assert_eq!(w.write(b"c").unwrap(), 3);
    }

    #[test]
    fn matching_errors() {
        let transport = Arc::new(Recorder::default());
        let w = writer(QosProfile::best_effort(), &transport);
        assert!(matches!(
            w.matched_reader_add(reader(&QosProfile::reliable())),
            Err(Error::InvalidQos(_))
        ));
        let r = reader(&QosProfile::best_effort());
        let guid = r.guid;
        w.matched_reader_add(r.clone()).unwrap();
        assert!(matches!(
            w.matched_reader_add(r),
            Err(Error::AlreadyMatched)
        ));
        w.matched_reader_remove(guid).unwrap();
        assert!(matches!(
            w.matched_reader_remove(guid),
            Err(Error::NotMatched)
        ));
    }

    #[test]
    fn asynchronous_writer_needs_scheduler() {
        let transport = Arc::new(Recorder::default());
        let result = StatefulWriter::new(
            writer_guid(),
            QosProfile::reliable(),
            &context(transport),
            PublishMode::Asynchronous,
            None,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn transient_local_replays_to_late_reader() {
        let transport = Arc::new(Recorder::default());
        let w = writer(QosProfile::transient_local(), &transport);
        w.write(b"a").unwrap();
        w.write(b"b").unwrap();
        assert_eq!(w.history_len(), 2);

        w.matched_reader_add(reader(&QosProfile::transient_local()))
            .unwrap();
        let hb = transport.take().into_iter().find_map(|s| match s {
            Submessage::Heartbeat(hb) => Some(hb),
            _ => None,
        });
        let hb = hb.expect("heartbeat on match");
        assert_eq!((hb.first_sn, hb.last_sn), (1, 2));
        assert!(!hb.final_flag);

        w.process_acknack(READER_PREFIX, &acknack(1, &[1, 2], 1));
        assert_eq!(data_seqs(&transport.take()), vec![1, 2]);
    }

    #[test]
    fn keep_all_transient_local_frees_acknowledged_slots() {
        let transport = Arc::new(Recorder::default());
        let qos = QosProfile::transient_local()
            .keep_all(3)
            .max_blocking_time(Duration::from_millis(20));
        let w = writer(qos.clone(), &transport);
        w.matched_reader_add(reader(&qos)).unwrap();

        for i in 1..=3u64 {
            assert_eq!(w.write(b"x").unwrap(), i);
        }
        w.process_acknack(READER_PREFIX, &acknack(4, &[], 1));
        assert!(w.is_acked_by_all());
        assert_eq!(w.history_len(), 3);

        // Each write releases one acknowledged change.
        assert_eq!(w.write(b"x").unwrap(), 4);
        assert_eq!(w.write(b"x").unwrap(), 5);
        assert_eq!(w.write(b"x").unwrap(), 6);
        assert_eq!(w.history_len(), 3);

        // Oldest retained change (4) is not acknowledged yet.
        assert!(matches!(w.write(b"x"), Err(Error::WriteTimeout)));
        assert_eq!(w.history_len(), 3);
    }

    #[test]
    fn keep_all_transient_local_without_readers_keeps_accepting() {
        let transport = Arc::new(Recorder::default());
        let qos = QosProfile::transient_local()
            .keep_all(3)
            .max_blocking_time(Duration::from_millis(20));
        let w = writer(qos, &transport);
        for i in 1..=10u64 {
            assert_eq!(w.write(b"x").unwrap(), i);
        }
        assert_eq!(w.history_len(), 3);
    }

    #[test]
    fn wait_for_acknowledgments_times_out_on_silent_reader() {
        let transport = Arc::new(Recorder::default());
        let w = writer(QosProfile::reliable(), &transport);
        w.matched_reader_add(reader(&QosProfile::reliable())).unwrap();
        w.write(b"unanswered").unwrap();

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let result = w.wait_for_acknowledgments(timeout);
        assert!(matches!(result, Err(Error::AckTimeout)));
        assert!(start.elapsed() >= timeout);
        assert!(!w.is_acked_by_all());
    }
}
