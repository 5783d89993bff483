// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateful reliable reader.
//!
//! Incoming submessages are applied to the matching [`WriterProxy`] under the
//! reader lock. Everything with side effects outside the reader (ACKNACK
//! transmission, persistence, listener callbacks, timer requests) is
//! collected and carried out once the lock is released.
//!
//! HEARTBEAT handling:
//!
//! | HEARTBEAT | missing changes | ACKNACK |
//! |-----------|-----------------|---------|
//! | not final | any | after `heartbeat_response_delay` |
//! | final | some | immediately |
//! | final | none, newer data not acknowledged yet | after `heartbeat_response_delay` |
//! | final | none, everything acknowledged | none |
//!
//! The `hdds-reader-ack` timer sends scheduled ACKNACKs, repeats them every
//! `acknack_retry_period` while changes stay missing and checks writer
//! liveliness leases.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::sample::Sample;
use super::writer_proxy::{FragmentOutcome, ReceiveOutcome, WriterProxy};
use crate::config::RuntimeConfig;
use crate::core::rt::{ChangePool, PayloadPool};
use crate::core::{FragmentState, GuidPrefix, Locator, SequenceNumber, Timestamp, GUID};
use crate::dds::{
    Error, ListenerEvent, LivelinessChangedStatus, ReaderListener, Result, SampleLostStatus,
    SampleRejectedReason, SampleRejectedStatus, SubscriptionMatchedStatus,
};
use crate::endpoint::{EndpointContext, RemoteEndpointDescriptor};
use crate::engine::{PeriodicTimer, Tick};
use crate::history::ReaderHistory;
use crate::persistence::SequenceStore;
use crate::protocol::{Data, DataFrag, Gap, Heartbeat, MessageBuilder, Submessage};
use crate::qos::QosProfile;
use crate::reliability::{MetricsSnapshot, ReliableMetrics};
use crate::transport::Transport;

/// Largest sample accepted for reassembly.
const MAX_FRAGMENTED_SAMPLE: u32 = 64 * 1024 * 1024;

struct ReaderInner {
    history: ReaderHistory,
    proxies: BTreeMap<GUID, WriterProxy>,
    total_matched: u32,
    lost_total: u32,
    rejected_total: u32,
    alive_count: u32,
    not_alive_count: u32,
}

/// Side effects gathered under the lock.
#[derive(Default)]
struct Pending {
    events: Vec<ListenerEvent>,
    acknacks: Vec<(Vec<Locator>, Vec<Vec<u8>>)>,
    persist: Vec<(GUID, SequenceNumber)>,
    schedule: Option<Instant>,
    data_available: bool,
}

impl Pending {
    fn schedule_at(&mut self, at: Instant) {
        if self.schedule.map_or(true, |current| at < current) {
            self.schedule = Some(at);
        }
    }
}

/// Reliable (or best-effort) RTPS reader tracking one proxy per matched writer.
pub struct StatefulReader {
    guid: GUID,
    qos: QosProfile,
    inner: Mutex<ReaderInner>,
    data_available: Condvar,
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    unicast_locators: Vec<Locator>,
    listener: Option<Arc<dyn ReaderListener>>,
    metrics: ReliableMetrics,
    payload_pool: Arc<PayloadPool>,
    change_pool: Arc<ChangePool>,
    sequence_store: Option<Arc<dyn SequenceStore>>,
    timer: Mutex<Option<PeriodicTimer>>,
}

impl StatefulReader {
    /// Create a reader and start its ACKNACK timer.
    pub fn new(
        guid: GUID,
        qos: QosProfile,
        ctx: &EndpointContext,
        listener: Option<Arc<dyn ReaderListener>>,
    ) -> Result<Arc<Self>> {
        qos.validate().map_err(Error::InvalidQos)?;

        let reader = Arc::new(Self {
            guid,
            inner: Mutex::new(ReaderInner {
                history: ReaderHistory::new(&qos, Arc::clone(&ctx.change_pool)),
                proxies: BTreeMap::new(),
                total_matched: 0,
                lost_total: 0,
                rejected_total: 0,
                alive_count: 0,
                not_alive_count: 0,
            }),
            qos,
            data_available: Condvar::new(),
            transport: Arc::clone(&ctx.transport),
            config: ctx.config.clone(),
            unicast_locators: ctx.unicast_locators.clone(),
            listener,
            metrics: ReliableMetrics::new(),
            payload_pool: Arc::clone(&ctx.payload_pool),
            change_pool: Arc::clone(&ctx.change_pool),
            sequence_store: ctx.sequence_store.clone(),
            timer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&reader);
        let config = ctx.config.clone();
        let timer = PeriodicTimer::spawn(
            "hdds-reader-ack",
            move || config.timing().acknack_retry_period,
            move |tick| match weak.upgrade() {
                Some(reader) => {
                    reader.on_timer(tick);
                    true
                }
                None => false,
            },
        )?;
        *reader.timer.lock() = Some(timer);

        log::debug!(
            "[reader] created {} ({:?}, {:?}, {:?})",
            guid,
            reader.qos.reliability,
            reader.qos.durability,
            reader.qos.history
        );
        Ok(reader)
    }

    pub fn guid(&self) -> GUID {
        self.guid
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }

    /// Descriptor a remote writer uses to match this reader.
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
    // Matching
    // ========================================================================

    /// Start tracking a writer reported by discovery.
    ///
    /// A persisted watermark for the writer is restored, so samples the
    /// reader already delivered before a restart are not delivered again.
    pub fn matched_writer_add(&self, descriptor: RemoteEndpointDescriptor) -> Result<()> {
        if self.qos.is_reliable() && !descriptor.is_reliable() {
            return Err(Error::InvalidQos(format!(
                "reliable reader {} cannot match best-effort writer {}",
                self.guid, descriptor.guid
            )));
        }
        let writer = descriptor.guid;
        let reliable = descriptor.is_reliable() && self.qos.is_reliable();
        let watermark = match &self.sequence_store {
            Some(store) => store.load(self.guid, writer)?.unwrap_or(0),
            None => 0,
        };

        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            if inner.proxies.contains_key(&writer) {
                return Err(Error::AlreadyMatched);
            }
            let mut proxy =
                WriterProxy::new(descriptor, reliable, Arc::clone(&self.change_pool), watermark);
            if reliable {
                let at = Instant::now() + self.config.timing().initial_acknack_delay;
                proxy.schedule_acknack(at);
                pending.schedule_at(at);
            }
            inner.proxies.insert(writer, proxy);
            inner.total_matched += 1;
            inner.alive_count += 1;
            pending
                .events
                .push(ListenerEvent::SubscriptionMatched(SubscriptionMatchedStatus {
                    total_count: inner.total_matched,
                    total_count_change: 1,
                    current_count: inner.proxies.len() as u32,
                    current_count_change: 1,
                    last_publication_handle: Some(writer),
                }));
        }
        log::debug!(
            "[reader] {} matched writer {} (reliable={}, watermark={})",
            self.guid,
            writer,
            reliable,
            watermark
        );
        self.finish(pending);
        Ok(())
    }

    /// Stop tracking a writer. Its undelivered changes are discarded.
    pub fn matched_writer_remove(&self, writer: GUID) -> Result<()> {
        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            let proxy = inner.proxies.remove(&writer).ok_or(Error::NotMatched)?;
            if proxy.is_alive() {
                inner.alive_count = inner.alive_count.saturating_sub(1);
            } else {
                inner.not_alive_count = inner.not_alive_count.saturating_sub(1);
            }
            pending
                .events
                .push(ListenerEvent::SubscriptionMatched(SubscriptionMatchedStatus {
                    total_count: inner.total_matched,
                    total_count_change: 0,
                    current_count: inner.proxies.len() as u32,
                    current_count_change: -1,
                    last_publication_handle: Some(writer),
                }));
        }
        log::debug!("[reader] {} unmatched writer {}", self.guid, writer);
        self.finish(pending);
        Ok(())
    }

    pub fn matched_writers(&self) -> Vec<GUID> {
        self.inner.lock().proxies.keys().copied().collect()
    }

    /// Highest sequence number delivered (or skipped) for `writer`.
    pub fn writer_watermark(&self, writer: GUID) -> Option<SequenceNumber> {
        self.inner.lock().proxies.get(&writer).map(WriterProxy::watermark)
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Process a DATA from participant `source`; `timestamp` is the INFO_TS
    /// in force.
    pub fn process_data(&self, source: GuidPrefix, timestamp: Option<Timestamp>, data: &Data) {
        let writer = GUID::new(source, data.writer_id);
        self.metrics.increment_data_received(1);
        let now = Instant::now();

        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            if !self.touch_writer(&mut inner, writer, now, &mut pending) {
                return;
            }
            let Some(proxy) = inner.proxies.get_mut(&writer) else {
                return;
            };
            if proxy.is_known(data.writer_sn) {
                self.metrics.increment_duplicates_dropped(1);
                log::trace!("[reader] {} duplicate seq={} from {}", self.guid, data.writer_sn, writer);
                return;
            }

            let Some(mut change) = self.change_pool.reserve_cache() else {
                log::debug!("[reader] {} change pool exhausted, dropping seq={}", self.guid, data.writer_sn);
                return;
            };
            change.writer_guid = writer;
            change.sequence_number = data.writer_sn;
            change.source_timestamp = timestamp;
            change.reception_timestamp = Some(Timestamp::now());
            if let Some(qos) = &data.inline_qos {
                change.kind = qos.change_kind();
                change.instance_handle = qos.instance_handle();
            }
            if let Some(payload) = &data.payload {
                match self.payload_pool.get_payload_from(payload) {
                    Some(buffer) => change.serialized_payload = Some(buffer),
                    None => {
                        log::debug!(
                            "[reader] {} payload pool exhausted, dropping seq={}",
                            self.guid,
                            data.writer_sn
                        );
                        self.change_pool.release_cache(change);
                        return;
                    }
                }
            }

            let outcome = proxy.received_change_set(change);
            self.after_receive(&mut inner, writer, outcome, &mut pending);
        }
        self.finish(pending);
    }

    /// Process one DATA_FRAG. The sample is delivered once complete.
    pub fn process_data_frag(
        &self,
        source: GuidPrefix,
        timestamp: Option<Timestamp>,
        frag: &DataFrag,
    ) {
        let writer = GUID::new(source, frag.writer_id);
        let now = Instant::now();
        if frag.sample_size > MAX_FRAGMENTED_SAMPLE || frag.fragment_size == 0 {
            log::debug!(
                "[reader] {} refusing fragmented sample of {} bytes (fragment size {})",
                self.guid,
                frag.sample_size,
                frag.fragment_size
            );
            return;
        }

        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            if !self.touch_writer(&mut inner, writer, now, &mut pending) {
                return;
            }
            let Some(proxy) = inner.proxies.get_mut(&writer) else {
                return;
            };

            let start = || {
                let mut change = self.change_pool.reserve_cache()?;
                change.writer_guid = writer;
                change.sequence_number = frag.writer_sn;
                change.source_timestamp = timestamp;
                if let Some(qos) = &frag.inline_qos {
                    change.kind = qos.change_kind();
                    change.instance_handle = qos.instance_handle();
                }
                change.fragment_state = Some(FragmentState::new(frag.sample_size, frag.fragment_size));
                Some(change)
            };
            let outcome = proxy.received_fragment(
                frag.writer_sn,
                frag.fragment_starting_num,
                frag.fragments_in_submessage,
                &frag.payload,
                start,
            );

            match outcome {
                FragmentOutcome::Complete(mut change) => {
                    self.metrics.increment_data_received(1);
                    let assembled = change
                        .fragment_state
                        .take()
                        .and_then(|state| self.payload_pool.get_payload_from(state.data()));
                    let Some(payload) = assembled else {
                        log::debug!(
                            "[reader] {} payload pool exhausted, dropping seq={}",
                            self.guid,
                            frag.writer_sn
                        );
                        self.change_pool.release_cache(change);
                        return;
                    };
                    change.serialized_payload = Some(payload);
                    change.reception_timestamp = Some(Timestamp::now());
                    let outcome = proxy.received_change_set(change);
                    self.after_receive(&mut inner, writer, outcome, &mut pending);
                }
                FragmentOutcome::Duplicate => self.metrics.increment_duplicates_dropped(1),
                FragmentOutcome::Partial => {}
                FragmentOutcome::Invalid => {
                    log::debug!(
                        "[reader] {} inconsistent fragment {} of seq={} from {}",
                        self.guid,
                        frag.fragment_starting_num,
                        frag.writer_sn,
                        writer
                    );
                }
            }
        }
        self.finish(pending);
    }

    /// Process a HEARTBEAT from participant `source`.
    pub fn process_heartbeat(&self, source: GuidPrefix, hb: &Heartbeat) {
        let writer = GUID::new(source, hb.writer_id);
        let now = Instant::now();
        let timing = self.config.timing();

        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            if !self.touch_writer(&mut inner, writer, now, &mut pending) {
                return;
            }
            let Some(proxy) = inner.proxies.get_mut(&writer) else {
                return;
            };
            if !proxy.is_reliable() {
                return;
            }
            let Some(outcome) = proxy.process_heartbeat(hb) else {
                log::trace!("[reader] {} stale HEARTBEAT count={} from {}", self.guid, hb.count, writer);
                return;
            };
            if outcome.first && hb.first_sn > proxy.watermark() + 1 {
                log::debug!(
                    "[reader] {} first HEARTBEAT from {} starts at seq={}",
                    self.guid,
                    writer,
                    hb.first_sn
                );
            }

            let respond_at = if !hb.final_flag {
                Some(now + timing.heartbeat_response_delay)
            } else if proxy.has_missing_changes() {
                Some(now)
            } else if !proxy.is_acked_state() {
                Some(now + timing.heartbeat_response_delay)
            } else {
                None
            };

            if outcome.lost > 0 {
                self.record_lost(&mut inner, writer, outcome.lost, &mut pending);
            }
            self.drain(&mut inner, writer, &mut pending);

            if let Some(at) = respond_at {
                if let Some(proxy) = inner.proxies.get_mut(&writer) {
                    if at <= now {
                        pending.acknacks.extend(self.acknack_message(proxy, now));
                    } else {
                        proxy.schedule_acknack(at);
                        pending.schedule_at(at);
                    }
                }
            }
        }
        self.finish(pending);
    }

    /// Process a GAP from participant `source`.
    pub fn process_gap(&self, source: GuidPrefix, gap: &Gap) {
        let writer = GUID::new(source, gap.writer_id);
        let now = Instant::now();

        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            if !self.touch_writer(&mut inner, writer, now, &mut pending) {
                return;
            }
            let Some(proxy) = inner.proxies.get_mut(&writer) else {
                return;
            };
            proxy.irrelevant_change_set(gap.gap_start, gap.gap_list.base());
            for seq in gap.gap_list.iter() {
                proxy.irrelevant_change_set(seq, seq + 1);
            }
            log::trace!(
                "[reader] {} GAP [{}, {}) + {} from {}",
                self.guid,
                gap.gap_start,
                gap.gap_list.base(),
                gap.gap_list.iter().count(),
                writer
            );
            self.drain(&mut inner, writer, &mut pending);
        }
        self.finish(pending);
    }

    /// Send an ACKNACK to every matched reliable writer now.
    pub fn send_acknacks(&self) -> usize {
        let now = Instant::now();
        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            for proxy in inner.proxies.values_mut().filter(|p| p.is_reliable()) {
                pending.acknacks.extend(self.acknack_message(proxy, now));
            }
        }
        let sent = pending.acknacks.len();
        self.finish(pending);
        sent
    }

    /// Mark writers whose liveliness lease expired as not alive.
    /// Returns how many changed state.
    pub fn check_liveliness(&self, now: Instant) -> usize {
        let mut pending = Pending::default();
        let mut expired = 0;
        {
            let mut inner = self.inner.lock();
            let lapsed: Vec<GUID> = inner
                .proxies
                .values_mut()
                .filter_map(|p| p.check_lease(now).then(|| p.guid()))
                .collect();
            for writer in lapsed {
                expired += 1;
                inner.alive_count = inner.alive_count.saturating_sub(1);
                inner.not_alive_count += 1;
                log::debug!("[reader] {} writer {} lost liveliness", self.guid, writer);
                pending
                    .events
                    .push(ListenerEvent::LivelinessChanged(LivelinessChangedStatus {
                        alive_count: inner.alive_count,
                        alive_count_change: -1,
                        not_alive_count: inner.not_alive_count,
                        not_alive_count_change: 1,
                        last_publication_handle: Some(writer),
                    }));
            }
        }
        self.finish(pending);
        expired
    }

    fn on_timer(&self, tick: Tick) {
        let now = Instant::now();
        let retry = self.config.timing().acknack_retry_period;
        let mut pending = Pending::default();
        {
            let mut inner = self.inner.lock();
            for proxy in inner.proxies.values_mut().filter(|p| p.is_reliable()) {
                let scheduled = proxy.acknack_due().is_some_and(|due| due <= now);
                let retrying = tick == Tick::Periodic && proxy.retry_due(now, retry);
                if scheduled || retrying {
                    pending.acknacks.extend(self.acknack_message(proxy, now));
                } else if let Some(due) = proxy.acknack_due() {
                    pending.schedule_at(due);
                }
            }
        }
        self.finish(pending);
        if tick == Tick::Periodic {
            self.check_liveliness(now);
        }
    }

    // ========================================================================
    // Application boundary
    // ========================================================================

    /// Copies of up to `max` samples; they stay in the history as `Read`.
    pub fn read(&self, max: usize) -> Vec<Sample> {
        self.inner
            .lock()
            .history
            .read(max)
            .iter()
            .map(|(change, state)| Sample::from_change(change, *state))
            .collect()
    }

    /// Remove and return up to `max` samples, oldest first.
    ///
    /// Space freed in a full `KeepAll` history is used immediately for
    /// changes that were held back.
    pub fn take(&self, max: usize) -> Vec<Sample> {
        let mut pending = Pending::default();
        let samples = {
            let mut inner = self.inner.lock();
            let taken = inner.history.take(max);
            let samples: Vec<Sample> = taken
                .into_iter()
                .map(|(change, state)| {
                    let sample = Sample::from_change(&change, state);
                    inner.history.recycle(change);
                    sample
                })
                .collect();
            if !samples.is_empty() {
                let writers: Vec<GUID> = inner.proxies.keys().copied().collect();
                for writer in writers {
                    let before = inner.proxies.get(&writer).map(WriterProxy::watermark);
                    self.drain(&mut inner, writer, &mut pending);
                    let after = inner.proxies.get(&writer).map(WriterProxy::watermark);
                    if after > before {
                        if let Some(proxy) = inner.proxies.get_mut(&writer) {
                            if proxy.is_reliable() {
                                let now = Instant::now();
                                proxy.schedule_acknack(now);
                                pending.schedule_at(now);
                            }
                        }
                    }
                }
            }
            samples
        };
        self.finish(pending);
        samples
    }

    /// Block until at least one unread sample is available.
    pub fn wait_for_unread(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.history.unread_count() == 0 {
            if self.data_available.wait_until(&mut inner, deadline).timed_out() {
                return inner.history.unread_count() > 0;
            }
        }
        true
    }

    pub fn unread_count(&self) -> usize {
        self.inner.lock().history.unread_count()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Liveliness bookkeeping for any traffic from `writer`. False when the
    /// writer is not matched.
    fn touch_writer(
        &self,
        inner: &mut ReaderInner,
        writer: GUID,
        now: Instant,
        pending: &mut Pending,
    ) -> bool {
        let Some(proxy) = inner.proxies.get_mut(&writer) else {
            log::trace!("[reader] {} ignoring unmatched writer {}", self.guid, writer);
            return false;
        };
        if proxy.assert_liveliness(now) {
            inner.alive_count += 1;
            inner.not_alive_count = inner.not_alive_count.saturating_sub(1);
            pending
                .events
                .push(ListenerEvent::LivelinessChanged(LivelinessChangedStatus {
                    alive_count: inner.alive_count,
                    alive_count_change: 1,
                    not_alive_count: inner.not_alive_count,
                    not_alive_count_change: -1,
                    last_publication_handle: Some(writer),
                }));
        }
        true
    }

    fn after_receive(
        &self,
        inner: &mut ReaderInner,
        writer: GUID,
        outcome: ReceiveOutcome,
        pending: &mut Pending,
    ) {
        match outcome {
            ReceiveOutcome::Duplicate => {
                self.metrics.increment_duplicates_dropped(1);
                return;
            }
            ReceiveOutcome::Accepted { out_of_order } => {
                if out_of_order {
                    self.metrics.increment_out_of_order(1);
                }
            }
            ReceiveOutcome::AcceptedWithLoss { lost } => {
                self.record_lost(inner, writer, lost, pending);
            }
        }
        self.drain(inner, writer, pending);
    }

    fn record_lost(&self, inner: &mut ReaderInner, writer: GUID, lost: u64, pending: &mut Pending) {
        self.metrics.record_lost(lost);
        let change = i32::try_from(lost).unwrap_or(i32::MAX);
        inner.lost_total = inner.lost_total.saturating_add(change as u32);
        log::debug!("[reader] {} lost {} samples from {}", self.guid, lost, writer);
        pending.events.push(ListenerEvent::SampleLost(SampleLostStatus {
            total_count: inner.lost_total,
            total_count_change: change,
            last_publication_handle: Some(writer),
        }));
    }

    /// Deliver what is next in sequence from `writer`.
    fn drain(&self, inner: &mut ReaderInner, writer: GUID, pending: &mut Pending) {
        let ReaderInner {
            history,
            proxies,
            rejected_total,
            ..
        } = inner;
        let Some(proxy) = proxies.get_mut(&writer) else {
            return;
        };
        let before = proxy.watermark();
        let delivery = proxy.deliver_ready(history);
        let after = proxy.watermark();

        if delivery.delivered > 0 {
            pending.data_available = true;
        }
        if let Some(seq) = delivery.rejected {
            *rejected_total += 1;
            self.metrics.increment_samples_rejected(1);
            log::debug!(
                "[reader] {} history full, holding seq={} from {}",
                self.guid,
                seq,
                writer
            );
            pending
                .events
                .push(ListenerEvent::SampleRejected(SampleRejectedStatus {
                    total_count: *rejected_total,
                    total_count_change: 1,
                    last_reason: SampleRejectedReason::ResourceLimit,
                }));
        }
        if after > before && self.sequence_store.is_some() {
            pending.persist.push((writer, after));
        }
    }

    fn acknack_message(
        &self,
        proxy: &mut WriterProxy,
        now: Instant,
    ) -> Option<(Vec<Locator>, Vec<Vec<u8>>)> {
        let acknack = proxy.build_acknack(self.guid.entity_id, now);
        let mut builder = MessageBuilder::new(self.guid.prefix, self.transport.max_message_size())
            .with_destination(proxy.guid().prefix);
        if let Err(e) = builder.add(&Submessage::AckNack(acknack)) {
            log::warn!("[reader] {} cannot encode ACKNACK: {}", self.guid, e);
            return None;
        }
        log::trace!(
            "[reader] {} ACKNACK to {} base={} missing={}",
            self.guid,
            proxy.guid(),
            acknack.ack_base(),
            acknack.requested().count()
        );
        Some((proxy.destinations().to_vec(), builder.finish()))
    }

    /// Carry out side effects collected under the lock.
    fn finish(&self, pending: Pending) {
        let Pending {
            mut events,
            acknacks,
            persist,
            schedule,
            data_available,
        } = pending;

        if data_available {
            self.data_available.notify_all();
            events.push(ListenerEvent::DataAvailable { reader: self.guid });
        }

        for (destinations, messages) in acknacks {
            self.metrics.increment_acknacks_sent(1);
            for message in &messages {
                for destination in &destinations {
                    if !self.transport.send(destination, message) {
                        log::debug!(
                            "[reader] {} ACKNACK to {:?} not sent",
                            self.guid,
                            destination
                        );
                    }
                }
            }
        }

        if let Some(store) = &self.sequence_store {
            for (writer, watermark) in persist {
                if let Err(e) = store.store(self.guid, writer, watermark) {
                    log::warn!(
                        "[reader] {} failed to persist watermark {} for {}: {}",
                        self.guid,
                        watermark,
                        writer,
                        e
                    );
                }
            }
        }

        if let Some(at) = schedule {
            if let Some(timer) = self.timer.lock().as_ref() {
                timer.schedule(at);
            }
        }

        if let Some(listener) = &self.listener {
            for event in events {
                event.deliver_to_reader(listener.as_ref());
            }
        }
    }
}

impl Drop for StatefulReader {
    fn drop(&mut self) {
        self.timer.get_mut().take();
        log::debug!("[reader] {} dropped", self.guid);
    }
}

impl std::fmt::Debug for StatefulReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulReader")
            .field("guid", &self.guid)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}
