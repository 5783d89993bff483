// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint Listener Traits
//!
//! Listeners provide callback-based notification for endpoint events. Every
//! method has a default no-op body, so implementers override only what they
//! need. The same events are available as [`ListenerEvent`] values through
//! [`ChannelListener`] (crossbeam channel) or [`ClosureListener`].
//!
//! # Thread Safety
//!
//! Callbacks run on whichever thread drove the event (application thread,
//! transport receive thread, timer thread), always after the endpoint lock
//! was released. They must be `Send + Sync` and should not block.

use crossbeam::channel::{self, Receiver, Sender};

use crate::core::{SequenceNumber, GUID};

/// Status information for subscription matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    /// Total cumulative count of matched publications.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Current number of matched publications.
    pub current_count: u32,
    /// Change in current_count since last callback.
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched publication.
    pub last_publication_handle: Option<GUID>,
}

/// Status information for publication matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationMatchedStatus {
    /// Total cumulative count of matched subscriptions.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Current number of matched subscriptions.
    pub current_count: u32,
    /// Change in current_count since last callback.
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched subscription.
    pub last_subscription_handle: Option<GUID>,
}

/// Status information for liveliness changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivelinessChangedStatus {
    /// Number of matched writers currently alive.
    pub alive_count: u32,
    /// Change in alive_count since last callback.
    pub alive_count_change: i32,
    /// Number of matched writers whose lease expired.
    pub not_alive_count: u32,
    /// Change in not_alive_count since last callback.
    pub not_alive_count_change: i32,
    /// GUID of the last writer to change liveliness.
    pub last_publication_handle: Option<GUID>,
}

/// Status information for sample lost events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleLostStatus {
    /// Total cumulative count of lost samples.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Writer whose samples were lost.
    pub last_publication_handle: Option<GUID>,
}

/// Status information for sample rejected events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRejectedStatus {
    /// Total cumulative count of rejected samples.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Reason for rejection.
    pub last_reason: SampleRejectedReason,
}

/// Reason why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleRejectedReason {
    /// Sample was not rejected.
    #[default]
    NotRejected,
    /// Sample rejected due to resource limits (max_samples).
    ResourceLimit,
    /// Sample rejected due to instance limits (max_instances).
    InstanceLimit,
    /// Sample rejected due to samples-per-instance limit.
    SamplesPerInstanceLimit,
}

/// Listener for reader events.
pub trait ReaderListener: Send + Sync {
    /// Called when new samples can be read or taken.
    fn on_data_available(&self, reader: GUID) {
        let _ = reader;
    }

    /// Called when the reader matches or unmatches with a writer.
    fn on_subscription_matched(&self, status: SubscriptionMatchedStatus) {
        let _ = status;
    }

    /// Called when liveliness of a matched writer changes.
    fn on_liveliness_changed(&self, status: LivelinessChangedStatus) {
        let _ = status;
    }

    /// Called when samples are lost (sequence numbers skipped for good).
    fn on_sample_lost(&self, status: SampleLostStatus) {
        let _ = status;
    }

    /// Called when samples are rejected due to resource limits.
    fn on_sample_rejected(&self, status: SampleRejectedStatus) {
        let _ = status;
    }
}

/// Listener for writer events.
pub trait WriterListener: Send + Sync {
    /// Called after a sample is added to the writer history.
    fn on_sample_written(&self, writer: GUID, sequence_number: SequenceNumber) {
        let _ = (writer, sequence_number);
    }

    /// Called when the writer matches or unmatches with a reader.
    fn on_publication_matched(&self, status: PublicationMatchedStatus) {
        let _ = status;
    }
}

/// Any endpoint event, as delivered by [`ChannelListener`] and [`ClosureListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    PublicationMatched(PublicationMatchedStatus),
    SubscriptionMatched(SubscriptionMatchedStatus),
    SampleWritten {
        writer: GUID,
        sequence_number: SequenceNumber,
    },
    DataAvailable {
        reader: GUID,
    },
    SampleLost(SampleLostStatus),
    SampleRejected(SampleRejectedStatus),
    LivelinessChanged(LivelinessChangedStatus),
}

impl ListenerEvent {
    /// True for a match (as opposed to unmatch) event.
    pub fn is_match(&self) -> bool {
        match self {
            ListenerEvent::PublicationMatched(s) => s.current_count_change > 0,
            ListenerEvent::SubscriptionMatched(s) => s.current_count_change > 0,
            _ => false,
        }
    }

    /// True for an unmatch event.
    pub fn is_unmatch(&self) -> bool {
        match self {
            ListenerEvent::PublicationMatched(s) => s.current_count_change < 0,
            ListenerEvent::SubscriptionMatched(s) => s.current_count_change < 0,
            _ => false,
        }
    }

    pub(crate) fn deliver_to_reader(self, listener: &dyn ReaderListener) {
        match self {
            ListenerEvent::SubscriptionMatched(s) => listener.on_subscription_matched(s),
            ListenerEvent::DataAvailable { reader } => listener.on_data_available(reader),
            ListenerEvent::SampleLost(s) => listener.on_sample_lost(s),
            ListenerEvent::SampleRejected(s) => listener.on_sample_rejected(s),
            ListenerEvent::LivelinessChanged(s) => listener.on_liveliness_changed(s),
            ListenerEvent::PublicationMatched(_) | ListenerEvent::SampleWritten { .. } => {}
        }
    }

    pub(crate) fn deliver_to_writer(self, listener: &dyn WriterListener) {
        match self {
            ListenerEvent::PublicationMatched(s) => listener.on_publication_matched(s),
            ListenerEvent::SampleWritten {
                writer,
                sequence_number,
            } => listener.on_sample_written(writer, sequence_number),
            _ => {}
        }
    }
}

/// Listener forwarding every event into a crossbeam channel.
///
/// # Example
///
/// ```
/// use hdds_reliable::dds::{ChannelListener, ListenerEvent, ReaderListener};
/// use hdds_reliable::core::GUID;
///
/// let (listener, events) = ChannelListener::unbounded();
/// listener.on_data_available(GUID::unknown());
/// assert!(matches!(events.try_recv(), Ok(ListenerEvent::DataAvailable { .. })));
/// ```
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: Sender<ListenerEvent>,
}

impl ChannelListener {
    /// Listener plus the receiving end of its unbounded channel.
    pub fn unbounded() -> (Self, Receiver<ListenerEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    /// Listener over an existing sender.
    pub fn new(tx: Sender<ListenerEvent>) -> Self {
        Self { tx }
    }

    fn push(&self, event: ListenerEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[listener] event dropped: receiver gone");
        }
    }
}

impl ReaderListener for ChannelListener {
    fn on_data_available(&self, reader: GUID) {
        self.push(ListenerEvent::DataAvailable { reader });
    }
    fn on_subscription_matched(&self, status: SubscriptionMatchedStatus) {
        self.push(ListenerEvent::SubscriptionMatched(status));
    }
    fn on_liveliness_changed(&self, status: LivelinessChangedStatus) {
        self.push(ListenerEvent::LivelinessChanged(status));
    }
    fn on_sample_lost(&self, status: SampleLostStatus) {
        self.push(ListenerEvent::SampleLost(status));
    }
    fn on_sample_rejected(&self, status: SampleRejectedStatus) {
        self.push(ListenerEvent::SampleRejected(status));
    }
}

impl WriterListener for ChannelListener {
    fn on_sample_written(&self, writer: GUID, sequence_number: SequenceNumber) {
        self.push(ListenerEvent::SampleWritten {
            writer,
            sequence_number,
        });
    }
    fn on_publication_matched(&self, status: PublicationMatchedStatus) {
        self.push(ListenerEvent::PublicationMatched(status));
    }
}

/// Closure-based listener receiving every event as a [`ListenerEvent`].
pub struct ClosureListener<F: Fn(ListenerEvent) + Send + Sync> {
    callback: F,
}

impl<F: Fn(ListenerEvent) + Send + Sync> ClosureListener<F> {
    /// Create a new closure-based listener.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: Fn(ListenerEvent) + Send + Sync> ReaderListener for ClosureListener<F> {
    fn on_data_available(&self, reader: GUID) {
        (self.callback)(ListenerEvent::DataAvailable { reader });
    }
    fn on_subscription_matched(&self, status: SubscriptionMatchedStatus) {
        (self.callback)(ListenerEvent::SubscriptionMatched(status));
    }
    fn on_liveliness_changed(&self, status: LivelinessChangedStatus) {
        (self.callback)(ListenerEvent::LivelinessChanged(status));
    }
    fn on_sample_lost(&self, status: SampleLostStatus) {
        (self.callback)(ListenerEvent::SampleLost(status));
    }
    fn on_sample_rejected(&self, status: SampleRejectedStatus) {
        (self.callback)(ListenerEvent::SampleRejected(status));
    }
}

impl<F: Fn(ListenerEvent) + Send + Sync> WriterListener for ClosureListener<F> {
    fn on_sample_written(&self, writer: GUID, sequence_number: SequenceNumber) {
        (self.callback)(ListenerEvent::SampleWritten {
            writer,
            sequence_number,
        });
    }
    fn on_publication_matched(&self, status: PublicationMatchedStatus) {
        (self.callback)(ListenerEvent::PublicationMatched(status));
    }
}
