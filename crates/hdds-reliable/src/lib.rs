// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HDDS Reliable - RTPS reliable-communication engine
//!
//! Writer and reader histories, the sequence-numbered change lifecycle, the
//! HEARTBEAT / ACKNACK / GAP state machines and the pooled memory model that
//! a DDS implementation builds its DataWriters and DataReaders on.
//!
//! ## Quick Start
//!
//! ```rust
//! use hdds_reliable::config::ReliabilityTiming;
//! use hdds_reliable::core::Locator;
//! use hdds_reliable::dds::{DomainRegistry, Result};
//! use hdds_reliable::endpoint::PublishMode;
//! use hdds_reliable::participant::RtpsParticipant;
//! use hdds_reliable::qos::QosProfile;
//! use hdds_reliable::transport::LoopbackNetwork;
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let registry = DomainRegistry::init();
//!     let network = LoopbackNetwork::new();
//!     let alice = RtpsParticipant::builder([1; 12])
//!         .timing(ReliabilityTiming::fast())
//!         .build_loopback(&registry, &network, Locator::udpv4([127, 0, 0, 1], 7400))?;
//!     let bob = RtpsParticipant::builder([2; 12])
//!         .timing(ReliabilityTiming::fast())
//!         .build_loopback(&registry, &network, Locator::udpv4([127, 0, 0, 1], 7401))?;
//!
//!     let writer = alice.create_writer(QosProfile::reliable(), PublishMode::Synchronous, None)?;
//!     let reader = bob.create_reader(QosProfile::reliable(), None)?;
//!
//!     // Discovery is external: announce the match to both sides.
//!     writer.matched_reader_add(reader.remote_descriptor())?;
//!     reader.matched_writer_add(writer.remote_descriptor())?;
//!
//!     writer.write(b"42")?;
//!     writer.wait_for_acknowledgments(Duration::from_secs(5))?;
//!     assert_eq!(reader.take(1)[0].data, b"42");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  RtpsParticipant  (DomainRegistry entry, endpoint factory)          |
//! +-----------------------------+---------------------------------------+
//! |  StatefulWriter             |  StatefulReader                       |
//! |   WriterHistory             |   ReaderHistory                       |
//! |   ReaderProxy per reader    |   WriterProxy per writer              |
//! +-----------------------------+---------------------------------------+
//! |  PayloadPool / ChangePool   |  AsyncDeliveryScheduler | Dispatcher  |
//! +---------------------------------------------------------------------+
//! |  protocol: RTPS submessage codec, MessageBuilder, MessageReceiver   |
//! +---------------------------------------------------------------------+
//! |  transport: Transport trait (sockets external), LoopbackNetwork     |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RtpsParticipant`] | Factory for writers and readers sharing pools and transport |
//! | [`StatefulWriter`] | Reliable/best-effort writer with per-reader state |
//! | [`StatefulReader`] | In-order, at-most-once delivery per matched writer |
//! | [`QosProfile`] | Reliability, history, durability and resource limits |
//! | [`Error`] | Error taxonomy of the engine |

/// Protocol constants and runtime configuration.
pub mod config;
/// GUIDs, sequence numbers, cache changes and the memory pools.
pub mod core;
/// Errors, listeners and the domain registry.
pub mod dds;
/// Remote endpoint descriptors and the context endpoints are built with.
pub mod endpoint;
/// Timers, asynchronous delivery and inbound routing.
pub mod engine;
/// Writer and reader history caches.
pub mod history;
/// Endpoint factory.
pub mod participant;
/// Sequence-number persistence.
pub mod persistence;
/// RTPS submessage codec.
pub mod protocol;
/// QoS policies relevant to reliability.
pub mod qos;
/// Reader side of the reliability protocol.
pub mod reader;
/// Sequence numbering and reliability counters.
pub mod reliability;
/// Transport boundary and in-process loopback.
pub mod transport;
/// Writer side of the reliability protocol.
pub mod writer;

pub use dds::{Error, Result};
pub use participant::RtpsParticipant;
pub use qos::QosProfile;
pub use reader::{Sample, SampleInfo, StatefulReader};
pub use writer::StatefulWriter;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
