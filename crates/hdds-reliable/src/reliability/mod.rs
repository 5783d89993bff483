// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Reliability building blocks
//!
//! Sequence numbering and observability counters shared by the stateful
//! writer and reader.
//!
//! ## Protocol Flow
//!
//! ```text
//! Writer                                    Reader
//!   |                                          |
//!   |--- DATA (seq=1) ------------------------>|
//!   |--- DATA (seq=2) ----------X (lost)       |
//!   |--- DATA (seq=3) ------------------------>|  (held in received_ahead)
//!   |                                          |
//!   |--- HEARTBEAT (first=1, last=3) -------->|
//!   |                                          | (seq=2 missing)
//!   |<-- ACKNACK (base=2, set={2}) -----------|
//!   |                                          |
//!   |--- DATA (seq=2) [repair] -------------->|
//!   |                                          | (2 and 3 delivered in order)
//!   |<-- ACKNACK (base=4, set={}) ------------|
//! ```
//!
//! The protocol state machines themselves live in
//! [`writer::ReaderProxy`](crate::writer::ReaderProxy) and
//! [`reader::WriterProxy`](crate::reader::WriterProxy).

mod metrics;
mod seq;

pub use metrics::{MetricsSnapshot, ReliableMetrics};
pub use seq::SeqNumGenerator;
pub use crate::protocol::rtps::SequenceNumberSet;
