// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint histories.
//!
//! [`WriterHistory`] holds the changes a local writer keeps for (re)transmission,
//! indexed by sequence number. [`ReaderHistory`] holds the changes a local
//! reader delivered, keyed by `(writer_guid, sequence_number)`, until the
//! application takes them.
//!
//! Both enforce the QoS history kind and resource limits:
//!
//! | Kind | Instance at depth | `max_samples` reached |
//! |------|-------------------|-----------------------|
//! | `KeepLast(n)` | evict oldest of the instance | evict oldest |
//! | `KeepAll` | reject | reject |
//!
//! Histories are plain single-owner structures; the owning endpoint
//! serializes access under its own mutex.

mod reader_history;
mod writer_history;

pub use reader_history::{ReaderHistory, SampleState};
pub use writer_history::{Admission, WriterHistory};
