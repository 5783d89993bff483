// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Samples handed to the application by `read()` / `take()`.

use crate::core::{CacheChange, ChangeKind, InstanceHandle, SequenceNumber, Timestamp, GUID};
use crate::history::SampleState;

/// Metadata accompanying a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// `Read` when the sample was returned by an earlier `read()`.
    pub sample_state: SampleState,
    pub kind: ChangeKind,
    pub instance_handle: InstanceHandle,
    /// Writer that published the sample.
    pub publication_handle: GUID,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Option<Timestamp>,
    pub reception_timestamp: Option<Timestamp>,
    /// False for dispose/unregister notifications, which carry no data.
    pub valid_data: bool,
}

/// A delivered sample: payload bytes plus [`SampleInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    pub info: SampleInfo,
}

impl Sample {
    pub(crate) fn from_change(change: &CacheChange, state: SampleState) -> Self {
        Self {
            data: change.payload_to_vec(),
            info: SampleInfo {
                sample_state: state,
                kind: change.kind,
                instance_handle: change.instance_handle,
                publication_handle: change.writer_guid,
                sequence_number: change.sequence_number,
                source_timestamp: change.source_timestamp,
                reception_timestamp: change.reception_timestamp,
                valid_data: change.kind == ChangeKind::Alive,
            },
        }
    }
}
