// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core RTPS types, cache changes and pooled memory.

pub mod change;
pub mod rt;
pub mod types;

pub use change::{CacheChange, FragmentState};
pub use types::{
    ChangeKind, EntityId, GuidPrefix, InstanceHandle, Locator, SequenceNumber, Timestamp, GUID,
    SEQUENCENUMBER_UNKNOWN,
};
