// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime memory: payload buffers and change records.
//!
//! Pools are created explicitly and shared through `Arc`; there is no
//! process-wide pool.

pub mod change_pool;
pub mod payload_pool;

pub use change_pool::ChangePool;
pub use payload_pool::{MemoryPolicy, PayloadHandle, PayloadPool, PoolConfig, SerializedPayload};
