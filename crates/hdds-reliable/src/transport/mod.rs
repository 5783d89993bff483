// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport boundary.
//!
//! The engine only needs at-least-effort datagram delivery with a maximum
//! message size. Socket transports live outside this crate and plug in through
//! [`Transport`]; received messages are handed to a [`ReceiveHandler`]
//! (normally the participant's [`Dispatcher`](crate::engine::Dispatcher)).
//!
//! [`LoopbackNetwork`] is an in-process implementation with one receive
//! thread per bound locator and optional loss injection.

mod loopback;

pub use loopback::{DropFilter, LoopbackBinding, LoopbackNetwork, LoopbackStats, LoopbackTransport};

use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::core::Locator;

/// Outbound datagram path used by writers and readers.
pub trait Transport: Send + Sync {
    /// Send one complete RTPS message to `destination`.
    ///
    /// Returns `false` when the message could not be handed over (no route,
    /// would block). Callers treat that as "not yet sent".
    fn send(&self, destination: &Locator, buf: &[u8]) -> bool;

    /// Largest message this transport accepts.
    fn max_message_size(&self) -> usize {
        DEFAULT_MAX_MESSAGE_SIZE
    }
}

/// Inbound datagram sink.
pub trait ReceiveHandler: Send + Sync {
    /// Called once per received message, on the transport's receive thread.
    fn on_message(&self, source: &Locator, buf: &[u8]);
}
