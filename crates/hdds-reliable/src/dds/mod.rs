// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Application-facing boundary
//!
//! Error taxonomy, listener callbacks and the explicit domain registry.
//!
//! The reliability engine reports only two user-visible failures for
//! reliability backpressure: a `write()` that exceeded `max_blocking_time`
//! ([`Error::WriteTimeout`]) and a `wait_for_acknowledgments()` that timed out
//! ([`Error::AckTimeout`]). Transport hiccups, protocol inconsistencies and
//! evicted data are recovered internally and only logged.

mod domain_registry;
/// Listener traits and status types for endpoint events.
pub mod listener;

pub use domain_registry::{DomainId, DomainRegistry, ParticipantEntry};
pub use listener::{
    ChannelListener, ClosureListener, ListenerEvent, LivelinessChangedStatus,
    PublicationMatchedStatus, ReaderListener, SampleLostStatus, SampleRejectedReason,
    SampleRejectedStatus, SubscriptionMatchedStatus, WriterListener,
};

use crate::protocol::{DecodeError, EncodeError};

/// Errors returned by the reliable-communication engine.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// QoS policy is invalid (e.g., zero depth, conflicting limits).
    InvalidQos(String),
    /// Requested feature or policy is not supported.
    Unsupported(&'static str),
    /// Invalid state for the requested operation.
    InvalidState(String),

    // ========================================================================
    // Matching Errors
    // ========================================================================
    /// Remote endpoint is not matched with this endpoint.
    NotMatched,
    /// Remote endpoint is already matched.
    AlreadyMatched,

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Pool exhausted (payload or change records) under a bounded policy.
    OutOfResources,
    /// Resource limit exceeded (history depth, max_samples, etc.).
    ResourceLimitExceeded(String),
    /// Change with the same (writer, sequence number) already present.
    DuplicateChange,
    /// Write blocked longer than `max_blocking_time`.
    WriteTimeout,
    /// `wait_for_acknowledgments` timed out; history state unchanged.
    AckTimeout,

    // ========================================================================
    // Wire / IO Errors
    // ========================================================================
    /// Submessage encoding failed.
    Encode(EncodeError),
    /// Message or submessage decoding failed.
    Decode(DecodeError),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
    /// Sequence checkpoint database failure.
    Storage(rusqlite::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Configuration
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
            Error::Unsupported(what) => write!(f, "Unsupported: {}", what),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            // Matching
            Error::NotMatched => write!(f, "Remote endpoint not matched"),
            Error::AlreadyMatched => write!(f, "Remote endpoint already matched"),
            // Resource
            Error::OutOfResources => write!(f, "Out of pool resources"),
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            Error::DuplicateChange => write!(f, "Duplicate change"),
            Error::WriteTimeout => write!(f, "Write timeout"),
            Error::AckTimeout => write!(f, "Timed out waiting for acknowledgments"),
            // Wire / IO
            Error::Encode(e) => write!(f, "Encode error: {}", e),
            Error::Decode(e) => write!(f, "Decode error: {}", e),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::Encode(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Error::Encode(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

/// Convenient alias for engine results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
