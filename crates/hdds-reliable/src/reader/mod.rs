// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader side of the reliability protocol.
//!
//! [`StatefulReader`] keeps one [`WriterProxy`] per matched writer, delivers
//! changes to its [`ReaderHistory`](crate::history::ReaderHistory) strictly in
//! sequence order and answers HEARTBEATs with ACKNACKs.

mod sample;
mod stateful;
mod writer_proxy;

pub use sample::{Sample, SampleInfo};
pub use stateful::StatefulReader;
pub use writer_proxy::{
    Delivery, FragmentOutcome, HeartbeatOutcome, ReceiveOutcome, WriterProxy,
};
