// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer side of the reliability protocol.
//!
//! [`StatefulWriter`] owns the [`WriterHistory`](crate::history::WriterHistory)
//! and keeps one [`ReaderProxy`] per matched reader. It answers ACKNACKs with
//! repairs or GAPs and announces its history range with HEARTBEATs.

mod reader_proxy;
mod stateful;

pub use reader_proxy::{ChangeForReaderStatus, NackOutcome, ReaderProxy};
pub use stateful::StatefulWriter;
