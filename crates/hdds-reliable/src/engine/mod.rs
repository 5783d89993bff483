// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime machinery: endpoint timers, the asynchronous delivery thread and
//! inbound routing.

mod dispatcher;
mod scheduler;
mod timer;

pub use dispatcher::{DispatchMetrics, Dispatcher};
pub use scheduler::AsyncDeliveryScheduler;
pub use timer::{PeriodicTimer, Tick};
