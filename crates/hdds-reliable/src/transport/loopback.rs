// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process datagram network.
//!
//! Every bound locator owns a crossbeam channel drained by a dedicated
//! `hdds-loopback` thread, so a send never runs the receiver's handler on the
//! sender's stack (no endpoint lock re-entry).
//!
//! ```text
//! LoopbackTransport::send(dst) --> routes[dst] --channel--> rx thread --> handler.on_message()
//!                               |
//!                               +-- drop filter (loss injection)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{ReceiveHandler, Transport};
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::core::Locator;
use crate::dds::{Error, Result};

/// Loss predicate: returns `true` to drop the message sent to the locator.
pub type DropFilter = Arc<dyn Fn(&Locator, &[u8]) -> bool + Send + Sync>;

type Datagram = (Locator, Vec<u8>);

/// Counters of a [`LoopbackNetwork`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Messages queued to a bound locator.
    pub delivered: u64,
    /// Messages discarded by the drop filter.
    pub dropped: u64,
    /// Messages sent to a locator nobody bound.
    pub unroutable: u64,
}

/// Shared in-process "wire" connecting loopback transports.
pub struct LoopbackNetwork {
    routes: DashMap<Locator, Sender<Datagram>>,
    drop_filter: RwLock<Option<DropFilter>>,
    max_message_size: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    unroutable: AtomicU64,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Network whose transports refuse messages above `max_message_size`.
    pub fn with_max_message_size(max_message_size: usize) -> Arc<Self> {
        Arc::new(Self {
            routes: DashMap::new(),
            drop_filter: RwLock::new(None),
            max_message_size,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            unroutable: AtomicU64::new(0),
        })
    }

    /// Install a loss predicate applied to every send.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: Fn(&Locator, &[u8]) -> bool + Send + Sync + 'static,
    {
        *self.drop_filter.write() = Some(Arc::new(filter));
    }

    /// Remove the loss predicate.
    pub fn clear_drop_filter(&self) {
        *self.drop_filter.write() = None;
    }

    /// Outbound transport whose messages carry `local` as source.
    pub fn transport(self: &Arc<Self>, local: Locator) -> LoopbackTransport {
        LoopbackTransport {
            network: Arc::clone(self),
            local,
        }
    }

    /// Deliver messages addressed to `locator` to `handler`.
    ///
    /// The receive thread stops when the returned binding is dropped or the
    /// handler is gone.
    pub fn bind(
        self: &Arc<Self>,
        locator: Locator,
        handler: Weak<dyn ReceiveHandler>,
    ) -> Result<LoopbackBinding> {
        let (tx, rx) = channel::unbounded::<Datagram>();
        match self.routes.entry(locator) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::InvalidState(format!(
                    "loopback locator {:?} already bound",
                    locator
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let spawned = thread::Builder::new()
            .name("hdds-loopback".into())
            .spawn(move || {
                for (source, buf) in rx {
                    let Some(handler) = handler.upgrade() else {
                        break;
                    };
                    handler.on_message(&source, &buf);
                }
                log::trace!("[loopback] receive thread for {:?} exiting", locator);
            });

        match spawned {
            Ok(thread) => {
                log::debug!("[loopback] bound {:?}", locator);
                Ok(LoopbackBinding {
                    network: Arc::clone(self),
                    locator,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                self.routes.remove(&locator);
                Err(Error::IoError(e))
            }
        }
    }

    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
        }
    }

    fn route(&self, source: Locator, destination: &Locator, buf: &[u8]) -> bool {
        if buf.len() > self.max_message_size {
            log::debug!(
                "[loopback] {} byte message exceeds max {}",
                buf.len(),
                self.max_message_size
            );
            return false;
        }

        let filter = self.drop_filter.read().clone();
        if let Some(filter) = filter {
            if filter(destination, buf) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                // Lost on the wire; the sender cannot tell.
                return true;
            }
        }

        let Some(route) = self.routes.get(destination) else {
            self.unroutable.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if route.send((source, buf.to_vec())).is_ok() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

/// Sending side bound to one source locator.
#[derive(Clone)]
pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    local: Locator,
}

impl LoopbackTransport {
    pub fn local_locator(&self) -> Locator {
        self.local
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, destination: &Locator, buf: &[u8]) -> bool {
        self.network.route(self.local, destination, buf)
    }

    fn max_message_size(&self) -> usize {
        self.network.max_message_size
    }
}

/// Receive registration; unbinds and joins the receive thread on drop.
pub struct LoopbackBinding {
    network: Arc<LoopbackNetwork>,
    locator: Locator,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackBinding {
    pub fn locator(&self) -> Locator {
        self.locator
    }
}

impl Drop for LoopbackBinding {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel and ends the thread.
        self.network.routes.remove(&self.locator);
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        log::debug!("[loopback] unbound {:?}", self.locator);
    }
}
