// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Asynchronous delivery thread.
//!
//! Writers in [`PublishMode::Asynchronous`](crate::endpoint::PublishMode)
//! only enqueue on `write()` and call [`AsyncDeliveryScheduler::wake_up`].
//! One `hdds-async-writer` thread per scheduler drains the wake-ups: every
//! wake-up received while a pass was running is coalesced into an interest
//! set, and each interested writer gets one `send_any_unsent_changes()` call
//! per pass.
//!
//! The thread starts with the first registered writer and stops when the
//! last one unregisters.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::core::GUID;
use crate::dds::Result;
use crate::writer::StatefulWriter;

enum Command {
    WakeUp(GUID),
    Stop,
}

struct Worker {
    tx: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Shared delivery thread for asynchronous writers of one participant.
pub struct AsyncDeliveryScheduler {
    writers: Arc<DashMap<GUID, Weak<StatefulWriter>>>,
    worker: Mutex<Option<Worker>>,
}

impl AsyncDeliveryScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            writers: Arc::new(DashMap::new()),
            worker: Mutex::new(None),
        })
    }

    /// Register `writer`, starting the delivery thread if needed.
    pub fn register_writer(&self, writer: &Arc<StatefulWriter>) -> Result<()> {
        let mut worker = self.worker.lock();
        self.writers.insert(writer.guid(), Arc::downgrade(writer));
        if worker.is_none() {
            let (tx, rx) = channel::unbounded();
            let writers = Arc::clone(&self.writers);
            let spawned = thread::Builder::new()
                .name("hdds-async-writer".into())
                .spawn(move || run(&writers, &rx));
            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    self.writers.remove(&writer.guid());
                    return Err(e.into());
                }
            };
            log::debug!("[async] delivery thread started");
            *worker = Some(Worker { tx, handle });
        }
        Ok(())
    }

    /// Forget `guid`; the thread stops once no writer is left.
    pub fn unregister_writer(&self, guid: GUID) {
        let stopped = {
            let mut worker = self.worker.lock();
            self.writers.remove(&guid);
            if self.writers.is_empty() {
                worker.take()
            } else {
                None
            }
        };
        if let Some(Worker { tx, handle }) = stopped {
            let _ = tx.send(Command::Stop);
            drop(tx);
            // A writer may be dropped by the delivery thread itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            log::debug!("[async] delivery thread stopped");
        }
    }

    /// Request a send pass for `guid`.
    pub fn wake_up(&self, guid: GUID) {
        if let Some(worker) = self.worker.lock().as_ref() {
            let _ = worker.tx.send(Command::WakeUp(guid));
        }
    }

    pub fn registered(&self) -> usize {
        self.writers.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Drop for AsyncDeliveryScheduler {
    fn drop(&mut self) {
        if let Some(Worker { tx, handle }) = self.worker.get_mut().take() {
            let _ = tx.send(Command::Stop);
            drop(tx);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for AsyncDeliveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDeliveryScheduler")
            .field("registered", &self.writers.len())
            .finish_non_exhaustive()
    }
}

fn run(writers: &DashMap<GUID, Weak<StatefulWriter>>, rx: &Receiver<Command>) {
    let mut interested = BTreeSet::new();
    while let Ok(first) = rx.recv() {
        let mut stop = false;
        for command in std::iter::once(first).chain(rx.try_iter()) {
            match command {
                Command::WakeUp(guid) => {
                    interested.insert(guid);
                }
                Command::Stop => stop = true,
            }
        }

        for guid in std::mem::take(&mut interested) {
            // The map guard must be released before the writer runs (or drops).
            let writer = writers.get(&guid).and_then(|entry| entry.value().upgrade());
            if let Some(writer) = writer {
                writer.send_any_unsent_changes();
            }
        }
        if stop {
            break;
        }
    }
    log::trace!("[async] delivery thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReliabilityTiming, RuntimeConfig};
    use crate::core::rt::{ChangePool, PayloadPool, PoolConfig};
    use crate::core::Locator;
    use crate::endpoint::{EndpointContext, PublishMode, RemoteEndpointDescriptor};
    use crate::qos::QosProfile;
    use crate::transport::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Counter {
        sent: AtomicUsize,
    }

    impl Transport for Counter {
        fn send(&self, _destination: &Locator, _buf: &[u8]) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn async_writer(
        scheduler: &Arc<AsyncDeliveryScheduler>,
        transport: &Arc<Counter>,
        key: u8,
    ) -> Arc<StatefulWriter> {
        let mut timing = ReliabilityTiming::fast();
        timing.heartbeat_period = Duration::from_secs(30);
        let ctx = EndpointContext {
            transport: Arc::clone(transport) as Arc<dyn Transport>,
            config: RuntimeConfig::with_timing(timing),
            payload_pool: PayloadPool::new(PoolConfig::default()),
            change_pool: Arc::new(ChangePool::default()),
            unicast_locators: Vec::new(),
            sequence_store: None,
        };
        StatefulWriter::new(
            GUID::new([1; 12], [0, 0, key, 0x03]),
            QosProfile::best_effort(),
            &ctx,
            PublishMode::Asynchronous,
            Some(Arc::clone(scheduler)),
            None,
        )
        .expect("writer")
    }

    #[test]
    fn thread_follows_registrations() {
        let scheduler = AsyncDeliveryScheduler::new();
        let transport = Arc::new(Counter::default());
        assert!(!scheduler.is_running());

        let a = async_writer(&scheduler, &transport, 1);
        let b = async_writer(&scheduler, &transport, 2);
        assert!(scheduler.is_running());
        assert_eq!(scheduler.registered(), 2);

        drop(a);
        assert!(scheduler.is_running());
        drop(b);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.registered(), 0);
    }

    #[test]
    fn write_is_sent_by_delivery_thread() {
        let scheduler = AsyncDeliveryScheduler::new();
        let transport = Arc::new(Counter::default());
        let writer = async_writer(&scheduler, &transport, 1);
        let reader = RemoteEndpointDescriptor::new(
            GUID::new([2; 12], [0, 0, 1, 0x04]),
            Locator::udpv4([127, 0, 0, 1], 7410),
            &QosProfile::best_effort(),
        );
        writer.matched_reader_add(reader).unwrap();

        for i in 0..10u8 {
            writer.write(&[i]).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while writer.metrics().data_sent < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(writer.metrics().data_sent, 10);
        assert!(transport.sent.load(Ordering::SeqCst) >= 1);
    }
}
