// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint timer thread.
//!
//! One thread per endpoint drives both periodic work (HEARTBEAT emission,
//! ACKNACK retry, liveliness checks) and one-shot deadlines requested through
//! [`PeriodicTimer::schedule`] (delayed NACK repair, delayed ACKNACK).
//!
//! The period is re-read before every sleep, so timing swapped through
//! [`RuntimeConfig`](crate::config::RuntimeConfig) applies without a restart.
//!
//! The tick closure normally holds a `Weak` to its endpoint and returns
//! `false` once the endpoint is gone, which ends the thread.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;

/// Why the tick closure is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The period elapsed.
    Periodic,
    /// A deadline passed to [`PeriodicTimer::schedule`] was reached.
    Scheduled,
}

#[derive(Debug, Default)]
struct TimerState {
    stop: bool,
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// Handle to a timer thread. Dropping it stops and joins the thread.
pub struct PeriodicTimer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Spawn a timer thread named `name`.
    ///
    /// `period` is queried before each sleep. `tick` runs without any timer
    /// lock held; returning `false` stops the thread.
    pub fn spawn<P, F>(name: &str, period: P, mut tick: F) -> std::io::Result<Self>
    where
        P: Fn() -> Duration + Send + 'static,
        F: FnMut(Tick) -> bool + Send + 'static,
    {
        let shared = Arc::new(TimerShared::default());
        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = worker.state.lock();
            let mut next_periodic = Instant::now() + period();
            loop {
                if state.stop {
                    break;
                }
                let wake_at = state
                    .deadline
                    .map_or(next_periodic, |d| d.min(next_periodic));
                let now = Instant::now();
                if now < wake_at {
                    worker.wakeup.wait_until(&mut state, wake_at);
                    continue;
                }

                let kind = if now >= next_periodic {
                    next_periodic = now + period();
                    Tick::Periodic
                } else {
                    Tick::Scheduled
                };
                if state.deadline.is_some_and(|d| d <= now) {
                    state.deadline = None;
                }

                let keep_running = MutexGuard::unlocked(&mut state, || tick(kind));
                if !keep_running {
                    break;
                }
            }
        })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Request a [`Tick::Scheduled`] call at `at` (earliest request wins).
    pub fn schedule(&self, at: Instant) {
        let mut state = self.shared.state.lock();
        if state.deadline.map_or(true, |d| at < d) {
            state.deadline = Some(at);
            self.shared.wakeup.notify_one();
        }
    }

    /// Signal the thread to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.shared.state.lock().stop = true;
        self.shared.wakeup.notify_one();
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.thread.take() {
            // The last endpoint reference may be released by the tick itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn periodic_ticks_until_dropped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let timer = PeriodicTimer::spawn(
            "hdds-test-timer",
            || Duration::from_millis(5),
            move |kind| {
                if kind == Tick::Periodic {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                true
            },
        )
        .expect("spawn");

        thread::sleep(Duration::from_millis(60));
        drop(timer);
        let after_drop = ticks.load(Ordering::SeqCst);
        assert!(after_drop >= 3, "only {} ticks", after_drop);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn scheduled_deadline_fires_before_period() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let timer = PeriodicTimer::spawn(
            "hdds-test-timer",
            || Duration::from_secs(60),
            move |kind| {
                let _ = tx.send(kind);
                true
            },
        )
        .expect("spawn");

        let start = Instant::now();
        timer.schedule(start + Duration::from_millis(10));
        let kind = rx.recv_timeout(Duration::from_secs(2)).expect("tick");
        assert_eq!(kind, Tick::Scheduled);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn tick_returning_false_stops_thread() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let _timer = PeriodicTimer::spawn(
            "hdds-test-timer",
            || Duration::from_millis(1),
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                false
            },
        )
        .expect("spawn");
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
