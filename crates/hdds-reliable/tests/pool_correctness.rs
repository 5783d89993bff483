// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::doc_markdown)] // Test documentation
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::explicit_iter_loop)] // Test iteration
#![allow(clippy::cast_lossless)] // Test simplicity

//! Payload pool accounting under shared payloads.
//!
//! Test scenarios:
//! - A payload shared by two changes is freed only with the last one
//! - Random get/share/release cycles never leave more outstanding buffers
//!   than live changes
//! - Released buffers are reused without growing the pool
//! - Writer and reader histories return every buffer once samples are gone

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use hdds_reliable::config::ReliabilityTiming;
use hdds_reliable::core::rt::{ChangePool, MemoryPolicy, PayloadPool, PoolConfig};
use hdds_reliable::core::{CacheChange, Locator};
use hdds_reliable::dds::DomainRegistry;
use hdds_reliable::endpoint::PublishMode;
use hdds_reliable::qos::QosProfile;
use hdds_reliable::transport::LoopbackNetwork;
use hdds_reliable::RtpsParticipant;

fn reusable_pool() -> Arc<PayloadPool> {
    PayloadPool::new(PoolConfig::new(MemoryPolicy::DynamicReusable, 64))
}

fn change_with(changes: &ChangePool, pool: &Arc<PayloadPool>, data: &[u8]) -> CacheChange {
    let mut change = changes.reserve_cache().expect("change record");
    change.serialized_payload = Some(pool.get_payload_from(data).expect("payload"));
    change
}

/// Distinct buffers referenced by `live`.
fn referenced(live: &[CacheChange]) -> usize {
    live.iter()
        .filter_map(|c| c.serialized_payload.as_ref().map(|p| p.handle()))
        .collect::<HashSet<_>>()
        .len()
}

// ---------------------------------------------------------------------------
// Test: shared payload is freed by the last change
// ---------------------------------------------------------------------------

#[test]
fn test_shared_payload_released_by_last_change() {
    let pool = reusable_pool();
    let changes = ChangePool::new(0, 0);

    let first = change_with(&changes, &pool, b"shared bytes");
    let mut second = changes.reserve_cache().expect("change record");
    second.serialized_payload = first.serialized_payload.clone();

    assert_eq!(pool.outstanding(), 1);
    assert_eq!(
        second.serialized_payload.as_ref().map(|p| p.ref_count()),
        Some(2)
    );

    changes.release_cache(first);
    assert_eq!(pool.outstanding(), 1, "second change still references it");
    assert_eq!(second.payload_to_vec(), b"shared bytes");

    changes.release_cache(second);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.free_count(), 1);
    assert_eq!(changes.outstanding(), 0);
}

// ---------------------------------------------------------------------------
// Test: random cycles keep outstanding <= live changes
// ---------------------------------------------------------------------------

#[test]
fn test_random_cycles_never_leak() {
    let pool = reusable_pool();
    let changes = ChangePool::new(16, 0);
    let mut rng = fastrand::Rng::with_seed(42);
    let mut live: Vec<CacheChange> = Vec::new();

    for step in 0..5_000 {
        match rng.u8(0..10) {
            // Fresh payload.
            0..=4 => {
                let size = rng.usize(1..=512);
                let data = vec![step as u8; size];
                live.push(change_with(&changes, &pool, &data));
            }
            // Share an existing payload with a new change.
            5 | 6 if !live.is_empty() => {
                let source = rng.usize(0..live.len());
                let mut change = changes.reserve_cache().expect("change record");
                change.serialized_payload = live[source].serialized_payload.clone();
                live.push(change);
            }
            _ if !live.is_empty() => {
                let victim = rng.usize(0..live.len());
                changes.release_cache(live.swap_remove(victim));
            }
            _ => {}
        }

        assert!(
            pool.outstanding() <= live.len(),
            "step {}: {} buffers out for {} changes",
            step,
            pool.outstanding(),
            live.len()
        );
        assert_eq!(pool.outstanding(), referenced(&live), "step {}", step);
    }

    for change in live.drain(..) {
        changes.release_cache(change);
    }
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(changes.outstanding(), 0);
}

// ---------------------------------------------------------------------------
// Test: reuse keeps the pool from growing
// ---------------------------------------------------------------------------

#[test]
fn test_released_buffers_are_reused() {
    let pool = reusable_pool();
    for _ in 0..100 {
        let a = pool.get_payload(256).expect("payload");
        let b = pool.get_payload(128).expect("payload");
        assert!(a.capacity() >= 256);
        assert!(b.capacity() >= 128);
    }
    assert_eq!(pool.allocated_size(), 2);
    assert_eq!(pool.free_count(), 2);

    // Smaller requests fit the existing buffers.
    let small = pool.get_payload(16).expect("payload");
    assert!(small.capacity() >= 128);
    assert_eq!(pool.allocated_size(), 2);
}

// ---------------------------------------------------------------------------
// Test: histories return their buffers
// ---------------------------------------------------------------------------

#[test]
fn test_histories_release_buffers_after_delivery() {
    let registry = DomainRegistry::init();
    let network = LoopbackNetwork::new();
    let publisher = RtpsParticipant::builder([20; 12])
        .timing(ReliabilityTiming::fast())
        .payload_pool(PoolConfig::new(MemoryPolicy::DynamicReusable, 64))
        .build_loopback(&registry, &network, Locator::udpv4([127, 0, 0, 1], 7700))
        .expect("publisher");
    let subscriber = RtpsParticipant::builder([21; 12])
        .timing(ReliabilityTiming::fast())
        .payload_pool(PoolConfig::new(MemoryPolicy::DynamicReusable, 64))
        .build_loopback(&registry, &network, Locator::udpv4([127, 0, 0, 1], 7701))
        .expect("subscriber");

    let writer = publisher
        .create_writer(
            QosProfile::reliable().keep_all(100),
            PublishMode::Synchronous,
            None,
        )
        .expect("writer");
    let reader = subscriber
        .create_reader(QosProfile::reliable().keep_all(100), None)
        .expect("reader");
    writer
        .matched_reader_add(reader.remote_descriptor())
        .expect("match reader");
    reader
        .matched_writer_add(writer.remote_descriptor())
        .expect("match writer");

    for i in 0..20u8 {
        writer.write(&vec![i; 100 + i as usize]).expect("write");
    }
    writer
        .wait_for_acknowledgments(Duration::from_secs(5))
        .expect("acknowledged");

    // Volatile writer: acknowledged changes leave the history.
    assert_eq!(writer.history_len(), 0);
    assert_eq!(publisher.payload_pool().outstanding(), 0);

    assert_eq!(subscriber.payload_pool().outstanding(), 20);
    assert_eq!(reader.take(usize::MAX).len(), 20);
    assert_eq!(subscriber.payload_pool().outstanding(), 0);
}
