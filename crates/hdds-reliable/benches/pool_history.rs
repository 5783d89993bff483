// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pool and History Hot-Path Benchmark
//!
//! Measures the per-sample cost of the structures every write and every
//! received DATA goes through:
//! - Payload get/release for each memory policy
//! - WriterHistory new_change + add_change + remove_min_change (KEEP_LAST ring)
//! - ReaderHistory add_change + take

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hdds_reliable::core::rt::{ChangePool, MemoryPolicy, PayloadPool, PoolConfig};
use hdds_reliable::core::{ChangeKind, InstanceHandle, GUID};
use hdds_reliable::history::{ReaderHistory, WriterHistory};
use hdds_reliable::qos::QosProfile;

const PAYLOAD: [u8; 256] = [0xAB; 256];

fn bench_payload_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_pool");
    for policy in [
        MemoryPolicy::Preallocated,
        MemoryPolicy::PreallocatedWithRealloc,
        MemoryPolicy::DynamicReserve,
        MemoryPolicy::DynamicReusable,
    ] {
        let pool = PayloadPool::new(PoolConfig::new(policy, 512).with_initial_size(16));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", policy)),
            &pool,
            |b, pool| {
                b.iter(|| {
                    let payload = pool.get_payload_from(black_box(&PAYLOAD));
                    black_box(payload)
                });
            },
        );
    }
    group.finish();
}

fn bench_writer_history(c: &mut Criterion) {
    let qos = QosProfile::reliable().keep_last(64);
    let mut history = WriterHistory::new(
        GUID::new([1; 12], [0, 0, 1, 0x03]),
        &qos,
        PayloadPool::new(PoolConfig::default().with_initial_size(128)),
        Arc::new(ChangePool::new(128, 0)),
    );

    c.bench_function("writer_history_add_remove", |b| {
        b.iter(|| {
            let change = history
                .new_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&PAYLOAD))
                .expect("pool");
            let seq = history.add_change(change).expect("add");
            if history.len() >= 64 {
                history.remove_min_change();
            }
            black_box(seq)
        });
    });
}

fn bench_reader_history(c: &mut Criterion) {
    let qos = QosProfile::reliable().keep_all(1024);
    let changes = Arc::new(ChangePool::new(128, 0));
    let payloads = PayloadPool::new(PoolConfig::default().with_initial_size(128));
    let mut history = ReaderHistory::new(&qos, Arc::clone(&changes));
    let writer = GUID::new([2; 12], [0, 0, 1, 0x03]);
    let mut seq = 0u64;

    c.bench_function("reader_history_add_take", |b| {
        b.iter(|| {
            seq += 1;
            let mut change = changes.reserve_cache().expect("change");
            change.writer_guid = writer;
            change.sequence_number = seq;
            change.serialized_payload = payloads.get_payload_from(&PAYLOAD);
            history.add_change(change).expect("add");
            for (change, _) in history.take(1) {
                history.recycle(black_box(change));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_payload_pool,
    bench_writer_history,
    bench_reader_history
);
criterion_main!(benches);
