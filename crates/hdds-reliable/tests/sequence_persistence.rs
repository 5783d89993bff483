// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::doc_markdown)] // Test documentation
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code

//! Sequence checkpoints across participant restarts.
//!
//! Test scenarios:
//! - A restarted writer continues numbering after its last write
//! - A restarted reader does not surface replayed samples again
//! - The SQLite store survives reopening

use std::sync::Arc;
use std::time::{Duration, Instant};

use hdds_reliable::config::ReliabilityTiming;
use hdds_reliable::core::{Locator, GUID};
use hdds_reliable::dds::DomainRegistry;
use hdds_reliable::endpoint::PublishMode;
use hdds_reliable::persistence::{SequenceStore, SqliteSequenceStore};
use hdds_reliable::qos::QosProfile;
use hdds_reliable::transport::LoopbackNetwork;
use hdds_reliable::{RtpsParticipant, StatefulReader};

fn locator(port: u16) -> Locator {
    Locator::udpv4([127, 0, 0, 1], port)
}

fn participant_with_store(
    registry: &Arc<DomainRegistry>,
    network: &Arc<LoopbackNetwork>,
    prefix: u8,
    port: u16,
    store: &Arc<SqliteSequenceStore>,
) -> Arc<RtpsParticipant> {
    RtpsParticipant::builder([prefix; 12])
        .timing(ReliabilityTiming::fast())
        .sequence_store(Arc::clone(store) as Arc<dyn SequenceStore>)
        .build_loopback(registry, network, locator(port))
        .expect("participant")
}

fn take_until(reader: &StatefulReader, expected: usize, timeout: Duration) -> Vec<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut samples = Vec::new();
    while samples.len() < expected && Instant::now() < deadline {
        if reader.wait_for_unread(Duration::from_millis(20)) {
            samples.extend(reader.take(usize::MAX).into_iter().map(|s| s.data));
        }
    }
    samples
}

// ---------------------------------------------------------------------------
// Test: writer numbering resumes after restart
// ---------------------------------------------------------------------------

#[test]
fn test_writer_resumes_numbering() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sequences.db");
    let registry = DomainRegistry::init();
    let network = LoopbackNetwork::new();

    let first_guid = {
        let store = Arc::new(SqliteSequenceStore::open(&path).expect("open"));
        let p = participant_with_store(&registry, &network, 30, 7800, &store);
        let writer = p
            .create_writer(QosProfile::reliable(), PublishMode::Synchronous, None)
            .expect("writer");
        for i in 1..=3u64 {
            assert_eq!(writer.write(b"x").expect("write"), i);
        }
        writer.guid()
    };

    // Fresh store instance reading the same file, same participant prefix.
    let store = Arc::new(SqliteSequenceStore::open(&path).expect("reopen"));
    assert_eq!(
        store.load(first_guid, GUID::unknown()).expect("load"),
        Some(3)
    );
    let p = participant_with_store(&registry, &network, 30, 7800, &store);
    let writer = p
        .create_writer(QosProfile::reliable(), PublishMode::Synchronous, None)
        .expect("writer");
    assert_eq!(writer.guid(), first_guid);
    assert_eq!(writer.write(b"y").expect("write"), 4);
}

// ---------------------------------------------------------------------------
// Test: restarted reader skips what it already delivered
// ---------------------------------------------------------------------------

#[test]
fn test_reader_watermark_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteSequenceStore::open(dir.path().join("seq.db")).expect("open"));
    let registry = DomainRegistry::init();
    let network = LoopbackNetwork::new();

    let publisher = RtpsParticipant::builder([40; 12])
        .timing(ReliabilityTiming::fast())
        .build_loopback(&registry, &network, locator(7810))
        .expect("publisher");
    let writer = publisher
        .create_writer(
            QosProfile::transient_local().keep_last(10),
            PublishMode::Synchronous,
            None,
        )
        .expect("writer");

    let reader_guid = {
        let subscriber = participant_with_store(&registry, &network, 41, 7811, &store);
        let reader = subscriber
            .create_reader(QosProfile::transient_local(), None)
            .expect("reader");
        writer
            .matched_reader_add(reader.remote_descriptor())
            .expect("match reader");
        reader
            .matched_writer_add(writer.remote_descriptor())
            .expect("match writer");

        for i in 1..=3u8 {
            writer.write(&[i]).expect("write");
        }
        writer
            .wait_for_acknowledgments(Duration::from_secs(5))
            .expect("acknowledged");
        assert_eq!(reader.take(usize::MAX).len(), 3);

        let guid = reader.guid();
        writer.matched_reader_remove(guid).expect("unmatch");
        guid
    };
    assert_eq!(
        store.load(reader_guid, writer.guid()).expect("load"),
        Some(3)
    );

    // Restart: the writer replays its retained history to the new incarnation.
    let subscriber = participant_with_store(&registry, &network, 41, 7811, &store);
    let reader = subscriber
        .create_reader(QosProfile::transient_local(), None)
        .expect("reader");
    assert_eq!(reader.guid(), reader_guid);
    reader
        .matched_writer_add(writer.remote_descriptor())
        .expect("match writer");
    assert_eq!(reader.writer_watermark(writer.guid()), Some(3));
    writer
        .matched_reader_add(reader.remote_descriptor())
        .expect("match reader");
    writer
        .wait_for_acknowledgments(Duration::from_secs(5))
        .expect("replay acknowledged");
    assert!(reader.take(usize::MAX).is_empty());

    writer.write(&[4]).expect("write");
    assert_eq!(take_until(&reader, 1, Duration::from_secs(5)), vec![vec![4]]);
}
