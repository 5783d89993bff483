// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence-number persistence.
//!
//! Writers store the last sequence number they assigned so a restarted writer
//! continues numbering instead of starting over at 1. Readers store, per
//! matched writer, the watermark of what they delivered so a restarted reader
//! does not surface the same samples twice.
//!
//! Entries are keyed by `(endpoint, peer)`; writers use
//! [`GUID::unknown()`] as peer.

use std::path::Path;

use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::{SequenceNumber, GUID};
use crate::dds::{Error, Result};

/// Backend storing sequence-number checkpoints.
pub trait SequenceStore: Send + Sync {
    /// Last stored value for `(endpoint, peer)`.
    fn load(&self, endpoint: GUID, peer: GUID) -> Result<Option<SequenceNumber>>;

    /// Store `seq` for `(endpoint, peer)`. Values never move backwards.
    fn store(&self, endpoint: GUID, peer: GUID, seq: SequenceNumber) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-lifetime store (tests, participant restarts within one process).
#[derive(Debug, Default)]
pub struct MemorySequenceStore {
    entries: DashMap<(GUID, GUID), SequenceNumber>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SequenceStore for MemorySequenceStore {
    fn load(&self, endpoint: GUID, peer: GUID) -> Result<Option<SequenceNumber>> {
        Ok(self.entries.get(&(endpoint, peer)).map(|v| *v))
    }

    fn store(&self, endpoint: GUID, peer: GUID, seq: SequenceNumber) -> Result<()> {
        let mut entry = self.entries.entry((endpoint, peer)).or_insert(seq);
        if *entry < seq {
            *entry = seq;
        }
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// SQLite-backed store, one row per `(endpoint, peer)`.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE sequence_checkpoints (
///     endpoint BLOB NOT NULL,
///     peer BLOB NOT NULL,
///     seq INTEGER NOT NULL,
///     PRIMARY KEY (endpoint, peer)
/// );
/// ```
///
/// The database runs in WAL mode with `synchronous = NORMAL`, so a checkpoint
/// is a single upsert and does not force an fsync.
pub struct SqliteSequenceStore {
    conn: Mutex<Connection>,
}

impl SqliteSequenceStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self::with_connection(conn)?;
        log::debug!(
            "[persistence] opened {} ({} entries)",
            path.display(),
            store.checkpoint_count()?
        );
        Ok(store)
    }

    /// Database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sequence_checkpoints (
                endpoint BLOB NOT NULL,
                peer BLOB NOT NULL,
                seq INTEGER NOT NULL,
                PRIMARY KEY (endpoint, peer)
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored checkpoints.
    pub fn checkpoint_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sequence_checkpoints", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

impl SequenceStore for SqliteSequenceStore {
    fn load(&self, endpoint: GUID, peer: GUID) -> Result<Option<SequenceNumber>> {
        let (endpoint, peer) = (endpoint.as_bytes(), peer.as_bytes());
        let conn = self.conn.lock();
        let seq = conn
            .prepare_cached(
                "SELECT seq FROM sequence_checkpoints WHERE endpoint = ?1 AND peer = ?2",
            )?
            .query_row(params![&endpoint[..], &peer[..]], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(seq.map(|seq| seq as SequenceNumber))
    }

    fn store(&self, endpoint: GUID, peer: GUID, seq: SequenceNumber) -> Result<()> {
        let value = i64::try_from(seq).map_err(|_| {
            Error::ResourceLimitExceeded(format!("sequence number {} cannot be stored", seq))
        })?;
        let (endpoint, peer) = (endpoint.as_bytes(), peer.as_bytes());
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO sequence_checkpoints (endpoint, peer, seq) VALUES (?1, ?2, ?3)
             ON CONFLICT (endpoint, peer) DO UPDATE SET seq = excluded.seq
             WHERE excluded.seq > sequence_checkpoints.seq",
        )?
        .execute(params![&endpoint[..], &peer[..], value])?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteSequenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSequenceStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid(n: u8) -> GUID {
        GUID::new([n; 12], [0, 0, n, 0x03])
    }

    #[test]
    fn memory_store_never_moves_backwards() {
        let store = MemorySequenceStore::new();
        assert_eq!(store.load(guid(1), GUID::unknown()).unwrap(), None);
        store.store(guid(1), GUID::unknown(), 10).unwrap();
        store.store(guid(1), GUID::unknown(), 4).unwrap();
        assert_eq!(store.load(guid(1), GUID::unknown()).unwrap(), Some(10));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq.db");
        {
            let store = SqliteSequenceStore::open(&path).unwrap();
            store.store(guid(1), GUID::unknown(), 42).unwrap();
            store.store(guid(2), guid(1), 7).unwrap();
        }
        let store = SqliteSequenceStore::open(&path).unwrap();
        assert_eq!(store.load(guid(1), GUID::unknown()).unwrap(), Some(42));
        assert_eq!(store.load(guid(2), guid(1)).unwrap(), Some(7));
        assert_eq!(store.load(guid(3), guid(1)).unwrap(), None);
        assert_eq!(store.checkpoint_count().unwrap(), 2);
    }

    #[test]
    fn sqlite_store_upserts_forward_only() {
        let store = SqliteSequenceStore::open_in_memory().unwrap();
        for seq in 1..=50 {
            store.store(guid(1), GUID::unknown(), seq).unwrap();
        }
        store.store(guid(1), GUID::unknown(), 3).unwrap();
        assert_eq!(store.load(guid(1), GUID::unknown()).unwrap(), Some(50));
        assert_eq!(store.checkpoint_count().unwrap(), 1);
    }

    #[test]
    fn sqlite_store_rejects_non_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();
        assert!(matches!(
            SqliteSequenceStore::open(&path),
            Err(Error::Storage(_))
        ));
    }
}
