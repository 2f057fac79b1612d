//! # Memtable
//!
//! Buffers writes in RAM until the engine freezes the table and hands it to
//! the flusher. Entries live in a lock-free SkipMap so reads stay cheap while
//! the engine serializes writes. A frozen memtable is immutable by contract;
//! it stays visible to reads through the flushing list until its sst has been
//! published to the registry.

use crate::codec::Record;
use crate::types::{CreatedAt, IsTombStone, Key, TableId, Value};
use chrono::Utc;
use crossbeam_skiplist::SkipMap;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of a memtable. Once `Flushing`, the table is immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableState {
    Active,
    Flushing,
    Flushed,
}

/// Value stored against each key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueEntry {
    pub value: Value,
    pub created_at: CreatedAt,
    pub is_tombstone: IsTombStone,
}

#[derive(Debug)]
pub struct MemTable {
    /// Lock-free skipmap from crossbeam, keys ordered by unsigned byte comparison
    pub(crate) entries: Arc<SkipMap<Key, ValueEntry>>,

    state: TableState,
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(SkipMap::new()),
            state: TableState::Active,
        }
    }

    /// Upserts an entry, stamping it with the current wall clock
    pub fn set<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V, is_tombstone: IsTombStone) {
        debug_assert_eq!(self.state, TableState::Active);
        self.entries.insert(
            key.as_ref().to_vec(),
            ValueEntry {
                value: value.as_ref().to_vec(),
                created_at: Utc::now(),
                is_tombstone,
            },
        );
    }

    /// Returns the stored entry, tombstones included, or `None`
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Option<ValueEntry> {
        self.entries.get(key.as_ref()).map(|e| e.value().clone())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in ascending key order. Restartable, each call starts over.
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.entries.iter().map(|e| Record {
            key: e.key().clone(),
            value: e.value().value.clone(),
            is_tombstone: e.value().is_tombstone,
        })
    }

    pub fn state(&self) -> TableState {
        self.state
    }

    /// Seals the table before it is enqueued to the flusher
    pub fn mark_flushing(&mut self) {
        self.state = TableState::Flushing;
    }

    /// Set after the table's sst has been published to the registry
    pub fn mark_flushed(&mut self) {
        self.state = TableState::Flushed;
    }

    /// Used to key frozen memtables in the flushing list
    pub fn generate_table_id() -> TableId {
        Uuid::new_v4().to_string().into_bytes()
    }
}
