//! # Engine facade
//!
//! Composes memtable rotation, the flush queue and registry-backed reads.
//! Writes land in the active memtable and rotate it once it crosses the
//! size threshold; reads walk active memtable, frozen memtables (newest
//! first) and registry levels top down, with ssts per level consulted in
//! reverse id order so newer runs shadow older ones.

use crate::cfg::Config;
use crate::cleaner::Cleaner;
use crate::codec::Record;
use crate::compactors::{Compactor, CompactorManager};
use crate::consts::DEFAULT_FLUSH_SIGNAL_CHANNEL_SIZE;
use crate::err::Error;
use crate::flush::{FlushJob, Flusher};
use crate::memtable::MemTable;
use crate::registry::SstRegistry;
use crate::sst::SstState;
use crate::types::{FlushReceiver, FlushingTables, Value};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, mpsc, RwLock};

use Error::*;

pub struct DataStore {
    /// Directory holding the sst files
    pub(crate) dir: PathBuf,

    pub(crate) config: Config,

    /// Active memtable accepting reads and writes. The engine serializes
    /// writers, background workers never touch it.
    pub(crate) active_memtable: MemTable,

    /// Frozen memtables still visible to reads while their flush is in
    /// flight, newest inserted last
    pub(crate) flushing_tables: FlushingTables,

    pub(crate) registry: Arc<SstRegistry>,

    flush_tx: mpsc::Sender<FlushJob>,

    /// Kept open so flush signals are never dropped on the floor before a
    /// subscriber appears
    flush_signal_rx: FlushReceiver,

    shutdown_tx: broadcast::Sender<()>,
}

impl DataStore {
    /// Opens a store over `dir` with default configuration, recovering any
    /// ssts already present, and starts the background workers.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<DataStore, Error> {
        Self::open_with_config(dir, Config::default()).await
    }

    pub async fn open_with_config<P: AsRef<Path>>(dir: P, config: Config) -> Result<DataStore, Error> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|error| DirCreationError {
            path: dir.clone(),
            error,
        })?;

        let registry = Arc::new(SstRegistry::load_from_dir(&dir).await?);
        let flushing_tables: FlushingTables = Arc::new(RwLock::new(IndexMap::new()));
        let (mut flush_signal_tx, flush_signal_rx) = async_broadcast::broadcast(DEFAULT_FLUSH_SIGNAL_CHANNEL_SIZE);
        // nobody may ever subscribe, old signals are droppable
        flush_signal_tx.set_overflow(true);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (flush_tx, flush_rx) = mpsc::channel(config.flush_queue_size);

        Flusher::new(Arc::clone(&registry), Arc::clone(&flushing_tables), flush_signal_tx)
            .start(flush_rx, shutdown_tx.subscribe());
        CompactorManager::new(Arc::clone(&registry), config.clone(), shutdown_tx.clone()).start();
        Cleaner::new(Arc::clone(&registry), config.clone()).start(shutdown_tx.subscribe());

        Ok(DataStore {
            dir,
            config,
            active_memtable: MemTable::new(),
            flushing_tables,
            registry,
            flush_tx,
            flush_signal_rx,
            shutdown_tx,
        })
    }

    /// Writes an entry. Never fails at the surface; a full flush queue
    /// back-pressures the writer instead.
    pub async fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        self.active_memtable.set(key, value, false);
        self.check_flush().await;
    }

    /// Writes a tombstone for `key`
    pub async fn delete<K: AsRef<[u8]>>(&mut self, key: K) {
        self.active_memtable.set(key, "", true);
        self.check_flush().await;
    }

    /// Point lookup. `None` means the key does not exist, tombstones
    /// included; the first record found on the search path wins.
    pub async fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Record>, Error> {
        let key = key.as_ref();

        if let Some(entry) = self.active_memtable.get(key) {
            return Ok(Self::live_record(key, entry.value, entry.is_tombstone));
        }

        for (_, table) in self.flushing_tables.read().await.iter().rev() {
            if let Some(entry) = table.read().await.get(key) {
                return Ok(Self::live_record(key, entry.value, entry.is_tombstone));
            }
        }

        for level in self.registry.levels() {
            let ssts = self.registry.list(level, &SstState::read_visible(), usize::MAX);
            for sst in ssts.iter().rev() {
                match sst.find(key).await {
                    Ok(Some(record)) => {
                        return Ok(Self::live_record(key, record.value, record.is_tombstone));
                    }
                    Ok(None) => continue,
                    Err(FileOpenError { .. })
                        if matches!(sst.state(), SstState::Compacting | SstState::Compacted) =>
                    {
                        // a compaction output whose file is not on disk yet,
                        // or a run cleaned from under this read; the key is
                        // still resolvable from the remaining runs
                        continue;
                    }
                    Err(err @ (IncompleteSst { .. } | MalformedRecord { .. })) => {
                        // a compaction output still being written, or a
                        // corrupt run; either way it cannot serve reads
                        log::warn!("skipping unreadable sst `{}`: {}", sst.filename, err);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(None)
    }

    fn live_record(key: &[u8], value: Value, is_tombstone: bool) -> Option<Record> {
        if is_tombstone {
            None
        } else {
            Some(Record::new(key, value, false))
        }
    }

    /// Freezes the active memtable once it crosses the size threshold and
    /// hands it to the flusher. The frozen table stays readable through the
    /// flushing list until its sst is published.
    async fn check_flush(&mut self) {
        if self.active_memtable.len() < self.config.memtable_size_threshold {
            return;
        }

        let mut frozen = std::mem::take(&mut self.active_memtable);
        frozen.mark_flushing();

        let table_id = MemTable::generate_table_id();
        let table = Arc::new(RwLock::new(frozen));
        self.flushing_tables
            .write()
            .await
            .insert(table_id.clone(), Arc::clone(&table));

        if self.flush_tx.send(FlushJob { table_id, table }).await.is_err() {
            log::error!("{}", Error::FlushQueueClosed);
        }
    }

    /// Runs one compaction pass over every tracked level, independent of
    /// the background tick
    pub async fn run_compaction(&self) -> Result<(), Error> {
        for level in self.registry.levels() {
            Compactor::new(level, Arc::clone(&self.registry), self.config.clone())
                .run_once()
                .await?;
        }
        Ok(())
    }

    /// A receiver that observes one signal per completed flush
    pub fn subscribe_flush(&self) -> FlushReceiver {
        self.flush_signal_rx.clone()
    }

    /// The data directory backing this store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Signals background workers to stop. Each finishes its in-flight
    /// unit; a partially written sst is rejected at the next startup.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
