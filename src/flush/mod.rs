//! # Flusher
//!
//! Single consumer of the flush queue. Each frozen memtable is serialized
//! into a fresh level-0 sst; the sst is published to the registry before the
//! memtable leaves the flushing list, so a flushed record is never observed
//! as absent. A failed flush leaves the partial file behind without a done
//! marker, startup will reject it.

use crate::codec;
use crate::consts::FLUSH_SIGNAL;
use crate::err::Error;
use crate::memtable::MemTable;
use crate::registry::SstRegistry;
use crate::sst::{Sst, SstState};
use crate::types::{FlushSignal, FlushingTables, TableId};
use chrono::Utc;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{broadcast, mpsc, RwLock};

use Error::*;

/// Work item handed from the engine to the flusher
pub struct FlushJob {
    pub table_id: TableId,
    pub table: Arc<RwLock<MemTable>>,
}

pub struct Flusher {
    registry: Arc<SstRegistry>,
    flushing_tables: FlushingTables,
    flush_signal_tx: async_broadcast::Sender<FlushSignal>,
}

impl Flusher {
    pub fn new(
        registry: Arc<SstRegistry>,
        flushing_tables: FlushingTables,
        flush_signal_tx: async_broadcast::Sender<FlushSignal>,
    ) -> Self {
        Self {
            registry,
            flushing_tables,
            flush_signal_tx,
        }
    }

    /// Spawns the consumer loop over the flush queue
    pub fn start(self, mut queue: mpsc::Receiver<FlushJob>, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    job = queue.recv() => {
                        let Some(job) = job else { break };
                        self.handle(job).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            log::info!("flusher stopped");
        });
    }

    async fn handle(&self, job: FlushJob) {
        match self.flush(&job).await {
            Ok(sst) => {
                log::info!("flushed memtable to `{}`", sst.filename);
                job.table.write().await.mark_flushed();
                self.flushing_tables.write().await.shift_remove(&job.table_id);
                if let Err(async_broadcast::TrySendError::Full(_)) = self.flush_signal_tx.try_broadcast(FLUSH_SIGNAL) {
                    log::error!("{}", Error::FlushSignalOverflowError);
                }
            }
            Err(err) => {
                // the partial file lacks a done marker and will be
                // rejected at startup, no retry here
                log::error!("flush failed: {}", err);
            }
        }
    }

    /// Serializes one frozen memtable into a new level-0 sst and publishes
    /// it as `Flushed`
    async fn flush(&self, job: &FlushJob) -> Result<Arc<Sst>, Error> {
        let sst = self.registry.new_sst(0, SstState::Flushing);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&sst.path)
            .await
            .map_err(|error| FileCreationError {
                path: sst.path.clone(),
                error,
            })?;
        let mut writer = BufWriter::new(file);

        let table = job.table.read().await;
        for record in table.iter() {
            writer
                .write_all(&codec::encode_record(&record.key, &record.value, record.is_tombstone))
                .await
                .map_err(|error| FileWriteError {
                    path: sst.path.clone(),
                    error,
                })?;
        }
        drop(table);

        writer
            .write_all(codec::encode_trailer(0, sst.id, Utc::now()).as_bytes())
            .await
            .map_err(|error| FileWriteError {
                path: sst.path.clone(),
                error,
            })?;
        writer.flush().await.map_err(|error| FileWriteError {
            path: sst.path.clone(),
            error,
        })?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|error| FileSyncError { error })?;

        self.registry
            .update_batch(0, std::slice::from_ref(&sst), SstState::Flushed)?;
        Ok(sst)
    }
}
