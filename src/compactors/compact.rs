//! # Compactor
//!
//! One compactor runs per level. Each tick it tries to claim a full batch
//! of runs from its level and merge them into a single run one level down
//! the tree. The output is published before the inputs are retired, so a
//! reader that sees the inputs as compacted can already see the output.
//!
//! The manager spawns compactors for the levels present at startup and
//! watches the registry for levels that appear later. Levels only ever
//! acquire ssts, so compactors are never stopped except at shutdown.

use crate::cfg::Config;
use crate::codec;
use crate::compactors::KWayMerge;
use crate::err::Error;
use crate::registry::SstRegistry;
use crate::sst::{Sst, SstState};
use crate::types::LevelNo;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast;

use Error::*;

pub struct Compactor {
    level: LevelNo,
    registry: Arc<SstRegistry>,
    config: Config,
}

impl Compactor {
    pub fn new(level: LevelNo, registry: Arc<SstRegistry>, config: Config) -> Self {
        Self {
            level,
            registry,
            config,
        }
    }

    /// Spawns the periodic compaction loop for this level
    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.compaction_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            log::error!("error compacting level {}: {}", self.level, err);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            log::info!("compactor for level {} stopped", self.level);
        });
    }

    /// One compaction pass. A batch is compacted only when the level holds a
    /// full `max_ssts_per_level` of eligible runs. Runs left in `Compacting`
    /// by a failed pass are re-claimed here.
    pub(crate) async fn run_once(&self) -> Result<(), Error> {
        let batch_size = self.config.max_ssts_per_level;
        let inputs = self
            .registry
            .list(self.level, &[SstState::Flushed, SstState::Compacting], batch_size);
        if inputs.len() < batch_size {
            return Ok(());
        }

        self.registry.update_batch(self.level, &inputs, SstState::Compacting)?;
        let output = self.registry.new_sst(self.level + 1, SstState::Compacting);

        match self.merge_into(&output, &inputs).await {
            Ok(written) => {
                self.registry
                    .update_batch(self.level + 1, std::slice::from_ref(&output), SstState::Flushed)?;
                self.registry
                    .update_batch(self.level, &inputs, SstState::Compacted)?;
                log::info!(
                    "compacted {} runs from level {} into `{}` ({} records)",
                    inputs.len(),
                    self.level,
                    output.filename,
                    written
                );
                Ok(())
            }
            Err(err) => {
                // drop the descriptor; its partial file has no done marker
                // and is rejected at startup. Inputs stay `Compacting` and
                // are picked up again on the next tick.
                if let Err(remove_err) = self
                    .registry
                    .remove(self.level + 1, std::slice::from_ref(&output))
                {
                    log::error!("failed to drop aborted compaction output: {}", remove_err);
                }
                Err(err)
            }
        }
    }

    /// Merges `inputs` (ascending id order) into the output run. Duplicate
    /// keys keep the record from the newest input. Tombstones are carried
    /// into the output so they keep shadowing older runs at deeper levels.
    async fn merge_into(&self, output: &Arc<Sst>, inputs: &[Arc<Sst>]) -> Result<usize, Error> {
        let mut scanners = Vec::with_capacity(inputs.len());
        for sst in inputs {
            scanners.push(sst.scan().await?);
        }
        let mut merge = KWayMerge::new(scanners).await?;

        let file = File::create(&output.path)
            .await
            .map_err(|error| FileCreationError {
                path: output.path.clone(),
                error,
            })?;
        let mut writer = BufWriter::new(file);

        let mut written = 0usize;
        while let Some(record) = merge.next().await? {
            writer
                .write_all(&codec::encode_record(&record.key, &record.value, record.is_tombstone))
                .await
                .map_err(|error| FileWriteError {
                    path: output.path.clone(),
                    error,
                })?;
            written += 1;
        }

        writer
            .write_all(codec::encode_trailer(output.level, output.id, Utc::now()).as_bytes())
            .await
            .map_err(|error| FileWriteError {
                path: output.path.clone(),
                error,
            })?;
        writer.flush().await.map_err(|error| FileWriteError {
            path: output.path.clone(),
            error,
        })?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|error| FileSyncError { error })?;

        Ok(written)
    }
}

/// Owns the compactors. Spawns one per level known at startup and watches
/// the registry for new levels.
pub struct CompactorManager {
    registry: Arc<SstRegistry>,
    config: Config,
    shutdown_tx: broadcast::Sender<()>,
}

impl CompactorManager {
    pub fn new(registry: Arc<SstRegistry>, config: Config, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            registry,
            config,
            shutdown_tx,
        }
    }

    pub fn start(&self) {
        let mut spawned: HashSet<LevelNo> = HashSet::new();
        for level in self.registry.levels() {
            self.spawn_compactor(level);
            spawned.insert(level);
        }
        log::info!("started {} compactors", spawned.len());

        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.level_watch_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for level in registry.levels() {
                            if spawned.insert(level) {
                                log::info!("starting compactor for new level {}", level);
                                Compactor::new(level, Arc::clone(&registry), config.clone())
                                    .start(shutdown_tx.subscribe());
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn spawn_compactor(&self, level: LevelNo) {
        Compactor::new(level, Arc::clone(&self.registry), self.config.clone())
            .start(self.shutdown_tx.subscribe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Record;
    use std::path::Path;
    use tempfile::tempdir;

    async fn write_run(path: &Path, records: &[(&str, &str, bool)], level: LevelNo, id: u64) {
        let mut file = File::create(path).await.unwrap();
        for (key, value, is_tombstone) in records {
            file.write_all(&codec::encode_record(key.as_bytes(), value.as_bytes(), *is_tombstone))
                .await
                .unwrap();
        }
        file.write_all(codec::encode_trailer(level, id, Utc::now()).as_bytes())
            .await
            .unwrap();
        file.sync_all().await.unwrap();
    }

    /// Registers a run on level 0 through the registry and writes its file
    async fn add_level0_run(registry: &SstRegistry, records: &[(&str, &str, bool)]) -> Arc<Sst> {
        let sst = registry.new_sst(0, SstState::Flushing);
        write_run(&sst.path, records, sst.level, sst.id).await;
        registry
            .update_batch(0, std::slice::from_ref(&sst), SstState::Flushed)
            .unwrap();
        sst
    }

    fn small_config() -> Config {
        Config {
            max_ssts_per_level: 2,
            ..Config::default()
        }
    }

    async fn scan_all(sst: &Sst) -> Vec<Record> {
        let mut scanner = sst.scan().await.unwrap();
        let mut records = Vec::new();
        while let Some(record) = scanner.next().await.unwrap() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_run_once_waits_for_a_full_batch() {
        let root = tempdir().unwrap();
        let registry = Arc::new(SstRegistry::new(root.path()));
        add_level0_run(&registry, &[("a", "1", false)]).await;

        let compactor = Compactor::new(0, Arc::clone(&registry), small_config());
        compactor.run_once().await.unwrap();

        assert!(registry.list(1, &[SstState::Flushed], usize::MAX).is_empty());
        assert_eq!(registry.list(0, &[SstState::Flushed], usize::MAX).len(), 1);
    }

    #[tokio::test]
    async fn test_compaction_merges_newest_wins() {
        let root = tempdir().unwrap();
        let registry = Arc::new(SstRegistry::new(root.path()));
        add_level0_run(&registry, &[("a", "1", false), ("b", "2", false)]).await;
        add_level0_run(&registry, &[("b", "20", false), ("c", "3", false)]).await;

        let compactor = Compactor::new(0, Arc::clone(&registry), small_config());
        compactor.run_once().await.unwrap();

        let level1 = registry.list(1, &[SstState::Flushed], usize::MAX);
        assert_eq!(level1.len(), 1);
        assert_eq!(
            scan_all(&level1[0]).await,
            vec![
                Record::new("a", "1", false),
                Record::new("b", "20", false),
                Record::new("c", "3", false),
            ]
        );

        // inputs retired
        assert_eq!(registry.list(0, &[SstState::Compacted], usize::MAX).len(), 2);
        assert!(registry.list(0, &[SstState::Flushed], usize::MAX).is_empty());
    }

    #[tokio::test]
    async fn test_compaction_dedups_across_batch_to_distinct_keys() {
        let root = tempdir().unwrap();
        let registry = Arc::new(SstRegistry::new(root.path()));
        add_level0_run(&registry, &[("a", "old", false), ("b", "old", false), ("c", "old", false)]).await;
        add_level0_run(&registry, &[("a", "mid", false), ("d", "mid", false)]).await;
        add_level0_run(&registry, &[("a", "new", false), ("c", "new", false)]).await;

        let config = Config {
            max_ssts_per_level: 3,
            ..Config::default()
        };
        Compactor::new(0, Arc::clone(&registry), config)
            .run_once()
            .await
            .unwrap();

        let level1 = registry.list(1, &[SstState::Flushed], usize::MAX);
        assert_eq!(
            scan_all(&level1[0]).await,
            vec![
                Record::new("a", "new", false),
                Record::new("b", "old", false),
                Record::new("c", "new", false),
                Record::new("d", "mid", false),
            ]
        );
    }

    #[tokio::test]
    async fn test_compaction_preserves_tombstones() {
        let root = tempdir().unwrap();
        let registry = Arc::new(SstRegistry::new(root.path()));
        add_level0_run(&registry, &[("k", "x", false)]).await;
        add_level0_run(&registry, &[("k", "", true)]).await;

        Compactor::new(0, Arc::clone(&registry), small_config())
            .run_once()
            .await
            .unwrap();

        let level1 = registry.list(1, &[SstState::Flushed], usize::MAX);
        assert_eq!(scan_all(&level1[0]).await, vec![Record::new("k", "", true)]);
    }
}
