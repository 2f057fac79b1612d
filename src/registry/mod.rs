//! # SST Registry
//!
//! Process-wide catalog of sorted runs, grouped by level. Each level keeps
//! its ssts in insertion order (ascending id) plus an atomic counter that
//! hands out the next id. Locking is two-tier: one mutex guards the
//! level map, each level carries its own reader-writer lock. No lock is
//! ever held across file IO.
//!
//! All state transitions go through [`SstRegistry::update_batch`] so the
//! lifecycle rules stay centralized.

use crate::consts::SST_FILE_EXT;
use crate::err::Error;
use crate::sst::{Sst, SstState};
use crate::types::{LevelNo, SstId};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use Error::*;

#[derive(Debug)]
struct Level {
    ssts: RwLock<Vec<Arc<Sst>>>,

    /// Last id handed out on this level. Incremented atomically so
    /// `new_sst` holds the level's write lock only for the append.
    counter: AtomicU64,
}

impl Level {
    fn new() -> Self {
        Self {
            ssts: RwLock::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }
}

#[derive(Debug)]
pub struct SstRegistry {
    dir: PathBuf,
    levels: Mutex<BTreeMap<LevelNo, Arc<Level>>>,
}

impl SstRegistry {
    /// Creates an empty registry over `dir`
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            levels: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rebuilds the registry from the `*.sst` files in `dir`. Files whose
    /// trailer is missing or unparsable were interrupted mid-write and are
    /// skipped. Each level's counter resumes from the maximum id observed.
    pub async fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<SstRegistry, Error> {
        let dir = dir.as_ref();
        let mut dir_entries = tokio::fs::read_dir(dir).await.map_err(|error| DirReadError {
            path: dir.to_path_buf(),
            error,
        })?;

        let mut ssts: Vec<Arc<Sst>> = Vec::new();
        loop {
            let entry = dir_entries.next_entry().await.map_err(|error| DirReadError {
                path: dir.to_path_buf(),
                error,
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SST_FILE_EXT) {
                continue;
            }
            match Sst::open(&path).await {
                Ok(sst) => ssts.push(Arc::new(sst)),
                Err(err) => log::warn!("skipping sst file `{}`: {}", path.display(), err),
            }
        }

        let registry = SstRegistry::new(dir);
        {
            let mut levels = registry.levels.lock().unwrap();
            let mut level_max_id: BTreeMap<LevelNo, SstId> = BTreeMap::new();
            for sst in ssts {
                let level = levels.entry(sst.level).or_insert_with(|| Arc::new(Level::new()));
                let max_id = level_max_id.entry(sst.level).or_default();
                *max_id = (*max_id).max(sst.id);
                level.ssts.write().unwrap().push(sst);
            }
            for (no, level) in levels.iter() {
                level.counter.store(level_max_id[no], Ordering::SeqCst);
                level.ssts.write().unwrap().sort_by_key(|sst| sst.id);
            }
        }
        Ok(registry)
    }

    fn level_handle(&self, level: LevelNo) -> Option<Arc<Level>> {
        self.levels.lock().unwrap().get(&level).cloned()
    }

    /// Allocates a fresh id on `level` (creating the level if needed),
    /// registers a descriptor in the given initial state and returns it.
    /// The caller is responsible for writing the file.
    pub fn new_sst(&self, level: LevelNo, state: SstState) -> Arc<Sst> {
        let handle = {
            let mut levels = self.levels.lock().unwrap();
            Arc::clone(levels.entry(level).or_insert_with(|| Arc::new(Level::new())))
        };

        let id = handle.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let filename = format!("{}_{}_{}.{}", level, id, Uuid::new_v4(), SST_FILE_EXT);
        let path = self.dir.join(&filename);
        let sst = Arc::new(Sst::new(id, level, filename, path, Utc::now(), state));
        handle.ssts.write().unwrap().push(Arc::clone(&sst));
        sst
    }

    /// Returns up to `max_count` ssts on `level` whose state is in
    /// `states`, in insertion (ascending id) order. An untracked level
    /// yields an empty list.
    pub fn list(&self, level: LevelNo, states: &[SstState], max_count: usize) -> Vec<Arc<Sst>> {
        let Some(handle) = self.level_handle(level) else {
            return Vec::new();
        };
        let ssts = handle.ssts.read().unwrap();
        ssts.iter()
            .filter(|sst| states.contains(&sst.state()))
            .take(max_count)
            .cloned()
            .collect()
    }

    /// Atomically moves every sst in the batch to `new_state`. The whole
    /// batch is validated before any state changes; an illegal transition
    /// rejects the batch with `InvalidTransition`.
    pub fn update_batch(&self, level: LevelNo, ssts: &[Arc<Sst>], new_state: SstState) -> Result<(), Error> {
        let handle = self.level_handle(level).ok_or(LevelNotFound { level })?;
        let tracked = handle.ssts.write().unwrap();

        for sst in ssts {
            if !tracked.iter().any(|t| t.filename == sst.filename) {
                return Err(SstNotFound {
                    filename: sst.filename.clone(),
                    level,
                });
            }
            let from = sst.state();
            if !from.can_transition_to(new_state) {
                log::error!(
                    "rejecting illegal sst transition {:?} -> {:?} for `{}`",
                    from,
                    new_state,
                    sst.filename
                );
                return Err(InvalidTransition {
                    from,
                    to: new_state,
                    filename: sst.filename.clone(),
                });
            }
        }

        for sst in ssts {
            sst.set_state(new_state);
        }
        Ok(())
    }

    /// Drops the given ssts from the level's sequence. Files are not
    /// unlinked here, that is the cleaner's job.
    pub fn remove(&self, level: LevelNo, ssts: &[Arc<Sst>]) -> Result<(), Error> {
        let handle = self.level_handle(level).ok_or(LevelNotFound { level })?;
        let mut tracked = handle.ssts.write().unwrap();
        tracked.retain(|t| !ssts.iter().any(|r| r.filename == t.filename));
        Ok(())
    }

    /// Level indices currently tracked, ascending
    pub fn levels(&self) -> Vec<LevelNo> {
        self.levels.lock().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use tempfile::tempdir;
    use tokio::fs::File;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_new_sst_ids_are_monotonic_per_level() {
        let registry = SstRegistry::new("unused");
        let a = registry.new_sst(0, SstState::Flushing);
        let b = registry.new_sst(0, SstState::Flushing);
        let c = registry.new_sst(1, SstState::Compacting);

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(c.id, 1);
        assert!(a.filename.starts_with("0_1_"));
        assert!(c.filename.starts_with("1_1_"));
        assert!(c.filename.ends_with(".sst"));
    }

    #[test]
    fn test_list_filters_caps_and_preserves_order() {
        let registry = SstRegistry::new("unused");
        let a = registry.new_sst(0, SstState::Flushing);
        let b = registry.new_sst(0, SstState::Flushing);
        let c = registry.new_sst(0, SstState::Flushing);
        registry.update_batch(0, &[a, b.clone(), c], SstState::Flushed).unwrap();

        let listed = registry.list(0, &[SstState::Flushed], 2);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, 1);
        assert_eq!(listed[1].id, 2);

        registry.update_batch(0, &[b], SstState::Compacting).unwrap();
        let flushed = registry.list(0, &[SstState::Flushed], usize::MAX);
        assert_eq!(flushed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 3]);

        assert!(registry.list(9, &[SstState::Flushed], usize::MAX).is_empty());
    }

    #[test]
    fn test_update_batch_rejects_illegal_transition() {
        let registry = SstRegistry::new("unused");
        let sst = registry.new_sst(0, SstState::Flushing);

        let err = registry.update_batch(0, &[Arc::clone(&sst)], SstState::Compacted);
        assert!(matches!(err, Err(InvalidTransition { .. })));
        // the rejected batch left the state untouched
        assert_eq!(sst.state(), SstState::Flushing);
    }

    #[test]
    fn test_update_batch_is_all_or_nothing() {
        let registry = SstRegistry::new("unused");
        let good = registry.new_sst(0, SstState::Flushing);
        let bad = registry.new_sst(0, SstState::Compacted);

        let err = registry.update_batch(0, &[Arc::clone(&good), Arc::clone(&bad)], SstState::Flushed);
        assert!(matches!(err, Err(InvalidTransition { .. })));
        assert_eq!(good.state(), SstState::Flushing);
        assert_eq!(bad.state(), SstState::Compacted);
    }

    #[test]
    fn test_update_batch_unknown_level() {
        let registry = SstRegistry::new("unused");
        assert!(matches!(
            registry.update_batch(4, &[], SstState::Flushed),
            Err(LevelNotFound { level: 4 })
        ));
    }

    #[test]
    fn test_remove() {
        let registry = SstRegistry::new("unused");
        let a = registry.new_sst(0, SstState::Flushing);
        let _b = registry.new_sst(0, SstState::Flushing);

        registry.remove(0, &[a]).unwrap();
        let remaining = registry.list(0, &[SstState::Flushing], usize::MAX);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 2);
    }

    #[test]
    fn test_levels() {
        let registry = SstRegistry::new("unused");
        registry.new_sst(2, SstState::Flushing);
        registry.new_sst(0, SstState::Flushing);
        assert_eq!(registry.levels(), vec![0, 2]);
    }

    async fn write_run(path: &std::path::Path, records: &[(&str, &str)], level: LevelNo, id: SstId) {
        let mut file = File::create(path).await.unwrap();
        for (key, value) in records {
            file.write_all(&codec::encode_record(key.as_bytes(), value.as_bytes(), false))
                .await
                .unwrap();
        }
        file.write_all(codec::encode_trailer(level, id, Utc::now()).as_bytes())
            .await
            .unwrap();
        file.sync_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_from_dir_recovers_levels_and_counters() {
        let root = tempdir().unwrap();
        write_run(&root.path().join("0_2_a.sst"), &[("a", "1")], 0, 2).await;
        write_run(&root.path().join("0_1_b.sst"), &[("b", "2")], 0, 1).await;
        write_run(&root.path().join("1_4_c.sst"), &[("c", "3")], 1, 4).await;

        // interrupted write, no trailer
        let mut partial = File::create(root.path().join("0_3_d.sst")).await.unwrap();
        partial.write_all(&codec::encode_record(b"d", b"4", false)).await.unwrap();
        partial.sync_all().await.unwrap();

        // unrelated file
        File::create(root.path().join("MANIFEST")).await.unwrap();

        let registry = SstRegistry::load_from_dir(root.path()).await.unwrap();
        assert_eq!(registry.levels(), vec![0, 1]);

        let level0 = registry.list(0, &[SstState::Flushed], usize::MAX);
        assert_eq!(level0.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);

        // counters resume after the max observed id
        let next = registry.new_sst(0, SstState::Flushing);
        assert_eq!(next.id, 3);
        let next = registry.new_sst(1, SstState::Flushing);
        assert_eq!(next.id, 5);
    }
}
