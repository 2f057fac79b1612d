use crate::consts::{
    DEFAULT_CLEANER_INTERVAL, DEFAULT_COMPACTION_INTERVAL, DEFAULT_FLUSH_QUEUE_SIZE,
    DEFAULT_LEVEL_WATCH_INTERVAL, DEFAULT_MAX_SSTS_PER_LEVEL, DEFAULT_MEMTABLE_SIZE_THRESHOLD,
};
use std::time::Duration;

/// Configuration options for the storage engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// How many records the active memtable may hold before it is
    /// frozen and enqueued for flushing.
    pub memtable_size_threshold: usize,

    /// How many ssts a compactor picks per batch. The cleaner reaps
    /// compacted ssts in batches of the same size.
    pub max_ssts_per_level: usize,

    /// Capacity of the flush queue. A full queue back-pressures writers.
    pub flush_queue_size: usize,

    /// Interval between compaction ticks on each level.
    pub compaction_interval: Duration,

    /// Interval at which the compactor manager checks for new levels.
    pub level_watch_interval: Duration,

    /// Interval between cleaner ticks.
    pub cleaner_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            memtable_size_threshold: DEFAULT_MEMTABLE_SIZE_THRESHOLD,
            max_ssts_per_level: DEFAULT_MAX_SSTS_PER_LEVEL,
            flush_queue_size: DEFAULT_FLUSH_QUEUE_SIZE,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            level_watch_interval: DEFAULT_LEVEL_WATCH_INTERVAL,
            cleaner_interval: DEFAULT_CLEANER_INTERVAL,
        }
    }
}
