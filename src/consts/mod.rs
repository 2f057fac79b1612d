pub const SST_FILE_EXT: &str = "sst";

pub const METADATA_MARKER: &str = "<metadata>";

pub const SST_DONE_MARKER: &str = "<sst_done>";

/// Trailer is parsed from at most this many bytes at the tail of the file
pub const MAX_TRAILER_SIZE: usize = 512;

pub const SIZE_OF_U32: usize = std::mem::size_of::<u32>();

pub const SIZE_OF_U8: usize = std::mem::size_of::<u8>();

/// Fixed bytes in a record frame: total_len + key_len + val_len + deleted
pub const RECORD_FIXED_SIZE: usize = 3 * SIZE_OF_U32 + SIZE_OF_U8;

/// How many records the active memtable holds before it is frozen.
/// Production deployments tune this to a byte threshold instead.
pub const DEFAULT_MEMTABLE_SIZE_THRESHOLD: usize = 5;

/// Compaction batch size, also the cleaner reap batch size
pub const DEFAULT_MAX_SSTS_PER_LEVEL: usize = 5;

pub const DEFAULT_FLUSH_QUEUE_SIZE: usize = 16;

pub const DEFAULT_FLUSH_SIGNAL_CHANNEL_SIZE: usize = 8;

/// 5 seconds
pub const DEFAULT_COMPACTION_INTERVAL: std::time::Duration = std::time::Duration::from_millis(5000);

/// 5 seconds
pub const DEFAULT_LEVEL_WATCH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(5000);

/// 5 seconds
pub const DEFAULT_CLEANER_INTERVAL: std::time::Duration = std::time::Duration::from_millis(5000);

pub const FLUSH_SIGNAL: u8 = 1;
