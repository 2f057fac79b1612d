//! Coraldb is an embedded persistent key-value store organized as a
//! log-structured merge tree.
//!
//! ## Design
//!
//! Writes land in an in-memory skipmap (the memtable). Once the memtable
//! crosses its size threshold it is frozen and a background flusher
//! serializes it into an immutable sorted run on disk (an sst) at level 0.
//! Per-level compactors periodically merge full batches of runs into a
//! single run one level deeper, deduplicating by key with the newest record
//! surviving; a cleaner unlinks runs once compaction has retired them. A
//! registry tracks every run's lifecycle state behind two-tier locking, so
//! reads stay consistent while files are created and deleted in the
//! background.
//!
//! Deletes are tombstones: a tombstone shadows older records for its key on
//! every read path until compaction drops the pair.
//!
//! Reads consult the active memtable, then any frozen memtables awaiting
//! flush (newest first), then the registry level by level with runs in
//! reverse id order, and stop at the first record found.
//!
//! Durability covers flushed data only, there is no write-ahead log: an
//! unclean shutdown loses whatever was still buffered in memtables, and a
//! run whose trailer was never finished is ignored at the next startup.
//!
//! ## Example
//!
//! ```
//! use coraldb::DataStore;
//! # use tempfile::tempdir;
//!
//! #[tokio::main]
//! async fn main() {
//!     let root = tempdir().unwrap();
//!     let mut store = DataStore::open(root.path().join("coral")).await.unwrap();
//!
//!     store.put("apple", "tim cook").await;
//!
//!     let entry = store.get("apple").await.unwrap().unwrap();
//!     assert_eq!(entry.value, b"tim cook");
//!
//!     store.delete("apple").await;
//!     assert!(store.get("apple").await.unwrap().is_none());
//! }
//! ```

pub mod cfg;
mod cleaner;
mod codec;
mod compactors;
mod consts;
pub mod db;
mod err;
mod flush;
mod memtable;
mod registry;
mod sst;
mod types;

pub use cfg::Config;
pub use codec::Record;
pub use db::DataStore;
pub use err::Error;
