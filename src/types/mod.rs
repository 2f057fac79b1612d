//! Contains type aliases shared across modules to prevent redeclaration and help with readability

use crate::memtable::MemTable;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;
pub type IsTombStone = bool;
pub type CreatedAt = DateTime<Utc>;
pub type SstId = u64;
pub type LevelNo = u32;
pub type TableId = Vec<u8>;
pub type FlushSignal = u8;
pub type FlushReceiver = async_broadcast::Receiver<FlushSignal>;
/// Frozen memtables awaiting flush, newest inserted last
pub type FlushingTables = Arc<RwLock<IndexMap<TableId, Arc<RwLock<MemTable>>>>>;
