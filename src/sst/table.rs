//! # SST
//!
//! An sst is an immutable sorted run on disk, records in ascending key order
//! followed by the metadata trailer. The descriptor tracks identity and
//! lifecycle state; record data is always read back through [`SstScanner`].

use crate::codec::{self, Record, Trailer};
use crate::consts::{RECORD_FIXED_SIZE, SIZE_OF_U32};
use crate::err::Error;
use crate::types::{CreatedAt, LevelNo, SstId};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};

use Error::*;

/// Lifecycle of an sst.
///
/// ```text
/// Flushing -> Flushed -> Compacting -> Compacted -> (removed)
///                            |
///                            +-> Flushed   (a compaction output is published)
/// ```
///
/// Only `Flushed` and `Compacting` ssts are visible to queries. `Compacted`
/// ssts are waiting for the cleaner and must not be picked again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SstState {
    Flushing = 0,
    Flushed = 1,
    Compacting = 2,
    Compacted = 3,
}

impl SstState {
    /// Legal transitions of the lifecycle. Identity transitions are
    /// permitted no-ops so a retried compaction can re-claim its inputs.
    pub fn can_transition_to(self, next: SstState) -> bool {
        use SstState::*;
        self == next
            || matches!(
                (self, next),
                (Flushing, Flushed) | (Flushed, Compacting) | (Compacting, Flushed) | (Compacting, Compacted)
            )
    }

    /// States an engine read may consult
    pub fn read_visible() -> [SstState; 2] {
        [SstState::Flushed, SstState::Compacting]
    }

    fn from_u8(raw: u8) -> SstState {
        match raw {
            0 => SstState::Flushing,
            1 => SstState::Flushed,
            2 => SstState::Compacting,
            _ => SstState::Compacted,
        }
    }
}

/// Descriptor of one sorted run. Shared by reference between the engine,
/// the registry and background workers; the file itself is immutable once
/// the trailer is written.
#[derive(Debug)]
pub struct Sst {
    /// Per-level monotonic counter value, higher id means newer
    pub id: SstId,

    pub level: LevelNo,

    /// `<level>_<id>_<uuid>.sst`
    pub filename: String,

    pub path: PathBuf,

    pub created_at: CreatedAt,

    state: AtomicU8,
}

impl Sst {
    pub(crate) fn new(
        id: SstId,
        level: LevelNo,
        filename: String,
        path: PathBuf,
        created_at: CreatedAt,
        state: SstState,
    ) -> Self {
        Self {
            id,
            level,
            filename,
            path,
            created_at,
            state: AtomicU8::new(state as u8),
        }
    }

    /// Reconstructs a descriptor from an existing file by parsing its
    /// trailer. The run is published as `Flushed`.
    pub(crate) async fn open(path: &Path) -> Result<Sst, Error> {
        let trailer = read_trailer(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Sst::new(
            trailer.id,
            trailer.level,
            filename,
            path.to_path_buf(),
            trailer.timestamp,
            SstState::Flushed,
        ))
    }

    pub fn state(&self) -> SstState {
        SstState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// State writes go through the registry so transitions stay validated
    /// in one place.
    pub(crate) fn set_state(&self, state: SstState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Opens a cursor over the run's records in ascending key order
    pub async fn scan(&self) -> Result<SstScanner, Error> {
        SstScanner::open(&self.path).await
    }

    /// Linear lookup of `key`. Runs are sorted, so the scan short-circuits
    /// once keys pass the target.
    pub async fn find(&self, key: &[u8]) -> Result<Option<Record>, Error> {
        let mut scanner = self.scan().await?;
        while let Some(record) = scanner.next().await? {
            if record.key.as_slice() == key {
                return Ok(Some(record));
            }
            if record.key.as_slice() > key {
                break;
            }
        }
        Ok(None)
    }
}

/// Streaming reader over a run's record region. The trailer is parsed at
/// open time to learn where records end.
pub struct SstScanner {
    path: PathBuf,
    reader: BufReader<File>,
    remaining: u64,
}

impl SstScanner {
    pub(crate) async fn open(path: &Path) -> Result<SstScanner, Error> {
        let trailer = read_trailer(path).await?;
        let file = File::open(path).await.map_err(|error| FileOpenError {
            path: path.to_path_buf(),
            error,
        })?;
        Ok(SstScanner {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            remaining: trailer.data_len,
        })
    }

    /// Next record, or `None` once the record region is exhausted
    pub async fn next(&mut self) -> Result<Option<Record>, Error> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let mut len_buf = [0u8; SIZE_OF_U32];
        self.read_exact(&mut len_buf).await?;
        let total_len = u32::from_le_bytes(len_buf) as u64;
        if total_len < RECORD_FIXED_SIZE as u64 || total_len > self.remaining {
            return Err(MalformedRecord {
                reason: "record length exceeds remaining run data",
            });
        }

        let mut frame = vec![0u8; total_len as usize];
        frame[..SIZE_OF_U32].copy_from_slice(&len_buf);
        self.read_exact(&mut frame[SIZE_OF_U32..]).await?;
        self.remaining -= total_len;

        codec::decode_record(&frame).map(Some)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.reader
            .read_exact(buf)
            .await
            .map_err(|error| FileReadError {
                path: self.path.clone(),
                error,
            })?;
        Ok(())
    }
}

/// Reads and parses the trailer from the tail of `path`
pub(crate) async fn read_trailer(path: &Path) -> Result<Trailer, Error> {
    let mut file = File::open(path).await.map_err(|error| FileOpenError {
        path: path.to_path_buf(),
        error,
    })?;
    let file_size = file
        .metadata()
        .await
        .map_err(FileMetadataError)?
        .len();

    let read_size = codec::trailer_read_size(file_size);
    file.seek(SeekFrom::End(-(read_size as i64)))
        .await
        .map_err(FileSeekError)?;
    let mut tail = vec![0u8; read_size as usize];
    file.read_exact(&mut tail)
        .await
        .map_err(|error| FileReadError {
            path: path.to_path_buf(),
            error,
        })?;

    codec::parse_trailer(path, &tail, file_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    async fn write_run(path: &Path, records: &[(&str, &str, bool)], level: LevelNo, id: SstId) {
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

    #[tokio::test]
    async fn test_open_parses_trailer() {
        let root = tempdir().unwrap();
        let path = root.path().join("1_7_x.sst");
        write_run(&path, &[("a", "1", false)], 1, 7).await;

        let sst = Sst::open(&path).await.unwrap();
        assert_eq!(sst.id, 7);
        assert_eq!(sst.level, 1);
        assert_eq!(sst.filename, "1_7_x.sst");
        assert_eq!(sst.state(), SstState::Flushed);
    }

    #[tokio::test]
    async fn test_scan_yields_records_in_order() {
        let root = tempdir().unwrap();
        let path = root.path().join("0_1_x.sst");
        write_run(&path, &[("a", "1", false), ("b", "2", true), ("c", "3", false)], 0, 1).await;

        let sst = Sst::open(&path).await.unwrap();
        let mut scanner = sst.scan().await.unwrap();
        let mut records = Vec::new();
        while let Some(record) = scanner.next().await.unwrap() {
            records.push(record);
        }
        assert_eq!(
            records,
            vec![
                Record::new("a", "1", false),
                Record::new("b", "2", true),
                Record::new("c", "3", false),
            ]
        );
    }

    #[tokio::test]
    async fn test_find() {
        let root = tempdir().unwrap();
        let path = root.path().join("0_1_x.sst");
        write_run(&path, &[("a", "1", false), ("c", "3", false)], 0, 1).await;

        let sst = Sst::open(&path).await.unwrap();
        let hit = sst.find(b"c").await.unwrap().unwrap();
        assert_eq!(hit.value, b"3");
        // "b" sorts between the stored keys, the scan stops early
        assert!(sst.find(b"b").await.unwrap().is_none());
        assert!(sst.find(b"z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_file_without_done_marker() {
        let root = tempdir().unwrap();
        let path = root.path().join("0_1_x.sst");
        let mut file = File::create(&path).await.unwrap();
        file.write_all(&codec::encode_record(b"a", b"1", false)).await.unwrap();
        file.sync_all().await.unwrap();

        assert!(matches!(Sst::open(&path).await, Err(IncompleteSst { .. })));
    }

    #[test]
    fn test_transition_rules() {
        use SstState::*;
        assert!(Flushing.can_transition_to(Flushed));
        assert!(Flushed.can_transition_to(Compacting));
        assert!(Compacting.can_transition_to(Compacted));
        assert!(Compacting.can_transition_to(Flushed));
        assert!(Compacting.can_transition_to(Compacting));

        assert!(!Flushed.can_transition_to(Flushing));
        assert!(!Compacted.can_transition_to(Flushed));
        assert!(!Flushing.can_transition_to(Compacting));
        assert!(!Flushed.can_transition_to(Compacted));
    }
}
