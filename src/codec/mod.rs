//! # Codec
//!
//! Binary layout for a single sst record and the ASCII trailer that
//! finalizes a run.
//!
//! Record frame, little-endian:
//!
//! ```text
//! [total_len: u32][key_len: u32][key][val_len: u32][val][deleted: u8]
//! ```
//!
//! `total_len` counts every byte of the frame including itself, so a reader
//! frames a record by reading 4 bytes followed by `total_len - 4` more.
//!
//! Trailer, appended after the last record:
//!
//! ```text
//! \n<metadata>\nlevel: <int>\ntimestamp: <RFC3339>\nid: <uint>\n<sst_done>
//! ```
//!
//! `<sst_done>` is the final token of the file. A file without it was
//! interrupted mid-write and is ignored at startup.

use crate::consts::{MAX_TRAILER_SIZE, METADATA_MARKER, RECORD_FIXED_SIZE, SIZE_OF_U32, SST_DONE_MARKER};
use crate::err::Error;
use crate::types::{CreatedAt, IsTombStone, Key, LevelNo, SstId, Value};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::path::Path;

use Error::*;

/// A single logical record as stored in memtables and sorted runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
    pub is_tombstone: IsTombStone,
}

impl Record {
    pub fn new<K: AsRef<[u8]>, V: AsRef<[u8]>>(key: K, value: V, is_tombstone: IsTombStone) -> Self {
        Self {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
            is_tombstone,
        }
    }
}

/// Metadata recovered from the tail of an sst file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trailer {
    pub level: LevelNo,
    pub id: SstId,
    pub timestamp: CreatedAt,

    /// Offset at which record data ends and the trailer begins
    pub data_len: u64,
}

/// Encodes one record into its on-disk frame
pub fn encode_record(key: &[u8], value: &[u8], is_tombstone: IsTombStone) -> Vec<u8> {
    let total_len = RECORD_FIXED_SIZE + key.len() + value.len();
    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(&(total_len as u32).to_le_bytes());
    frame.extend_from_slice(&(key.len() as u32).to_le_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(&(value.len() as u32).to_le_bytes());
    frame.extend_from_slice(value);
    frame.push(is_tombstone as u8);
    frame
}

/// Decodes a complete record frame, length prefix included
pub fn decode_record(frame: &[u8]) -> Result<Record, Error> {
    if frame.is_empty() {
        return Err(EndOfRun);
    }
    if frame.len() < RECORD_FIXED_SIZE {
        return Err(MalformedRecord {
            reason: "frame shorter than fixed record layout",
        });
    }

    let total_len = u32::from_le_bytes(frame[..SIZE_OF_U32].try_into().unwrap()) as usize;
    if total_len != frame.len() {
        return Err(MalformedRecord {
            reason: "declared total length does not match frame",
        });
    }

    let key_len = u32::from_le_bytes(frame[4..8].try_into().unwrap()) as usize;
    if 8 + key_len + SIZE_OF_U32 > total_len {
        return Err(MalformedRecord {
            reason: "key length overruns record",
        });
    }
    let key = frame[8..8 + key_len].to_vec();

    let val_len = u32::from_le_bytes(frame[8 + key_len..12 + key_len].try_into().unwrap()) as usize;
    if RECORD_FIXED_SIZE + key_len + val_len != total_len {
        return Err(MalformedRecord {
            reason: "value length overruns record",
        });
    }
    let value = frame[12 + key_len..12 + key_len + val_len].to_vec();

    let is_tombstone = frame[total_len - 1] == 1;

    Ok(Record {
        key,
        value,
        is_tombstone,
    })
}

/// Encodes the trailer written after the last record of a run
pub fn encode_trailer(level: LevelNo, id: SstId, timestamp: CreatedAt) -> String {
    format!(
        "\n{}\nlevel: {}\ntimestamp: {}\nid: {}\n{}",
        METADATA_MARKER,
        level,
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        id,
        SST_DONE_MARKER
    )
}

/// Parses the trailer out of `tail`, the last `min(file_size, 512)` bytes of
/// the file. `path` is only used for error context.
pub fn parse_trailer(path: &Path, tail: &[u8], file_size: u64) -> Result<Trailer, Error> {
    let incomplete = || IncompleteSst {
        path: path.to_path_buf(),
    };

    let last_line = tail
        .split(|b| *b == b'\n')
        .rev()
        .find(|line| !line.is_empty())
        .ok_or_else(incomplete)?;
    if last_line != SST_DONE_MARKER.as_bytes() {
        return Err(incomplete());
    }

    // the trailer begins at the newline preceding the metadata marker
    let marker = format!("\n{}", METADATA_MARKER);
    let trailer_pos = find_last(tail, marker.as_bytes()).ok_or_else(incomplete)?;
    let data_len = file_size - (tail.len() - trailer_pos) as u64;

    let mut level: Option<LevelNo> = None;
    let mut id: Option<SstId> = None;
    let mut timestamp: Option<CreatedAt> = None;

    for line in tail[trailer_pos..].split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(line);
        if let Some(rest) = line.strip_prefix("level: ") {
            level = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("timestamp: ") {
            timestamp = DateTime::parse_from_rfc3339(rest.trim())
                .map(|t| t.with_timezone(&Utc))
                .ok();
            if timestamp.is_none() {
                log::warn!("unparsable timestamp in sst trailer of `{}`", path.display());
                timestamp = Some(Utc.timestamp_opt(0, 0).unwrap());
            }
        } else if let Some(rest) = line.strip_prefix("id: ") {
            id = rest.trim().parse().ok();
        }
    }

    match (level, id, timestamp) {
        (Some(level), Some(id), Some(timestamp)) => Ok(Trailer {
            level,
            id,
            timestamp,
            data_len,
        }),
        _ => Err(MalformedRecord {
            reason: "trailer is missing level, timestamp or id",
        }),
    }
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Returns the tail slice bounds to read for trailer parsing
pub fn trailer_read_size(file_size: u64) -> u64 {
    (MAX_TRAILER_SIZE as u64).min(file_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let frame = encode_record(b"foo", b"bar", false);
        let record = decode_record(&frame).unwrap();
        assert_eq!(record, Record::new("foo", "bar", false));
    }

    #[test]
    fn test_tombstone_round_trip() {
        let frame = encode_record(b"foo", b"", true);
        let record = decode_record(&frame).unwrap();
        assert!(record.is_tombstone);
        assert!(record.value.is_empty());
    }

    #[test]
    fn test_decode_empty_frame_is_end_of_run() {
        assert!(matches!(decode_record(&[]), Err(EndOfRun)));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut frame = encode_record(b"foo", b"bar", false);
        frame.push(0);
        assert!(matches!(decode_record(&frame), Err(MalformedRecord { .. })));
    }

    #[test]
    fn test_decode_rejects_overrunning_key_length() {
        let mut frame = encode_record(b"foo", b"bar", false);
        frame[4..8].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(decode_record(&frame), Err(MalformedRecord { .. })));
    }

    #[test]
    fn test_trailer_round_trip() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let mut file = encode_record(b"a", b"1", false);
        let data_len = file.len() as u64;
        file.extend_from_slice(encode_trailer(3, 42, timestamp).as_bytes());

        let trailer = parse_trailer(Path::new("x.sst"), &file, file.len() as u64).unwrap();
        assert_eq!(trailer.level, 3);
        assert_eq!(trailer.id, 42);
        assert_eq!(trailer.timestamp, timestamp);
        assert_eq!(trailer.data_len, data_len);
    }

    #[test]
    fn test_missing_done_marker_is_incomplete() {
        let mut file = encode_record(b"a", b"1", false);
        file.extend_from_slice(b"\n<metadata>\nlevel: 0\n");
        let err = parse_trailer(Path::new("x.sst"), &file, file.len() as u64);
        assert!(matches!(err, Err(IncompleteSst { .. })));
    }

    #[test]
    fn test_records_only_file_is_incomplete() {
        let file = encode_record(b"a", b"1", false);
        let err = parse_trailer(Path::new("x.sst"), &file, file.len() as u64);
        assert!(matches!(err, Err(IncompleteSst { .. })));
    }
}
