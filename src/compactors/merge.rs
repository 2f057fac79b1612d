//! K-way merge over sorted runs.
//!
//! One cursor per input run feeds a min-heap keyed on the current record.
//! Popping yields keys in ascending order; for duplicate keys the run with
//! the higher input index (the newer run, inputs are ordered oldest first)
//! pops first and survives, older duplicates are dropped.

use crate::codec::Record;
use crate::err::Error;
use crate::sst::SstScanner;
use crate::types::Key;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct HeapEntry {
    record: Record,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap, so the key order is reversed to pop the
    // smallest key first. On equal keys the higher source index wins.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .key
            .cmp(&self.record.key)
            .then(self.source.cmp(&other.source))
    }
}

pub(crate) struct KWayMerge {
    scanners: Vec<SstScanner>,
    heap: BinaryHeap<HeapEntry>,
    last_key: Option<Key>,
}

impl KWayMerge {
    /// `scanners` must be ordered oldest run first
    pub async fn new(scanners: Vec<SstScanner>) -> Result<KWayMerge, Error> {
        let mut merge = KWayMerge {
            scanners,
            heap: BinaryHeap::new(),
            last_key: None,
        };
        for source in 0..merge.scanners.len() {
            merge.advance(source).await?;
        }
        Ok(merge)
    }

    async fn advance(&mut self, source: usize) -> Result<(), Error> {
        if let Some(record) = self.scanners[source].next().await? {
            self.heap.push(HeapEntry { record, source });
        }
        Ok(())
    }

    /// Next surviving record in ascending key order, newest duplicate wins
    pub async fn next(&mut self) -> Result<Option<Record>, Error> {
        while let Some(entry) = self.heap.pop() {
            self.advance(entry.source).await?;
            if self.last_key.as_deref() == Some(entry.record.key.as_slice()) {
                continue;
            }
            self.last_key = Some(entry.record.key.clone());
            return Ok(Some(entry.record));
        }
        Ok(None)
    }
}
