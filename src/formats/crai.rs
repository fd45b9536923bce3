//! CRAI index loading and overlap queries.
//!
//! A CRAI file is gzip-compressed tab-delimited text with one line per slice
//! and reference sequence:
//!
//! ```text
//! seq_id  alignment_start  alignment_span  container_offset  slice_offset  slice_size
//! ```
//!
//! Positions are 1-based. `seq_id` is `-1` for unmapped slices.

use crate::storage::Storage;
use crate::{Error, Result};
use noodles::cram::crai;
use serde::Serialize;
use std::collections::BTreeMap;

/// One CRAI line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub sequence_id: i32,
    pub alignment_start: i64,
    /// Zero means the span is unknown.
    pub alignment_span: i64,
    pub container_offset: u64,
    /// Offset of the slice relative to the end of the container header.
    pub slice_offset: u64,
    pub slice_size: u64,
}

impl IndexEntry {
    /// Whether this entry may hold records in the 1-based inclusive range
    /// `[start, end]`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        if self.alignment_start > end {
            return false;
        }
        self.alignment_span == 0 || self.alignment_start + self.alignment_span > start
    }

    pub fn slice_key(&self) -> (u64, u64) {
        (self.container_offset, self.slice_offset)
    }

    fn try_from_record(record: &crai::Record, line: usize) -> Result<Self> {
        let out_of_range = |name: &str| Error::IndexParse {
            line,
            message: format!("{} out of range", name),
        };

        let sequence_id = match record.reference_sequence_id() {
            Some(id) => i32::try_from(id).map_err(|_| out_of_range("sequence id"))?,
            None => -1,
        };
        let alignment_start = record.alignment_start().map_or(0, usize::from);

        Ok(Self {
            sequence_id,
            alignment_start: i64::try_from(alignment_start)
                .map_err(|_| out_of_range("alignment start"))?,
            alignment_span: i64::try_from(record.alignment_span())
                .map_err(|_| out_of_range("alignment span"))?,
            container_offset: record.offset(),
            slice_offset: record.landmark(),
            slice_size: record.slice_length(),
        })
    }
}

#[derive(Debug, Default)]
struct SequenceEntries {
    /// Sorted by alignment start.
    entries: Vec<IndexEntry>,
    max_span: i64,
    has_unknown_span: bool,
}

/// In-memory CRAI index answering overlap queries.
#[derive(Debug, Default)]
pub struct RangeIndex {
    sequences: BTreeMap<i32, SequenceEntries>,
    len: usize,
}

impl RangeIndex {
    /// Build an index from already-parsed entries.
    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let mut sequences: BTreeMap<i32, SequenceEntries> = BTreeMap::new();
        let mut len = 0;

        for entry in entries {
            let seq = sequences.entry(entry.sequence_id).or_default();
            seq.max_span = seq.max_span.max(entry.alignment_span);
            seq.has_unknown_span |= entry.alignment_span == 0;
            seq.entries.push(entry);
            len += 1;
        }

        for seq in sequences.values_mut() {
            seq.entries
                .sort_by_key(|e| (e.alignment_start, e.container_offset, e.slice_offset));
        }

        Self { sequences, len }
    }

    /// Parse a gzip-compressed CRAI file.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let records = crai::Reader::new(data)
            .read_index()
            .map_err(|e| Error::IndexParse {
                line: 0,
                message: e.to_string(),
            })?;

        let entries = records
            .iter()
            .enumerate()
            .map(|(i, record)| IndexEntry::try_from_record(record, i + 1))
            .collect::<Result<Vec<_>>>()?;

        let index = Self::from_entries(entries);
        tracing::debug!(
            entries = index.len(),
            sequences = index.sequences.len(),
            "loaded CRAI index"
        );
        Ok(index)
    }

    /// Read and parse an index from storage.
    pub async fn read(storage: &dyn Storage) -> Result<Self> {
        let data = storage.read_bytes(None).await?;
        Self::from_bytes(&data)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sequence_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.sequences.keys().copied()
    }

    /// Entries that may hold records overlapping the 1-based inclusive range
    /// `[start, end]` on `sequence_id`, one per slice, in archive order.
    ///
    /// Entries pointing at the same slice are coalesced, keeping the smallest
    /// alignment start.
    pub fn entries_overlapping(&self, sequence_id: i32, start: i64, end: i64) -> Vec<IndexEntry> {
        if start > end {
            return Vec::new();
        }
        let Some(seq) = self.sequences.get(&sequence_id) else {
            return Vec::new();
        };

        let upper = seq.entries.partition_point(|e| e.alignment_start <= end);
        let lower = if seq.has_unknown_span {
            0
        } else {
            // Nothing starting at or before `start - max_span` can reach `start`.
            seq.entries
                .partition_point(|e| e.alignment_start + seq.max_span <= start)
                .min(upper)
        };

        let mut hits: Vec<IndexEntry> = seq.entries[lower..upper]
            .iter()
            .filter(|e| e.overlaps(start, end))
            .copied()
            .collect();

        hits.sort_by_key(|e| (e.slice_key(), e.alignment_start));
        hits.dedup_by(|next, kept| next.slice_key() == kept.slice_key());
        hits
    }
}
