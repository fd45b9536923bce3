//! Range queries over an indexed CRAM archive.

use crate::cache::SliceCache;
use crate::config::ReaderOptions;
use crate::formats::crai::{IndexEntry, RangeIndex};
use crate::formats::cram::record::reconstruct;
use crate::formats::cram::{AlignmentRecord, ContainerDecoder, FileHeader, Slice};
use crate::reference::SequenceProvider;
use crate::storage::{LocalStorage, Storage};
use crate::{Error, Result};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use noodles::sam;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;

/// Random-access reader over a CRAM archive and its CRAI index.
///
/// Owns the archive storage, the parsed index, the reference provider and a
/// slice cache shared by every query issued through it. Share it between
/// tasks with an `Arc`.
pub struct IndexedCramReader {
    archive: Arc<dyn Storage>,
    index: RangeIndex,
    provider: Arc<dyn SequenceProvider>,
    header: sam::Header,
    decoder: ContainerDecoder,
    cache: SliceCache,
    concurrency: usize,
}

impl IndexedCramReader {
    /// Validate the archive's file definition and read its SAM header.
    pub async fn open(
        archive: Arc<dyn Storage>,
        index: RangeIndex,
        provider: Arc<dyn SequenceProvider>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let file_header = FileHeader::read(archive.as_ref(), options.fetch_size_limit).await?;
        let header: sam::Header = file_header
            .sam_header
            .parse()
            .map_err(|e| Error::InvalidFormat(format!("failed to parse SAM header: {}", e)))?;

        let decoder = ContainerDecoder::new(
            &file_header.definition,
            options.verify_checksums,
            options.fetch_size_limit,
        );

        tracing::debug!(
            major_version = file_header.definition.major_version,
            minor_version = file_header.definition.minor_version,
            reference_sequences = header.reference_sequences().len(),
            index_entries = index.len(),
            "opened CRAM archive"
        );

        Ok(Self {
            archive,
            index,
            provider,
            header,
            decoder,
            cache: SliceCache::new(options.cache_size, options.fetch_size_limit),
            concurrency: options.concurrency.max(1),
        })
    }

    /// Open a local archive and CRAI index.
    pub async fn from_paths(
        cram: impl Into<PathBuf>,
        crai: impl Into<PathBuf>,
        provider: Arc<dyn SequenceProvider>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let index = RangeIndex::read(&LocalStorage::new(crai)).await?;
        Self::open(Arc::new(LocalStorage::new(cram)), index, provider, options).await
    }

    pub fn header(&self) -> &sam::Header {
        &self.header
    }

    /// Id of the `@SQ` line named `name`.
    pub fn reference_sequence_id(&self, name: &str) -> Option<i32> {
        self.header
            .reference_sequences()
            .get_index_of(name.as_bytes())
            .and_then(|i| i32::try_from(i).ok())
    }

    pub fn index(&self) -> &RangeIndex {
        &self.index
    }

    pub fn cache(&self) -> &SliceCache {
        &self.cache
    }

    /// Records on `sequence_id` overlapping `[start, end]` (1-based), in
    /// ascending alignment start with ties in archive order.
    ///
    /// Slices are loaded lazily, up to the configured concurrency at a time.
    /// The first error ends the stream.
    pub fn records(
        &self,
        sequence_id: i32,
        start: i64,
        end: i64,
    ) -> impl Stream<Item = Result<AlignmentRecord>> + '_ {
        let entries = if start > end {
            Vec::new()
        } else {
            self.index.entries_overlapping(sequence_id, start, end)
        };

        tracing::debug!(sequence_id, start, end, slices = entries.len(), "range query");

        // floors[i]: lowest indexed start among entries not yet received
        // once `i` slices have arrived.
        let mut floors = vec![i64::MAX; entries.len() + 1];
        for (i, entry) in entries.iter().enumerate().rev() {
            floors[i] = floors[i + 1].min(entry.alignment_start);
        }

        let slices = stream::iter(entries)
            .map(move |entry| self.slice_records(entry, sequence_id, start, end))
            .buffered(self.concurrency);

        let merge = Merge {
            slices: Box::pin(slices),
            floors,
            received: 0,
            pending: BinaryHeap::new(),
            next_seq: 0,
            failed: false,
        };

        stream::unfold(merge, |mut merge| async move {
            let item = merge.next().await?;
            Some((item, merge))
        })
    }

    /// Collect every record of a range query. Fails as a whole if any slice
    /// fails.
    pub async fn get_records_for_range(
        &self,
        sequence_id: i32,
        start: i64,
        end: i64,
    ) -> Result<Vec<AlignmentRecord>> {
        self.records(sequence_id, start, end).try_collect().await
    }

    async fn load_slice(&self, entry: &IndexEntry) -> Result<Arc<Slice>> {
        self.cache
            .get_or_load(entry.slice_key(), entry.slice_size, || {
                self.decoder.decode(
                    self.archive.as_ref(),
                    entry.container_offset,
                    entry.slice_offset,
                    entry.slice_size,
                )
            })
            .await
    }

    async fn slice_records(
        &self,
        entry: IndexEntry,
        sequence_id: i32,
        start: i64,
        end: i64,
    ) -> Result<Vec<AlignmentRecord>> {
        let slice = self.load_slice(&entry).await?;
        let records = reconstruct(
            &slice,
            self.provider.as_ref(),
            self.decoder.verify_checksums(),
        )
        .await?;

        Ok(records
            .into_iter()
            .filter(|r| {
                r.sequence_id == sequence_id
                    && r.alignment_start < end
                    && r.alignment_start + r.read_length > start
            })
            .collect())
    }
}

/// A record waiting for earlier-starting slices to arrive.
struct Pending {
    start: i64,
    seq: u64,
    record: AlignmentRecord,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.start, self.seq).cmp(&(other.start, other.seq))
    }
}

/// Reorders per-slice record batches into alignment-start order.
struct Merge<S> {
    slices: S,
    floors: Vec<i64>,
    received: usize,
    pending: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
    failed: bool,
}

impl<S> Merge<S>
where
    S: Stream<Item = Result<Vec<AlignmentRecord>>> + Unpin,
{
    async fn next(&mut self) -> Option<Result<AlignmentRecord>> {
        if self.failed {
            return None;
        }

        loop {
            let floor = self.floors.get(self.received).copied().unwrap_or(i64::MAX);
            if self
                .pending
                .peek()
                .is_some_and(|Reverse(top)| top.start <= floor)
            {
                return self.pending.pop().map(|Reverse(p)| Ok(p.record));
            }

            match self.slices.next().await {
                Some(Ok(records)) => {
                    self.received += 1;
                    for record in records {
                        self.pending.push(Reverse(Pending {
                            start: record.alignment_start,
                            seq: self.next_seq,
                            record,
                        }));
                        self.next_seq += 1;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, kind = e.kind(), "range query failed");
                    self.failed = true;
                    self.pending.clear();
                    return Some(Err(e));
                }
                None => {
                    self.received = self.floors.len();
                    if self.pending.is_empty() {
                        return None;
                    }
                }
            }
        }
    }
}
