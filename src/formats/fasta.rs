use crate::reference::SequenceProvider;
use crate::storage::{ByteRange, LocalStorage, Storage};
use crate::{Error, Result};
use async_trait::async_trait;
use noodles::fasta::fai;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Location of one sequence inside a FASTA file, as recorded in its FAI.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SequenceLayout {
    name: String,
    length: u64,
    offset: u64,
    line_bases: u64,
    line_width: u64,
}

impl SequenceLayout {
    /// Byte offset of the 0-based base `pos`.
    fn byte_offset(&self, pos: u64) -> u64 {
        self.offset + (pos / self.line_bases) * self.line_width + pos % self.line_bases
    }
}

/// Reference provider backed by a FASTA file and its FAI index.
///
/// Sequence ids are FAI line numbers, which matches the order of `@SQ`
/// lines for archives written against the same reference.
pub struct IndexedFasta {
    storage: Arc<dyn Storage>,
    sequences: Vec<SequenceLayout>,
}

impl IndexedFasta {
    /// Open `path`, reading the index from `<path>.fai`.
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index_path = PathBuf::from(format!("{}.fai", path.display()));
        Self::open(Arc::new(LocalStorage::new(path)), &index_path).await
    }

    /// Open a FASTA held in `storage` with a local FAI index.
    pub async fn open(storage: Arc<dyn Storage>, index_path: &Path) -> Result<Self> {
        // The FAI reader is synchronous.
        let index = tokio::task::spawn_blocking({
            let path = index_path.to_path_buf();
            move || fai::read(&path)
        })
        .await
        .map_err(|e| Error::Internal(format!("failed to read FAI index: {}", e)))?
        .map_err(|e| Error::InvalidFormat(format!("failed to read FAI index: {}", e)))?;

        Self::from_index(storage, &index)
    }

    pub fn from_index(storage: Arc<dyn Storage>, index: &fai::Index) -> Result<Self> {
        let sequences = index
            .as_ref()
            .iter()
            .map(|record| {
                let layout = SequenceLayout {
                    name: String::from_utf8_lossy(record.name()).into_owned(),
                    length: record.length() as u64,
                    offset: record.offset(),
                    line_bases: record.line_bases() as u64,
                    line_width: record.line_width() as u64,
                };
                if layout.line_bases == 0 || layout.line_width < layout.line_bases {
                    return Err(Error::InvalidFormat(format!(
                        "invalid FAI line layout for {}",
                        layout.name
                    )));
                }
                Ok(layout)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(sequences = sequences.len(), "loaded FASTA index");

        Ok(Self { storage, sequences })
    }

    pub fn sequence_id(&self, name: &str) -> Option<i32> {
        self.sequences
            .iter()
            .position(|s| s.name == name)
            .and_then(|i| i32::try_from(i).ok())
    }

    pub fn sequence_len(&self, sequence_id: i32) -> Option<u64> {
        self.layout(sequence_id).map(|s| s.length)
    }

    fn layout(&self, sequence_id: i32) -> Option<&SequenceLayout> {
        usize::try_from(sequence_id)
            .ok()
            .and_then(|i| self.sequences.get(i))
    }
}

#[async_trait]
impl SequenceProvider for IndexedFasta {
    async fn get_residues(&self, sequence_id: i32, start: u64, end: u64) -> Result<Vec<u8>> {
        let layout = self
            .layout(sequence_id)
            .ok_or_else(|| Error::NotFound(format!("reference sequence {}", sequence_id)))?;

        let end = end.min(layout.length);
        if start >= end {
            return Ok(Vec::new());
        }

        let range = ByteRange {
            start: layout.byte_offset(start),
            end: Some(layout.byte_offset(end - 1) + 1),
        };
        let data = self.storage.read_bytes(Some(range)).await?;

        let residues: Vec<u8> = data
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();

        let expected = (end - start) as usize;
        if residues.len() != expected {
            return Err(Error::ReferenceFetch(format!(
                "{}: read {} of {} bases at [{}, {})",
                layout.name,
                residues.len(),
                expected,
                start,
                end
            )));
        }

        Ok(residues)
    }
}
