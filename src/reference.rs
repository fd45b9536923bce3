//! Reference sequence access used to rebuild reference-compressed reads.

use crate::{Error, Result};
use async_trait::async_trait;

/// Source of reference residues.
///
/// Coordinates are 0-based and half-open: `get_residues(id, 0, 10)` returns
/// the first ten bases of sequence `id`. Implementations may return fewer
/// bases than requested when the range runs past the end of the sequence;
/// callers decide whether a short answer is an error.
#[async_trait]
pub trait SequenceProvider: Send + Sync {
    async fn get_residues(&self, sequence_id: i32, start: u64, end: u64) -> Result<Vec<u8>>;
}

/// Sequences held in memory, identified by their position in the list.
#[derive(Debug, Clone, Default)]
pub struct MemorySequences {
    sequences: Vec<Vec<u8>>,
}

impl MemorySequences {
    pub fn new(sequences: Vec<Vec<u8>>) -> Self {
        Self { sequences }
    }
}

#[async_trait]
impl SequenceProvider for MemorySequences {
    async fn get_residues(&self, sequence_id: i32, start: u64, end: u64) -> Result<Vec<u8>> {
        let sequence = usize::try_from(sequence_id)
            .ok()
            .and_then(|i| self.sequences.get(i))
            .ok_or_else(|| Error::NotFound(format!("reference sequence {}", sequence_id)))?;

        let len = sequence.len() as u64;
        let start = start.min(len) as usize;
        let end = end.min(len) as usize;
        Ok(sequence[start..end.max(start)].to_vec())
    }
}
