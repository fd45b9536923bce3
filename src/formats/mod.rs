//! File formats: the CRAI index, CRAM archives, and indexed FASTA references.
//!
//! - [`crai`] - CRAI index parsing and overlap queries
//! - [`cram`] - container, slice and record decoding
//! - [`fasta`] - FAI-indexed FASTA as a [`SequenceProvider`](crate::reference::SequenceProvider)

pub mod crai;
pub mod cram;
pub mod fasta;

pub use crai::{IndexEntry, RangeIndex};
pub use fasta::IndexedFasta;
