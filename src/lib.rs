//! Indexed random-access reading of CRAM alignment archives.
//!
//! Given a CRAM archive, its CRAI index and a reference sequence source,
//! [`IndexedCramReader`] returns the alignment records overlapping a genomic
//! interval, touching only the slices the index points at and rebuilding
//! read bases from the reference on demand.
//!
//! ```no_run
//! use cramr::{IndexedCramReader, IndexedFasta, ReaderOptions};
//! use futures::TryStreamExt;
//! use std::sync::Arc;
//!
//! # async fn run() -> cramr::Result<()> {
//! let fasta = Arc::new(IndexedFasta::from_path("ref.fa").await?);
//! let reader = IndexedCramReader::from_paths(
//!     "sample.cram",
//!     "sample.cram.crai",
//!     fasta,
//!     ReaderOptions::default(),
//! )
//! .await?;
//!
//! let records: Vec<_> = reader.records(0, 10_000, 20_000).try_collect().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod formats;
pub mod reader;
pub mod reference;
pub mod storage;

pub use config::{Config, ReaderOptions};
pub use error::{Error, Result};
pub use formats::cram::AlignmentRecord;
pub use formats::{IndexEntry, IndexedFasta, RangeIndex};
pub use reader::IndexedCramReader;
pub use reference::SequenceProvider;
