//! Byte-range storage backends for CRAM archives and their indexes.
//!
//! The decoder never needs a whole archive in memory: every access is a
//! byte-range read through the [`Storage`] trait, so local files and remote
//! HTTP resources can be used interchangeably.
//!
//! # Implementations
//!
//! - [`LocalStorage`] - Local filesystem
//! - [`MemoryStorage`] - In-memory buffer
//! - [`HttpStorage`] - HTTP/HTTPS range requests (feature `http`)
//!
//! # Example
//!
//! ```no_run
//! use cramr::storage::{ByteRange, LocalStorage, Storage};
//!
//! # async fn run() -> cramr::Result<()> {
//! let storage = LocalStorage::new("sample.cram");
//! let definition = storage.read_bytes(Some(ByteRange::new(0, 26))).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "http")]
mod http;
mod local;
mod memory;

#[cfg(feature = "http")]
pub use http::HttpStorage;
pub use local::LocalStorage;
pub use memory::MemoryStorage;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Byte range within a file. `end` is exclusive; `None` reads to end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: Some(start.saturating_add(len)),
        }
    }

    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// Read-only storage backend. Implementations must be safe to share across
/// concurrent queries.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read bytes; a range extending past the end of the data is truncated.
    async fn read_bytes(&self, range: Option<ByteRange>) -> Result<Bytes>;
}

/// Storage for `location`: an `http://` or `https://` URL when the `http`
/// feature is on, otherwise a local path.
pub fn from_location(location: &str) -> Result<Arc<dyn Storage>> {
    #[cfg(feature = "http")]
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(Arc::new(HttpStorage::new(location)?));
    }
    Ok(Arc::new(LocalStorage::new(location)))
}
