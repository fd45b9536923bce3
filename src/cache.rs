//! Bounded cache of decoded slices.

use crate::formats::cram::Slice;
use crate::{Error, Result};
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OnceCell};

/// `(container_offset, slice_offset)` of a slice in the archive.
pub type SliceKey = (u64, u64);

type Entry = Arc<OnceCell<Arc<Slice>>>;

/// LRU cache of decoded slices, keyed by their archive position.
///
/// Capacity counts slices, not bytes. Each key owns a once-cell, so
/// concurrent misses on one slice share a single decode. A load that fails
/// or is dropped before finishing leaves nothing behind.
pub struct SliceCache {
    entries: Option<Mutex<LruCache<SliceKey, Entry>>>,
    fetch_size_limit: u64,
    decodes: AtomicU64,
}

impl SliceCache {
    /// A `capacity` of 0 disables caching; every lookup then decodes.
    pub fn new(capacity: usize, fetch_size_limit: u64) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            fetch_size_limit,
            decodes: AtomicU64::new(0),
        }
    }

    /// Return the cached slice for `key`, running `loader` on a miss.
    ///
    /// `declared_size` is the slice's size as recorded in the index; slices
    /// larger than the fetch limit are refused before anything is read.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: SliceKey,
        declared_size: u64,
        loader: F,
    ) -> Result<Arc<Slice>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Slice>>,
    {
        if declared_size > self.fetch_size_limit {
            return Err(Error::OversizedFetch {
                size: declared_size,
                limit: self.fetch_size_limit,
            });
        }

        let Some(entries) = &self.entries else {
            return self.load(loader).await;
        };

        let cell = {
            let mut entries = entries.lock().await;
            match entries.get(&key) {
                Some(cell) => {
                    tracing::trace!(?key, "slice cache hit");
                    cell.clone()
                }
                None => {
                    tracing::trace!(?key, "slice cache miss");
                    let cell = Entry::default();
                    if let Some((evicted, _)) = entries.push(key, cell.clone()) {
                        tracing::trace!(?evicted, "slice cache eviction");
                    }
                    cell
                }
            }
        };

        let result = cell.get_or_try_init(|| self.load(loader)).await.cloned();

        if result.is_err() {
            let mut entries = entries.lock().await;
            let stale = entries
                .peek(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell) && !current.initialized());
            if stale {
                entries.pop(&key);
            }
        }

        result
    }

    async fn load<F, Fut>(&self, loader: F) -> Result<Arc<Slice>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Slice>>,
    {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        loader().await.map(Arc::new)
    }

    /// Number of times a loader has been run.
    pub fn decode_count(&self) -> u64 {
        self.decodes.load(Ordering::Relaxed)
    }

    pub fn fetch_size_limit(&self) -> u64 {
        self.fetch_size_limit
    }

    pub async fn len(&self) -> usize {
        match &self.entries {
            Some(entries) => entries.lock().await.len(),
            None => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().await.clear();
        }
    }
}
