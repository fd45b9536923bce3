use super::{ByteRange, Storage};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Storage over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Bytes,
}

impl MemoryStorage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read_bytes(&self, range: Option<ByteRange>) -> Result<Bytes> {
        let len = self.data.len();
        let Some(r) = range else {
            return Ok(self.data.clone());
        };
        let start = (r.start as usize).min(len);
        let end = r.end.map_or(len, |end| (end as usize).min(len)).max(start);
        Ok(self.data.slice(start..end))
    }
}
