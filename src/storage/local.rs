use super::{ByteRange, Storage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Local filesystem storage. A fresh handle is opened per read so concurrent
/// queries never contend on a shared cursor.
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<fs::File> {
        fs::File::open(&self.path)
            .await
            .map_err(|_| Error::NotFound(self.path.display().to_string()))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn read_bytes(&self, range: Option<ByteRange>) -> Result<Bytes> {
        let mut file = self.open().await?;

        let bytes = match range {
            Some(r) => {
                file.seek(std::io::SeekFrom::Start(r.start)).await?;
                let mut buf = Vec::new();
                match r.len() {
                    Some(len) => {
                        buf.reserve(len as usize);
                        file.take(len).read_to_end(&mut buf).await?;
                    }
                    None => {
                        file.read_to_end(&mut buf).await?;
                    }
                }
                Bytes::from(buf)
            }
            None => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Bytes::from(buf)
            }
        };

        Ok(bytes)
    }
}
