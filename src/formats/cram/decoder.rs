//! Byte-range driven container and slice decoding.

use super::compression_header::CompressionHeader;
use super::container::{Block, ContainerHeader, ContentType, FILE_DEFINITION_LEN, FileDefinition};
use super::num::ByteReader;
use super::slice::Slice;
use crate::storage::{ByteRange, Storage};
use crate::{Error, Result};
use bytes::Bytes;
use noodles::cram;
use std::sync::Arc;

/// Initial read window for a container header; doubled while too small.
const HEADER_WINDOW_LEN: u64 = 256;

/// Decodes slices straight from archive byte ranges.
#[derive(Debug, Clone)]
pub struct ContainerDecoder {
    has_checksums: bool,
    verify_checksums: bool,
    fetch_size_limit: u64,
}

impl ContainerDecoder {
    pub fn new(file_definition: &FileDefinition, verify_checksums: bool, fetch_size_limit: u64) -> Self {
        if verify_checksums && !file_definition.has_checksums() {
            tracing::warn!(
                major_version = file_definition.major_version,
                "CRAM 2.x archives carry no CRC32 checksums; only reference MD5s are verified"
            );
        }
        Self {
            has_checksums: file_definition.has_checksums(),
            verify_checksums,
            fetch_size_limit,
        }
    }

    pub fn verify_checksums(&self) -> bool {
        self.verify_checksums
    }

    /// Read exactly `len` bytes at `start`, refusing reads over the limit.
    async fn fetch(&self, storage: &dyn Storage, start: u64, len: u64, what: &'static str) -> Result<Bytes> {
        if len > self.fetch_size_limit {
            return Err(Error::OversizedFetch {
                size: len,
                limit: self.fetch_size_limit,
            });
        }
        let data = storage.read_bytes(Some(ByteRange::new(start, len))).await?;
        if (data.len() as u64) < len {
            return Err(Error::Truncated(what));
        }
        Ok(data)
    }

    /// Read the container header at `offset`.
    pub async fn read_container_header(&self, storage: &dyn Storage, offset: u64) -> Result<ContainerHeader> {
        let mut window = HEADER_WINDOW_LEN.min(self.fetch_size_limit);
        loop {
            let data = storage.read_bytes(Some(ByteRange::new(offset, window))).await?;
            match ContainerHeader::parse(&data, self.has_checksums, self.verify_checksums) {
                Ok(header) => return Ok(header),
                Err(Error::Truncated(_)) if data.len() as u64 == window && window < self.fetch_size_limit => {
                    window = (window * 2).min(self.fetch_size_limit);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read and parse the compression header that opens a container body.
    async fn read_compression_header(
        &self,
        storage: &dyn Storage,
        body_offset: u64,
        header: &ContainerHeader,
    ) -> Result<CompressionHeader> {
        let len = header.compression_header_len()?;
        let data = self.fetch(storage, body_offset, len, "compression header").await?;
        let mut reader = ByteReader::new(&data);
        let block = Block::read(&mut reader, self.has_checksums, self.verify_checksums)?;
        if block.content_type != ContentType::CompressionHeader {
            return Err(Error::Decode(format!(
                "expected a compression header block, found {:?}",
                block.content_type
            )));
        }
        CompressionHeader::parse(&block.decompress()?)
    }

    /// Decode the slice at `slice_offset` (relative to the container body) of
    /// the container at `container_offset`.
    pub async fn decode(
        &self,
        storage: &dyn Storage,
        container_offset: u64,
        slice_offset: u64,
        slice_size: u64,
    ) -> Result<Slice> {
        let header = self.read_container_header(storage, container_offset).await?;
        let body_offset = container_offset + header.header_len as u64;

        let container_len = header.length as u64;
        if slice_offset.saturating_add(slice_size) > container_len {
            return Err(Error::Decode(format!(
                "slice at {}+{} extends past container body of {} bytes",
                slice_offset, slice_size, container_len
            )));
        }

        let compression_header = self
            .read_compression_header(storage, body_offset, &header)
            .await?;

        let data = self
            .fetch(storage, body_offset + slice_offset, slice_size, "slice")
            .await?;
        let slice = Slice::parse(
            &data,
            Arc::new(compression_header),
            self.has_checksums,
            self.verify_checksums,
        )?;

        tracing::debug!(
            container_offset,
            slice_offset,
            records = slice.header.record_count,
            reference_sequence_id = slice.header.reference_sequence_id,
            "decoded slice"
        );

        Ok(slice)
    }
}

/// Archive preamble: file definition and the SAM header text.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub definition: FileDefinition,
    pub sam_header: String,
}

impl FileHeader {
    /// Read the file definition and SAM header container at the start of an
    /// archive.
    pub async fn read(storage: &dyn Storage, fetch_size_limit: u64) -> Result<Self> {
        let data = storage
            .read_bytes(Some(ByteRange::new(0, FILE_DEFINITION_LEN as u64)))
            .await?;
        let definition = FileDefinition::read(&data)?;

        let decoder = ContainerDecoder {
            has_checksums: definition.has_checksums(),
            verify_checksums: false,
            fetch_size_limit,
        };
        let header = decoder
            .read_container_header(storage, FILE_DEFINITION_LEN as u64)
            .await?;
        let preamble_len =
            FILE_DEFINITION_LEN as u64 + header.header_len as u64 + header.length as u64;
        let preamble = decoder
            .fetch(storage, 0, preamble_len, "SAM header container")
            .await?;

        let mut reader = cram::io::Reader::new(&preamble[..]);
        reader
            .read_file_definition()
            .map_err(|e| Error::InvalidFormat(format!("invalid CRAM file definition: {}", e)))?;
        let sam_header = reader
            .read_file_header()
            .map_err(|e| Error::InvalidFormat(format!("failed to read CRAM header: {}", e)))?
            .trim_end_matches('\0')
            .to_string();

        tracing::debug!(
            version = format!("{}.{}", definition.major_version, definition.minor_version),
            header_len = sam_header.len(),
            "read CRAM file header"
        );

        Ok(Self {
            definition,
            sam_header,
        })
    }
}
