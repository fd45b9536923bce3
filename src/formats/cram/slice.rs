//! Slice headers and decoded slices.

use super::compression_header::CompressionHeader;
use super::container::{Block, ContentType};
use super::num::ByteReader;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Reference sequence id of a slice holding records from several references.
pub const MULTI_REFERENCE: i32 = -2;
pub const UNMAPPED: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub reference_sequence_id: i32,
    pub alignment_start: i32,
    pub alignment_span: i32,
    pub record_count: i32,
    pub record_counter: i64,
    pub block_count: i32,
    pub block_content_ids: Vec<i32>,
    /// `-1` when the slice carries no embedded reference.
    pub embedded_reference_content_id: i32,
    pub reference_md5: [u8; 16],
}

impl SliceHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        Ok(Self {
            reference_sequence_id: reader.read_itf8()?,
            alignment_start: reader.read_itf8()?,
            alignment_span: reader.read_itf8()?,
            record_count: reader.read_itf8()?,
            record_counter: reader.read_ltf8()?,
            block_count: reader.read_itf8()?,
            block_content_ids: reader.read_itf8_array()?,
            embedded_reference_content_id: reader.read_itf8()?,
            reference_md5: reader.read_array()?,
        })
    }

    pub fn is_multi_reference(&self) -> bool {
        self.reference_sequence_id == MULTI_REFERENCE
    }

    /// Whether a reference MD5 is recorded (all zeros means absent).
    pub fn has_reference_md5(&self) -> bool {
        self.reference_md5.iter().any(|&b| b != 0)
    }
}

/// A fully decompressed slice. Immutable once built; shared through the
/// slice cache as `Arc<Slice>`.
#[derive(Debug)]
pub struct Slice {
    pub header: SliceHeader,
    pub compression_header: Arc<CompressionHeader>,
    pub core: Vec<u8>,
    pub external: HashMap<i32, Vec<u8>>,
}

impl Slice {
    /// Parse the slice header block and its data blocks from `data`,
    /// decompressing every block.
    pub fn parse(
        data: &[u8],
        compression_header: Arc<CompressionHeader>,
        has_checksums: bool,
        verify: bool,
    ) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let header_block = Block::read(&mut reader, has_checksums, verify)?;
        if header_block.content_type != ContentType::SliceHeader {
            return Err(Error::Decode(format!(
                "expected a slice header block, found {:?}",
                header_block.content_type
            )));
        }
        let header = SliceHeader::parse(&header_block.decompress()?)?;

        let block_count = usize::try_from(header.block_count)
            .map_err(|_| Error::Decode(format!("negative block count: {}", header.block_count)))?;

        let mut core = None;
        let mut external = HashMap::with_capacity(block_count.min(reader.remaining()));

        for _ in 0..block_count {
            let block = Block::read(&mut reader, has_checksums, verify)?;
            match block.content_type {
                ContentType::CoreData => core = Some(block.decompress()?),
                ContentType::ExternalData => {
                    external.insert(block.content_id, block.decompress()?);
                }
                other => {
                    return Err(Error::Decode(format!(
                        "unexpected {:?} block inside a slice",
                        other
                    )));
                }
            }
        }

        Ok(Self {
            header,
            compression_header,
            core: core.unwrap_or_default(),
            external,
        })
    }

    /// Decompressed bytes across the core and external blocks.
    pub fn data_len(&self) -> usize {
        self.core.len() + self.external.values().map(Vec::len).sum::<usize>()
    }

    /// Embedded reference bases, if the slice carries them.
    pub fn embedded_reference(&self) -> Option<&[u8]> {
        if self.header.embedded_reference_content_id < 0 {
            return None;
        }
        self.external
            .get(&self.header.embedded_reference_content_id)
            .map(Vec::as_slice)
    }
}
