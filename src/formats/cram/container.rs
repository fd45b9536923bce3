//! File definition, container headers and blocks.

use super::codec::{self, CompressionMethod};
use super::num::ByteReader;
use crate::{Error, Result};
use noodles::cram;

pub const FILE_DEFINITION_LEN: usize = 26;

/// Format version from the 26-byte file definition at the start of every
/// CRAM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDefinition {
    pub major_version: u8,
    pub minor_version: u8,
}

impl FileDefinition {
    pub fn read(data: &[u8]) -> Result<Self> {
        let definition = cram::io::Reader::new(data)
            .read_file_definition()
            .map_err(|e| Error::InvalidFormat(format!("invalid CRAM file definition: {}", e)))?;

        let version = definition.version();
        let (major_version, minor_version) = (version.major(), version.minor());
        if !(2..=3).contains(&major_version) {
            return Err(Error::InvalidFormat(format!(
                "unsupported CRAM version {}.{}",
                major_version, minor_version
            )));
        }

        Ok(Self {
            major_version,
            minor_version,
        })
    }

    /// CRAM 3.x carries CRC32 checksums on container headers and blocks.
    pub fn has_checksums(&self) -> bool {
        self.major_version >= 3
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Byte length of the container body (everything after this header).
    pub length: i32,
    pub reference_sequence_id: i32,
    pub alignment_start: i32,
    pub alignment_span: i32,
    pub record_count: i32,
    pub record_counter: i64,
    pub bases: i64,
    pub block_count: i32,
    /// Slice offsets relative to the start of the container body.
    pub landmarks: Vec<i32>,
    pub crc32: Option<u32>,
    /// Encoded size of this header in bytes.
    pub header_len: usize,
}

impl ContainerHeader {
    /// Parse a header from the start of `data`.
    ///
    /// Fails with [`Error::Truncated`] when `data` ends early, which callers
    /// use to grow their read window.
    pub fn parse(data: &[u8], has_checksums: bool, verify: bool) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let length = reader.read_i32_le()?;
        let reference_sequence_id = reader.read_itf8()?;
        let alignment_start = reader.read_itf8()?;
        let alignment_span = reader.read_itf8()?;
        let record_count = reader.read_itf8()?;
        let record_counter = reader.read_ltf8()?;
        let bases = reader.read_ltf8()?;
        let block_count = reader.read_itf8()?;
        let landmarks = reader.read_itf8_array()?;

        let crc32 = if has_checksums {
            let covered = reader.consumed();
            let expected = reader.read_u32_le()?;
            if verify {
                verify_crc32(covered, expected, "container header")?;
            }
            Some(expected)
        } else {
            None
        };

        if length < 0 {
            return Err(Error::Decode(format!("negative container length: {}", length)));
        }

        Ok(Self {
            length,
            reference_sequence_id,
            alignment_start,
            alignment_span,
            record_count,
            record_counter,
            bases,
            block_count,
            landmarks,
            crc32,
            header_len: reader.position(),
        })
    }

    /// Size in bytes of the compression header block that opens the body.
    pub fn compression_header_len(&self) -> Result<u64> {
        let first = self
            .landmarks
            .first()
            .ok_or_else(|| Error::Decode("container has no slices".to_string()))?;
        u64::try_from(*first).map_err(|_| Error::Decode(format!("negative landmark: {}", first)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    FileHeader,
    CompressionHeader,
    SliceHeader,
    Reserved,
    ExternalData,
    CoreData,
}

impl TryFrom<u8> for ContentType {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self> {
        match n {
            0 => Ok(Self::FileHeader),
            1 => Ok(Self::CompressionHeader),
            2 => Ok(Self::SliceHeader),
            3 => Ok(Self::Reserved),
            4 => Ok(Self::ExternalData),
            5 => Ok(Self::CoreData),
            _ => Err(Error::Decode(format!("invalid block content type: {}", n))),
        }
    }
}

/// A block as stored, still compressed.
#[derive(Debug, Clone)]
pub struct Block<'a> {
    pub method: CompressionMethod,
    pub content_type: ContentType,
    pub content_id: i32,
    pub uncompressed_len: usize,
    pub data: &'a [u8],
    pub crc32: Option<u32>,
}

impl<'a> Block<'a> {
    /// Read one block from `reader`, verifying its CRC32 when asked.
    pub fn read(reader: &mut ByteReader<'a>, has_checksums: bool, verify: bool) -> Result<Self> {
        let start = reader.position();
        let method = reader.read_u8()?;
        let content_type = ContentType::try_from(reader.read_u8()?)?;
        let content_id = reader.read_itf8()?;
        let compressed_len = reader.read_len()?;
        let uncompressed_len = reader.read_len()?;
        let data = reader.read_bytes(compressed_len)?;

        let crc32 = if has_checksums {
            let covered = &reader.consumed()[start..];
            let expected = reader.read_u32_le()?;
            if verify {
                verify_crc32(covered, expected, "block")?;
            }
            Some(expected)
        } else {
            None
        };

        // Checked after the CRC so corruption is reported first.
        let method = CompressionMethod::try_from(method)?;

        Ok(Self {
            method,
            content_type,
            content_id,
            uncompressed_len,
            data,
            crc32,
        })
    }

    pub fn decompress(&self) -> Result<Vec<u8>> {
        codec::decompress(self.method, self.data, self.uncompressed_len)
    }
}

pub fn verify_crc32(data: &[u8], expected: u32, what: &str) -> Result<()> {
    let actual = crc32fast::hash(data);
    if actual != expected {
        return Err(Error::CorruptBlock(format!(
            "{} CRC32 mismatch: expected {:08x}, computed {:08x}",
            what, expected, actual
        )));
    }
    Ok(())
}
