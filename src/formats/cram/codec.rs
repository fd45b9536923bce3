//! Block compression methods.

use super::num::MAX_PREALLOCATION;
use super::rans;
use crate::{Error, Result};
use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use std::io::Read;
use xz2::read::XzDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Gzip,
    Bzip2,
    Lzma,
    Rans4x8,
    Rans4x16,
    AdaptiveArithmetic,
    Fqzcomp,
    NameTokenizer,
}

impl TryFrom<u8> for CompressionMethod {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self> {
        match n {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Bzip2),
            3 => Ok(Self::Lzma),
            4 => Ok(Self::Rans4x8),
            5 => Ok(Self::Rans4x16),
            6 => Ok(Self::AdaptiveArithmetic),
            7 => Ok(Self::Fqzcomp),
            8 => Ok(Self::NameTokenizer),
            _ => Err(Error::UnsupportedCompression(n)),
        }
    }
}

impl From<CompressionMethod> for u8 {
    fn from(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::None => 0,
            CompressionMethod::Gzip => 1,
            CompressionMethod::Bzip2 => 2,
            CompressionMethod::Lzma => 3,
            CompressionMethod::Rans4x8 => 4,
            CompressionMethod::Rans4x16 => 5,
            CompressionMethod::AdaptiveArithmetic => 6,
            CompressionMethod::Fqzcomp => 7,
            CompressionMethod::NameTokenizer => 8,
        }
    }
}

/// Read at most one byte past `limit`, so an overlong stream still fails the
/// length check without being inflated in full.
fn read_all<R: Read>(reader: R, limit: usize, name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit.min(MAX_PREALLOCATION));
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .map_err(|e| Error::CorruptBlock(format!("failed to decompress {} block: {}", name, e)))?;
    Ok(buf)
}

/// Decompress `src` and check the result against the declared length.
pub fn decompress(method: CompressionMethod, src: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
    let dst = match method {
        CompressionMethod::None => src.to_vec(),
        CompressionMethod::Gzip => read_all(MultiGzDecoder::new(src), uncompressed_len, "gzip")?,
        CompressionMethod::Bzip2 => read_all(BzDecoder::new(src), uncompressed_len, "bzip2")?,
        CompressionMethod::Lzma => read_all(XzDecoder::new(src), uncompressed_len, "lzma")?,
        CompressionMethod::Rans4x8 => rans::decode(src, uncompressed_len)?,
        other => return Err(Error::UnsupportedCompression(u8::from(other))),
    };

    if dst.len() != uncompressed_len {
        return Err(Error::CorruptBlock(format!(
            "decompressed length {} does not match declared length {}",
            dst.len(),
            uncompressed_len
        )));
    }

    Ok(dst)
}
