//! Data-series encodings and the bit/byte streams they read from.

use super::num::ByteReader;
use crate::{Error, Result};
use std::collections::HashMap;

/// MSB-first bit reader over the core data block.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte: 0,
            bit: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        let b = *self.data.get(self.byte).ok_or(Error::Truncated("core data block"))?;
        let bit = (b >> (7 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }
        Ok(bit as u32)
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(Error::Decode(format!("cannot read {} bits at once", n)));
        }
        let mut value: u64 = 0;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value as u32)
    }

    /// Count `bit`-valued bits up to (and consuming) the first other bit.
    fn read_unary(&mut self, bit: u32) -> Result<u32> {
        let mut n = 0;
        while self.read_bit()? == bit {
            n += 1;
            if n > 32 {
                return Err(Error::Decode("unary code longer than 32 bits".to_string()));
            }
        }
        Ok(n)
    }
}

/// Streams a slice's records are decoded from.
pub struct DecodeStreams<'a> {
    pub core: BitReader<'a>,
    pub external: HashMap<i32, ByteReader<'a>>,
}

impl<'a> DecodeStreams<'a> {
    pub fn new(core: &'a [u8], external: &'a HashMap<i32, Vec<u8>>) -> Self {
        Self {
            core: BitReader::new(core),
            external: external
                .iter()
                .map(|(&id, data)| (id, ByteReader::new(data)))
                .collect(),
        }
    }

    fn external(&mut self, content_id: i32) -> Result<&mut ByteReader<'a>> {
        self.external
            .get_mut(&content_id)
            .ok_or_else(|| Error::Decode(format!("missing external block {}", content_id)))
    }
}

/// Canonical Huffman code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanCode {
    /// Symbols sorted by (bit length, symbol).
    symbols: Vec<i32>,
    /// Per bit length: (first code, index of first symbol, count).
    lengths: Vec<(u32, usize, usize)>,
}

impl HuffmanCode {
    pub fn new(alphabet: &[i32], bit_lengths: &[i32]) -> Result<Self> {
        if alphabet.len() != bit_lengths.len() || alphabet.is_empty() {
            return Err(Error::Decode(
                "huffman alphabet and bit lengths differ in size".to_string(),
            ));
        }

        let mut pairs = Vec::with_capacity(alphabet.len());
        for (&symbol, &len) in alphabet.iter().zip(bit_lengths) {
            let len = u32::try_from(len)
                .ok()
                .filter(|&len| len <= 32)
                .ok_or_else(|| Error::Decode(format!("invalid huffman bit length: {}", len)))?;
            pairs.push((len, symbol));
        }
        pairs.sort_unstable();

        let max_len = pairs.last().map_or(0, |&(len, _)| len) as usize;
        let mut lengths = vec![(0u32, 0usize, 0usize); max_len + 1];
        let mut code: u32 = 0;
        let mut prev_len = pairs[0].0;

        for (i, &(len, _)) in pairs.iter().enumerate() {
            if i > 0 {
                code = code.wrapping_add(1);
            }
            code = code.checked_shl(len - prev_len).unwrap_or(0);
            prev_len = len;

            let entry = &mut lengths[len as usize];
            if entry.2 == 0 {
                *entry = (code, i, 0);
            }
            entry.2 += 1;
        }

        Ok(Self {
            symbols: pairs.into_iter().map(|(_, symbol)| symbol).collect(),
            lengths,
        })
    }

    fn decode(&self, core: &mut BitReader<'_>) -> Result<i32> {
        // A single symbol is stored with zero bits.
        if self.lengths.len() == 1 {
            return Ok(self.symbols[0]);
        }

        let mut code: u32 = 0;
        for &(first, index, count) in self.lengths.iter().skip(1) {
            code = (code << 1) | core.read_bit()?;
            if count > 0 && code >= first && ((code - first) as usize) < count {
                return Ok(self.symbols[index + (code - first) as usize]);
            }
        }

        Err(Error::Decode("invalid huffman code".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    Null,
    External { content_id: i32 },
    Golomb { offset: i32, m: u32 },
    Huffman(HuffmanCode),
    ByteArrayLen { len: Box<Encoding>, values: Box<Encoding> },
    ByteArrayStop { stop: u8, content_id: i32 },
    Beta { offset: i32, bits: u32 },
    Subexp { offset: i32, k: u32 },
    GolombRice { offset: i32, log2m: u32 },
    Gamma { offset: i32 },
}

impl Encoding {
    /// Codec id, parameter length, parameters.
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let id = reader.read_itf8()?;
        let params = reader.read_byte_array()?;
        let mut params = ByteReader::new(params);

        let encoding = match id {
            0 => Self::Null,
            1 => Self::External {
                content_id: params.read_itf8()?,
            },
            2 => {
                let offset = params.read_itf8()?;
                let m = params.read_itf8()?;
                Self::Golomb {
                    offset,
                    m: u32::try_from(m)
                        .ok()
                        .filter(|&m| m > 0)
                        .ok_or_else(|| Error::Decode(format!("invalid golomb m: {}", m)))?,
                }
            }
            3 => {
                let alphabet = params.read_itf8_array()?;
                let bit_lengths = params.read_itf8_array()?;
                Self::Huffman(HuffmanCode::new(&alphabet, &bit_lengths)?)
            }
            4 => Self::ByteArrayLen {
                len: Box::new(Self::read(&mut params)?),
                values: Box::new(Self::read(&mut params)?),
            },
            5 => Self::ByteArrayStop {
                stop: params.read_u8()?,
                content_id: params.read_itf8()?,
            },
            6 => {
                let offset = params.read_itf8()?;
                let bits = params.read_itf8()?;
                Self::Beta {
                    offset,
                    bits: u32::try_from(bits)
                        .map_err(|_| Error::Decode(format!("invalid beta length: {}", bits)))?,
                }
            }
            7 => {
                let offset = params.read_itf8()?;
                let k = params.read_itf8()?;
                Self::Subexp {
                    offset,
                    k: bit_count(k, "subexp k")?,
                }
            }
            8 => {
                let offset = params.read_itf8()?;
                let log2m = params.read_itf8()?;
                Self::GolombRice {
                    offset,
                    log2m: bit_count(log2m, "golomb-rice log2m")?,
                }
            }
            9 => Self::Gamma {
                offset: params.read_itf8()?,
            },
            _ => return Err(Error::UnsupportedEncoding(format!("codec id {}", id))),
        };

        Ok(encoding)
    }

    pub fn decode_int(&self, streams: &mut DecodeStreams<'_>) -> Result<i32> {
        match self {
            Self::External { content_id } => streams.external(*content_id)?.read_itf8(),
            Self::Huffman(code) => code.decode(&mut streams.core),
            Self::Beta { offset, bits } => {
                Ok((streams.core.read_bits(*bits)? as i32).wrapping_sub(*offset))
            }
            Self::Gamma { offset } => {
                let core = &mut streams.core;
                let n = core.read_unary(0)?;
                let value = (1u64 << n) | u64::from(core.read_bits(n)?);
                with_offset(value, *offset)
            }
            Self::Subexp { offset, k } => {
                let core = &mut streams.core;
                let i = core.read_unary(1)?;
                let value = if i == 0 {
                    u64::from(core.read_bits(*k)?)
                } else {
                    let b = (i - 1)
                        .checked_add(*k)
                        .ok_or_else(|| Error::Decode(format!("invalid subexp k: {}", k)))?;
                    // read_bits refuses b > 32, so the shift below stays in range.
                    let low = u64::from(core.read_bits(b)?);
                    (1u64 << b) | low
                };
                with_offset(value, *offset)
            }
            Self::Golomb { offset, m } => {
                let core = &mut streams.core;
                if *m == 0 {
                    return Err(Error::Decode("invalid golomb m: 0".to_string()));
                }
                let q = core.read_unary(1)?;
                let b = 32 - (m - 1).leading_zeros();
                let r = if b == 0 {
                    0
                } else {
                    let cutoff = (1u64 << b) - u64::from(*m);
                    let r = u64::from(core.read_bits(b - 1)?);
                    if r >= cutoff {
                        ((r << 1) | u64::from(core.read_bit()?)) - cutoff
                    } else {
                        r
                    }
                };
                with_offset(u64::from(q) * u64::from(*m) + r, *offset)
            }
            Self::GolombRice { offset, log2m } => {
                let core = &mut streams.core;
                let q = core.read_unary(1)?;
                // read_bits refuses log2m > 32 and q is at most 32.
                let r = u64::from(core.read_bits(*log2m)?);
                with_offset((u64::from(q) << *log2m) | r, *offset)
            }
            Self::Null => Err(Error::Decode("data series has no encoding".to_string())),
            Self::ByteArrayLen { .. } | Self::ByteArrayStop { .. } => Err(
                Error::UnsupportedEncoding("byte array encoding used for an integer".to_string()),
            ),
        }
    }

    pub fn decode_byte(&self, streams: &mut DecodeStreams<'_>) -> Result<u8> {
        match self {
            Self::External { content_id } => streams.external(*content_id)?.read_u8(),
            _ => Ok(self.decode_int(streams)? as u8),
        }
    }

    pub fn decode_bytes(&self, streams: &mut DecodeStreams<'_>) -> Result<Vec<u8>> {
        match self {
            Self::ByteArrayLen { len, values } => {
                let n = len.decode_int(streams)?;
                let n = usize::try_from(n)
                    .map_err(|_| Error::Decode(format!("negative byte array length: {}", n)))?;
                values.decode_n_bytes(streams, n)
            }
            Self::ByteArrayStop { stop, content_id } => {
                let reader = streams.external(*content_id)?;
                let mut buf = Vec::new();
                loop {
                    let b = reader.read_u8()?;
                    if b == *stop {
                        break;
                    }
                    buf.push(b);
                }
                Ok(buf)
            }
            _ => Err(Error::UnsupportedEncoding(
                "integer encoding used for a byte array".to_string(),
            )),
        }
    }

    /// Read exactly `n` bytes.
    pub fn decode_n_bytes(&self, streams: &mut DecodeStreams<'_>, n: usize) -> Result<Vec<u8>> {
        match self {
            Self::External { content_id } => Ok(streams.external(*content_id)?.read_bytes(n)?.to_vec()),
            _ => (0..n).map(|_| self.decode_byte(streams)).collect(),
        }
    }
}

/// A bit-width parameter, at most 32.
fn bit_count(n: i32, name: &str) -> Result<u32> {
    u32::try_from(n)
        .ok()
        .filter(|&n| n <= 32)
        .ok_or_else(|| Error::Decode(format!("invalid {}: {}", name, n)))
}

/// Values decode as 32-bit words; anything wider is corrupt.
fn with_offset(value: u64, offset: i32) -> Result<i32> {
    let value = u32::try_from(value)
        .map_err(|_| Error::Decode(format!("decoded value {} does not fit in 32 bits", value)))?;
    Ok((value as i32).wrapping_sub(offset))
}
