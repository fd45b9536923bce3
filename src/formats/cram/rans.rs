//! rANS 4x8 entropy decoder (CRAM 3.0 block compression method 4).
//!
//! Stream layout: order byte, compressed size (u32 LE), uncompressed size
//! (u32 LE), frequency table, four interleaved 32-bit states, renormalisation
//! bytes. Frequencies are scaled to 4096.

use super::num::ByteReader;
use crate::{Error, Result};

const TF_SHIFT: u32 = 12;
const TOTAL_FREQ: u32 = 1 << TF_SHIFT;
const RANS_BYTE_L: u32 = 1 << 23;

/// Per-context symbol statistics.
struct FrequencyTable {
    freqs: [u32; 256],
    cumulative: [u32; 256],
    /// Maps a slot in `0..TOTAL_FREQ` to its symbol.
    lookup: Vec<u8>,
}

impl FrequencyTable {
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let mut freqs = [0u32; 256];
        let mut sym = reader.read_u8()?;
        let mut run = 0u8;

        loop {
            let mut f = reader.read_u8()? as u32;
            if f >= 0x80 {
                f = ((f & 0x7f) << 8) | reader.read_u8()? as u32;
            }
            freqs[sym as usize] = f;

            if run > 0 {
                run -= 1;
                sym = sym.wrapping_add(1);
            } else {
                let next = reader.read_u8()?;
                if next == sym.wrapping_add(1) {
                    sym = next;
                    run = reader.read_u8()?;
                } else {
                    sym = next;
                }
            }

            if sym == 0 {
                break;
            }
        }

        Self::from_freqs(freqs)
    }

    fn from_freqs(freqs: [u32; 256]) -> Result<Self> {
        let mut cumulative = [0u32; 256];
        let mut lookup = vec![0u8; TOTAL_FREQ as usize];
        let mut total = 0u32;

        for (sym, &f) in freqs.iter().enumerate() {
            cumulative[sym] = total;
            let end = total + f;
            if end > TOTAL_FREQ {
                return Err(Error::CorruptBlock(
                    "rANS frequencies exceed the table size".to_string(),
                ));
            }
            lookup[total as usize..end as usize].fill(sym as u8);
            total = end;
        }

        Ok(Self {
            freqs,
            cumulative,
            lookup,
        })
    }

    /// Decode one symbol and advance `state`.
    fn decode(&self, state: &mut u32, reader: &mut ByteReader<'_>) -> Result<u8> {
        let slot = *state & (TOTAL_FREQ - 1);
        let sym = self.lookup[slot as usize];
        let f = self.freqs[sym as usize];
        if f == 0 {
            return Err(Error::CorruptBlock(
                "rANS state points at a zero-frequency symbol".to_string(),
            ));
        }
        *state = f * (*state >> TF_SHIFT) + slot - self.cumulative[sym as usize];
        renormalize(state, reader)?;
        Ok(sym)
    }
}

fn renormalize(state: &mut u32, reader: &mut ByteReader<'_>) -> Result<()> {
    while *state < RANS_BYTE_L {
        if reader.is_empty() {
            return Err(Error::CorruptBlock(
                "rANS stream ended during renormalisation".to_string(),
            ));
        }
        *state = (*state << 8) | reader.read_u8()? as u32;
    }
    Ok(())
}

fn read_states(reader: &mut ByteReader<'_>) -> Result<[u32; 4]> {
    let mut states = [0u32; 4];
    for state in states.iter_mut() {
        *state = reader.read_u32_le()?;
        if *state < RANS_BYTE_L {
            return Err(Error::CorruptBlock(format!(
                "rANS initial state {:#x} is below the renormalisation bound",
                state
            )));
        }
    }
    Ok(states)
}

/// Decode a rANS 4x8 stream whose output must be `expected_len` bytes.
pub fn decode(src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(src);
    let order = reader.read_u8()?;
    let compressed_len = reader.read_u32_le()? as usize;
    let len = reader.read_u32_le()? as usize;

    if compressed_len > reader.remaining() {
        return Err(Error::Truncated("rANS stream"));
    }
    if len != expected_len {
        return Err(Error::CorruptBlock(format!(
            "rANS stream declares {} bytes but the block declares {}",
            len, expected_len
        )));
    }
    let mut reader = ByteReader::new(reader.read_bytes(compressed_len)?);

    if len == 0 {
        return Ok(Vec::new());
    }

    match order {
        0 => decode_order_0(&mut reader, len),
        1 => decode_order_1(&mut reader, len),
        _ => Err(Error::CorruptBlock(format!("invalid rANS order: {}", order))),
    }
}

fn decode_order_0(reader: &mut ByteReader<'_>, len: usize) -> Result<Vec<u8>> {
    let table = FrequencyTable::read(reader)?;
    let mut states = read_states(reader)?;
    let mut dst = Vec::with_capacity(len);

    for i in 0..len {
        let sym = table.decode(&mut states[i % 4], reader)?;
        dst.push(sym);
    }

    Ok(dst)
}

fn decode_order_1(reader: &mut ByteReader<'_>, len: usize) -> Result<Vec<u8>> {
    let mut tables: Vec<Option<FrequencyTable>> = (0..256).map(|_| None).collect();

    let mut ctx = reader.read_u8()?;
    let mut run = 0u8;
    loop {
        tables[ctx as usize] = Some(FrequencyTable::read(reader)?);

        if run > 0 {
            run -= 1;
            ctx = ctx.wrapping_add(1);
        } else {
            let next = reader.read_u8()?;
            if next == ctx.wrapping_add(1) {
                ctx = next;
                run = reader.read_u8()?;
            } else {
                ctx = next;
            }
        }

        if ctx == 0 {
            break;
        }
    }

    let mut states = read_states(reader)?;
    let quarter = len / 4;
    let mut dst = vec![0u8; len];
    let mut contexts = [0u8; 4];

    for i in 0..quarter {
        for j in 0..4 {
            let table = tables[contexts[j] as usize].as_ref().ok_or_else(|| {
                Error::CorruptBlock(format!("missing rANS context {}", contexts[j]))
            })?;
            let sym = table.decode(&mut states[j], reader)?;
            dst[i + j * quarter] = sym;
            contexts[j] = sym;
        }
    }

    // The last state decodes the remainder.
    for slot in dst.iter_mut().skip(4 * quarter) {
        let table = tables[contexts[3] as usize].as_ref().ok_or_else(|| {
            Error::CorruptBlock(format!("missing rANS context {}", contexts[3]))
        })?;
        let sym = table.decode(&mut states[3], reader)?;
        *slot = sym;
        contexts[3] = sym;
    }

    Ok(dst)
}
