//! Little-endian integers and CRAM's ITF8/LTF8 variable-length integers.

use crate::{Error, Result};

/// Upper bound on buffers reserved up front from a size or count declared in
/// the archive. Larger buffers grow as data actually arrives.
pub const MAX_PREALLOCATION: usize = 1 << 20;

/// Cursor over a byte buffer.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> &'a [u8] {
        &self.data[..self.pos]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or(Error::Truncated("byte"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::Truncated("byte array"));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_itf8(&mut self) -> Result<i32> {
        let b0 = self.read_u8()? as u32;

        let value = if b0 & 0x80 == 0 {
            b0
        } else if b0 & 0x40 == 0 {
            ((b0 & 0x7f) << 8) | self.read_u8()? as u32
        } else if b0 & 0x20 == 0 {
            let [b1, b2] = self.read_array()?;
            ((b0 & 0x3f) << 16) | (b1 as u32) << 8 | b2 as u32
        } else if b0 & 0x10 == 0 {
            let [b1, b2, b3] = self.read_array()?;
            ((b0 & 0x1f) << 24) | (b1 as u32) << 16 | (b2 as u32) << 8 | b3 as u32
        } else {
            let [b1, b2, b3, b4] = self.read_array()?;
            ((b0 & 0x0f) << 28)
                | (b1 as u32) << 20
                | (b2 as u32) << 12
                | (b3 as u32) << 4
                | (b4 as u32 & 0x0f)
        };

        Ok(value as i32)
    }

    pub fn read_ltf8(&mut self) -> Result<i64> {
        let b0 = self.read_u8()?;
        let extra = b0.leading_ones() as usize;
        let mut value: u64 = if extra >= 7 {
            0
        } else {
            (b0 & (0x7f >> extra)) as u64
        };
        for &b in self.read_bytes(extra)? {
            value = (value << 8) | b as u64;
        }
        Ok(value as i64)
    }

    /// ITF8 length followed by that many ITF8 values.
    pub fn read_itf8_array(&mut self) -> Result<Vec<i32>> {
        let len = self.read_len()?;
        (0..len).map(|_| self.read_itf8()).collect()
    }

    /// ITF8 length followed by that many bytes.
    pub fn read_byte_array(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    /// A non-negative ITF8 used as a length or count.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_itf8()?;
        usize::try_from(len).map_err(|_| Error::Decode(format!("negative length: {}", len)))
    }
}
