//! Primitive reader and writer for the SCALE binary format: little-endian
//! fixed-width integers, compact integers and length-prefixed sequences.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes at offset {offset}, {remaining} left")]
    Eof {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("invalid compact integer prefix {0:#04x}")]
    BadCompact(u8),

    #[error("compact integer does not fit in 128 bits")]
    CompactOverflow,

    #[error("invalid {what} tag {tag}")]
    BadTag { what: &'static str, tag: u8 },

    #[error("invalid UTF-8 in string")]
    Utf8,

    #[error("length {0} exceeds the remaining input")]
    Length(u128),
}

/// Cursor over an immutable byte slice.
pub struct ScaleReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ScaleReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Eof {
                offset: self.offset,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        self.array().map(u64::from_le_bytes)
    }

    pub fn u128(&mut self) -> Result<u128, CodecError> {
        self.array().map(u128::from_le_bytes)
    }

    /// Unsigned integer of `width` bytes (1, 2, 4, 8 or 16).
    pub fn uint(&mut self, width: usize) -> Result<u128, CodecError> {
        let bytes = self.take(width)?;
        let mut buf = [0u8; 16];
        buf[..width].copy_from_slice(bytes);
        Ok(u128::from_le_bytes(buf))
    }

    /// Signed integer of `width` bytes, sign-extended.
    pub fn int(&mut self, width: usize) -> Result<i128, CodecError> {
        let raw = self.uint(width)?;
        let bits = width as u32 * 8;
        if bits == 128 {
            return Ok(raw as i128);
        }
        let shift = 128 - bits;
        Ok(((raw << shift) as i128) >> shift)
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::BadTag { what: "bool", tag }),
        }
    }

    /// Compact (variable-length) unsigned integer.
    pub fn compact(&mut self) -> Result<u128, CodecError> {
        let first = self.u8()?;
        match first & 0b11 {
            0b00 => Ok(u128::from(first >> 2)),
            0b01 => {
                let second = self.u8()?;
                Ok(u128::from(u16::from_le_bytes([first, second]) >> 2))
            }
            0b10 => {
                let rest: [u8; 3] = self.array()?;
                Ok(u128::from(
                    u32::from_le_bytes([first, rest[0], rest[1], rest[2]]) >> 2,
                ))
            }
            _ => {
                let len = usize::from(first >> 2) + 4;
                if len > 16 {
                    return Err(CodecError::CompactOverflow);
                }
                self.uint(len)
            }
        }
    }

    /// Compact length prefix, checked against what is left of the input so a
    /// corrupt length cannot trigger a huge allocation.
    pub fn length(&mut self) -> Result<usize, CodecError> {
        let len = self.compact()?;
        if len > self.remaining() as u128 {
            return Err(CodecError::Length(len));
        }
        Ok(len as usize)
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.length()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        String::from_utf8(self.bytes()?).map_err(|_| CodecError::Utf8)
    }

    pub fn option<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, CodecError>,
    ) -> Result<Option<T>, CodecError> {
        match self.u8()? {
            0 => Ok(None),
            1 => read(self).map(Some),
            tag => Err(CodecError::BadTag {
                what: "option",
                tag,
            }),
        }
    }

    pub fn vec<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, CodecError>,
    ) -> Result<Vec<T>, CodecError> {
        let len = self.length()?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(read(self)?);
        }
        Ok(out)
    }

    pub fn strings(&mut self) -> Result<Vec<String>, CodecError> {
        self.vec(Self::string)
    }
}

impl fmt::Debug for ScaleReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaleReader")
            .field("offset", &self.offset)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Append-only encoder, the mirror of [`ScaleReader`].
#[derive(Debug, Default, Clone)]
pub struct ScaleWriter {
    buf: Vec<u8>,
}

impl ScaleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    pub fn compact(&mut self, v: u128) -> &mut Self {
        if v < 1 << 6 {
            self.u8((v as u8) << 2)
        } else if v < 1 << 14 {
            self.u16(((v as u16) << 2) | 0b01)
        } else if v < 1 << 30 {
            self.u32(((v as u32) << 2) | 0b10)
        } else {
            let bytes = v.to_le_bytes();
            let len = 16 - bytes.iter().rev().take_while(|b| **b == 0).count();
            self.u8((((len - 4) as u8) << 2) | 0b11);
            self.raw(&bytes[..len])
        }
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.compact(v.len() as u128);
        self.raw(v)
    }

    pub fn string(&mut self, v: &str) -> &mut Self {
        self.bytes(v.as_bytes())
    }

    pub fn strings(&mut self, items: &[&str]) -> &mut Self {
        self.compact(items.len() as u128);
        for item in items {
            self.string(item);
        }
        self
    }
}
