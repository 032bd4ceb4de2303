// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-width little-endian integer codecs used by the node layout (§4.B / §4.C).
//!
//! Unlike a length-prefixed wire format, node fields sit at offsets computed
//! from fixed-size strides, so random access into any child does not require
//! scanning preceding children. Varint encoding is intentionally not used here.

use std::io::{Read, Write};

/// Error during serialization.
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EncodeError({})",
            match self {
                Self::Io(e) => e.to_string(),
            }
        )
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
        }
    }
}

/// Error during deserialization.
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error.
    Io(std::io::Error),

    /// Not enough bytes remained to decode a fixed-width field.
    Truncated,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodeError({self:?})")
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {}

/// Writes a `u16` in little-endian byte order.
pub fn write_u16<W: Write>(writer: &mut W, value: u16) -> Result<(), EncodeError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Writes a `u32` in little-endian byte order.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<(), EncodeError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Writes a `u64` in little-endian byte order.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<(), EncodeError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Writes raw bytes with no length prefix; the caller records the length elsewhere.
pub fn write_raw<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), EncodeError> {
    writer.write_all(bytes)?;
    Ok(())
}

/// Reads a `u16` from a reader, little-endian.
pub fn read_u16<R: Read>(reader: &mut R) -> Result<u16, DecodeError> {
    let mut buf = [0; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Reads a `u32` from a reader, little-endian.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, DecodeError> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads a `u64` from a reader, little-endian.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64, DecodeError> {
    let mut buf = [0; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Decodes a `u16` directly out of a byte slice at `offset`.
///
/// Returns the decoded value; the number of bytes consumed is always 2.
/// Out-of-bounds access is a programming error (the file is corrupt or the
/// caller mis-navigated the tree) and panics, matching §4.A's contract that
/// out-of-bounds storage access is fatal.
#[must_use]
pub fn decode_u16(buf: &[u8], offset: usize) -> u16 {
    let bytes: [u8; 2] = buf
        .get(offset..offset + 2)
        .expect("out-of-bounds node read")
        .try_into()
        .expect("slice has exactly 2 bytes");
    u16::from_le_bytes(bytes)
}

/// Decodes a `u32` directly out of a byte slice at `offset`.
#[must_use]
pub fn decode_u32(buf: &[u8], offset: usize) -> u32 {
    let bytes: [u8; 4] = buf
        .get(offset..offset + 4)
        .expect("out-of-bounds node read")
        .try_into()
        .expect("slice has exactly 4 bytes");
    u32::from_le_bytes(bytes)
}

/// Decodes a `u64` directly out of a byte slice at `offset`.
#[must_use]
pub fn decode_u64(buf: &[u8], offset: usize) -> u64 {
    let bytes: [u8; 8] = buf
        .get(offset..offset + 8)
        .expect("out-of-bounds node read")
        .try_into()
        .expect("slice has exactly 8 bytes");
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip_u16() {
        let mut buf = vec![];
        write_u16(&mut buf, 0xABCD).expect("encode");
        assert_eq!(0xABCD, decode_u16(&buf, 0));
        assert_eq!(0xABCD, read_u16(&mut &buf[..]).expect("decode"));
    }

    #[test]
    fn roundtrip_u64() {
        let mut buf = vec![];
        write_u64(&mut buf, 0x0102_0304_0506_0708).expect("encode");
        assert_eq!(0x0102_0304_0506_0708, decode_u64(&buf, 0));
    }

    #[test]
    fn raw_bytes_no_prefix() {
        let mut buf = vec![];
        write_raw(&mut buf, b"hello").expect("encode");
        assert_eq!(b"hello", &buf[..]);
    }
}
