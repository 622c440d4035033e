//! The 7z number codec: variable-length integers and bit vectors.
//!
//! 7z encodes most counts and sizes as variable-length unsigned integers.
//! The first byte's high bits say how many extra bytes follow:
//!
//! - `0xxxxxxx`: no extra bytes, value 0..=127
//! - `10xxxxxx` + 1 byte, `110xxxxx` + 2 bytes, ... up to
//! - `0xFF` + 8 bytes: a full little-endian u64
//!
//! The extra bytes form the low bits of the value (little-endian); the
//! remaining low bits of the first byte supply the high bits.
//!
//! Boolean vectors are stored MSB-first; optional-property vectors are
//! prefixed with an "all defined" sentinel byte that, when non-zero,
//! replaces the bitmask entirely.

use std::io::{self, Read};

use crate::{Error, Result};

/// Maps an I/O failure during metadata parsing to the crate error,
/// treating end-of-input as archive truncation.
fn map_eof(e: io::Error, what: &str) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::TruncatedArchive(format!("input ended inside {what}"))
    } else {
        Error::Io(e)
    }
}

/// Reads a single byte.
pub fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(|e| map_eof(e, "a byte"))?;
    Ok(buf[0])
}

/// Reads a 32-bit little-endian integer.
pub fn read_u32_le<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| map_eof(e, "a u32"))?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads a 64-bit little-endian integer.
pub fn read_u64_le<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| map_eof(e, "a u64"))?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads a 7z variable-length unsigned integer.
pub fn read_number<R: Read>(r: &mut R) -> Result<u64> {
    let first = read_u8(r)? as u64;

    let mut mask = 0x80u64;
    let mut value = 0u64;

    for i in 0..8 {
        if first & mask == 0 {
            // Remaining low bits of the first byte are the high bits.
            return Ok(value | ((first & (mask - 1)) << (8 * i)));
        }
        let byte = read_u8(r)? as u64;
        value |= byte << (8 * i);
        mask >>= 1;
    }

    // 0xFF prefix: the value is the following 8 bytes verbatim.
    Ok(value)
}

/// Reads `count` successive variable-length integers.
pub fn read_number_array<R: Read>(r: &mut R, count: usize) -> Result<Vec<u64>> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_number(r)?);
    }
    Ok(values)
}

/// Reads a variable-length integer that must fit in `usize`.
pub fn read_count<R: Read>(r: &mut R, what: &str, max: usize) -> Result<usize> {
    let value = read_number(r)?;
    if value > max as u64 {
        return Err(Error::ResourceLimitExceeded(format!(
            "{what} count {value} exceeds limit {max}"
        )));
    }
    Ok(value as usize)
}

/// Reads a bit vector of `count` flags, MSB-first within each byte.
pub fn read_bit_vector<R: Read>(r: &mut R, count: usize) -> Result<Vec<bool>> {
    let mut bytes = vec![0u8; count.div_ceil(8)];
    r.read_exact(&mut bytes)
        .map_err(|e| map_eof(e, "a bit vector"))?;

    let mut flags = Vec::with_capacity(count);
    for i in 0..count {
        flags.push((bytes[i / 8] >> (7 - i % 8)) & 1 != 0);
    }
    Ok(flags)
}

/// Reads an optional-property defined-vector.
///
/// A non-zero sentinel byte means all `count` flags are set and no bitmask
/// follows; otherwise the bitmask is read as with [`read_bit_vector`].
pub fn read_defined_vector<R: Read>(r: &mut R, count: usize) -> Result<Vec<bool>> {
    if read_u8(r)? != 0 {
        Ok(vec![true; count])
    } else {
        read_bit_vector(r, count)
    }
}

/// Reads exactly `count` bytes into a new vector.
pub fn read_bytes<R: Read>(r: &mut R, count: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    r.read_exact(&mut buf)
        .map_err(|e| map_eof(e, "a byte run"))?;
    Ok(buf)
}
