//! LZMA and LZMA2 decoders, backed by `lzma-rust2`.

use std::io::{self, Read};

use crate::{Error, Result};

/// LZMA decoder.
///
/// LZMA coder properties are five bytes: a packed `pb * 45 + lp * 9 + lc`
/// byte followed by a 32-bit little-endian dictionary size. The decoder
/// needs the unpack size because a raw LZMA stream carries no reliable end
/// marker of its own.
pub struct LzmaReader<R> {
    inner: lzma_rust2::LzmaReader<R>,
}

impl<R> std::fmt::Debug for LzmaReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaReader").finish_non_exhaustive()
    }
}

impl<R: Read> LzmaReader<R> {
    /// Creates a decoder from the coder properties blob.
    pub fn new(input: R, properties: &[u8], unpack_size: u64) -> Result<Self> {
        if properties.len() < 5 {
            return Err(Error::DecompressionFailed(
                "LZMA properties shorter than 5 bytes".into(),
            ));
        }

        let packed = properties[0];
        // packed = pb * 45 + lp * 9 + lc with lc <= 8, lp <= 4, pb <= 4
        let pb = packed / 45;
        let lp = (packed % 45) / 9;
        let lc = packed % 9;
        if pb > 4 || lp > 4 || lc > 8 {
            return Err(Error::DecompressionFailed(format!(
                "invalid LZMA properties byte {packed:#04x} (lc={lc} lp={lp} pb={pb})"
            )));
        }

        let dict_size = u32::from_le_bytes(properties[1..5].try_into().unwrap());
        let inner = lzma_rust2::LzmaReader::new_with_props(input, unpack_size, packed, dict_size, None)
            .map_err(|e| Error::DecompressionFailed(format!("LZMA init: {e}")))?;

        Ok(Self { inner })
    }
}

impl<R: Read> Read for LzmaReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// LZMA2 decoder.
///
/// LZMA2 frames LZMA in self-describing chunks, so only the dictionary
/// size (one property byte) is needed up front.
pub struct Lzma2Reader<R> {
    inner: lzma_rust2::Lzma2Reader<R>,
}

impl<R> std::fmt::Debug for Lzma2Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lzma2Reader").finish_non_exhaustive()
    }
}

impl<R: Read> Lzma2Reader<R> {
    /// Creates a decoder from the coder properties blob.
    pub fn new(input: R, properties: &[u8]) -> Result<Self> {
        let prop = *properties.first().ok_or_else(|| {
            Error::DecompressionFailed("LZMA2 properties missing".into())
        })?;
        let dict_size = decode_dict_size(prop)?;
        Ok(Self {
            inner: lzma_rust2::Lzma2Reader::new(input, dict_size, None),
        })
    }
}

impl<R: Read> Read for Lzma2Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Decodes the LZMA2 dictionary-size property byte.
///
/// Value 40 means `2^32 - 1`; otherwise `(2 | (b & 1)) << (b / 2 + 11)`.
/// The result is a sizing hint for the decoder's window, not an eager
/// allocation.
pub(crate) fn decode_dict_size(prop: u8) -> Result<u32> {
    match prop {
        40 => Ok(u32::MAX),
        0..40 => Ok((2 | (prop as u32 & 1)) << (prop / 2 + 11)),
        _ => Err(Error::DecompressionFailed(format!(
            "invalid LZMA2 dictionary-size property {prop}"
        ))),
    }
}
