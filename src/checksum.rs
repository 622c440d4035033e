//! CRC-32 computation and verification.
//!
//! 7z records CRC-32 (IEEE 802.3 polynomial) checksums for packed streams,
//! decompressed files, and both header blocks. This module wraps
//! `crc32fast` with an incremental hasher and a verifying reader that
//! checks the digest when a stream is exhausted.

use std::io::{self, Read};

/// Incremental CRC-32 calculator.
///
/// ```rust
/// use sevenstream::checksum::Crc32;
///
/// let mut crc = Crc32::new();
/// crc.update(b"hello");
/// crc.update(b"\n");
/// assert_eq!(crc.finalize(), 0x363A3020);
/// ```
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Creates a new calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more data into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Returns the checksum of everything fed so far.
    pub fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Resets the calculator to its initial state.
    pub fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }

    /// Computes the checksum of a slice in one call.
    pub fn compute(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &self.finalize())
            .finish()
    }
}

/// A reader that feeds everything it yields into a running CRC-32 and
/// verifies the digest at end of stream.
///
/// When the inner reader reports EOF the computed checksum is compared to
/// the expected value (if one is known). A mismatch is returned as an error
/// *instead of* the EOF, so a consumer never observes a clean end on
/// corrupted data. After the first EOF the verdict is latched.
pub struct CrcVerifyingReader<R> {
    inner: R,
    crc: Crc32,
    expected: Option<u32>,
    entry_index: usize,
    finished: bool,
}

impl<R: Read> CrcVerifyingReader<R> {
    /// Wraps `inner`, verifying against `expected` on EOF.
    ///
    /// `entry_index` is only used to label the error.
    pub(crate) fn new(inner: R, expected: Option<u32>, entry_index: usize) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            expected,
            entry_index,
            finished: false,
        }
    }
}

impl<R: Read> Read for CrcVerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }

        let n = self.inner.read(buf)?;
        if n > 0 {
            self.crc.update(&buf[..n]);
            return Ok(n);
        }

        self.finished = true;
        if let Some(expected) = self.expected {
            let actual = self.crc.finalize();
            if actual != expected {
                return Err(crate::Error::CrcMismatch {
                    entry_index: self.entry_index,
                    expected,
                    actual,
                }
                .into_io());
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn incremental_matches_one_shot() {
        let mut crc = Crc32::new();
        crc.update(b"Hello, ");
        crc.update(b"World!");
        assert_eq!(crc.finalize(), Crc32::compute(b"Hello, World!"));
    }

    #[test]
    fn reset_restarts() {
        let mut crc = Crc32::new();
        crc.update(b"garbage");
        crc.reset();
        crc.update(b"hello\n");
        assert_eq!(crc.finalize(), 0x363A3020);
    }

    #[test]
    fn verifying_reader_passes_good_data() {
        let data = b"some bytes".to_vec();
        let expected = Crc32::compute(&data);
        let mut reader = CrcVerifyingReader::new(Cursor::new(data.clone()), Some(expected), 0);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn verifying_reader_rejects_bad_data() {
        let data = b"some bytes".to_vec();
        let mut reader = CrcVerifyingReader::new(Cursor::new(data), Some(0xDEADBEEF), 4);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        let err = crate::Error::from_io(err);
        assert!(matches!(err, crate::Error::CrcMismatch { entry_index: 4, .. }));
    }

    #[test]
    fn verifying_reader_error_precedes_eof() {
        // The mismatch must surface on the read that would otherwise
        // return Ok(0), never after a clean EOF.
        let data = b"x".to_vec();
        let mut reader = CrcVerifyingReader::new(Cursor::new(data), Some(0), 0);

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert!(reader.read(&mut buf).is_err());
        // Verdict is latched; further reads report EOF.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn verifying_reader_without_expected_crc() {
        let mut reader = CrcVerifyingReader::new(Cursor::new(vec![1, 2, 3]), None, 0);
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 3);
    }
}
