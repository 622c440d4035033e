//! BZip2 decoder, backed by the `bzip2` crate.

use std::io::{self, Read};

use bzip2::read::BzDecoder;

/// BZip2 decoder.
///
/// BZip2 is block-based and self-terminating; no coder properties are
/// used.
pub struct Bzip2Reader<R> {
    inner: BzDecoder<R>,
}

impl<R> std::fmt::Debug for Bzip2Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bzip2Reader").finish_non_exhaustive()
    }
}

impl<R: Read> Bzip2Reader<R> {
    /// Wraps a BZip2 stream.
    pub fn new(input: R) -> Self {
        Self {
            inner: BzDecoder::new(input),
        }
    }
}

impl<R: Read> Read for Bzip2Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::Compression;
    use bzip2::write::BzEncoder;
    use std::io::{Cursor, Write};

    #[test]
    fn round_trip() {
        let plain = b"Test file with BZip2 compression".to_vec();

        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut reader = Bzip2Reader::new(Cursor::new(compressed));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn bad_magic_is_an_error() {
        let mut reader = Bzip2Reader::new(Cursor::new(b"ZB nonsense".to_vec()));
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}
