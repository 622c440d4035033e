//! Deflate decoder, backed by `flate2`.
//!
//! 7z stores raw deflate streams with no zlib or gzip wrapper.

use std::io::{self, BufReader, Read};

use flate2::bufread::DeflateDecoder as FlateDecoder;

/// Raw-deflate decoder.
pub struct DeflateReader<R> {
    inner: FlateDecoder<BufReader<R>>,
}

impl<R> std::fmt::Debug for DeflateReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateReader").finish_non_exhaustive()
    }
}

impl<R: Read> DeflateReader<R> {
    /// Wraps a raw deflate stream.
    pub fn new(input: R) -> Self {
        Self {
            inner: FlateDecoder::new(BufReader::new(input)),
        }
    }
}

impl<R: Read> Read for DeflateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::{Cursor, Write};

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn round_trip() {
        let plain = b"Deflate round trip through the raw stream, no wrapper.".repeat(20);
        let compressed = deflate(&plain);

        let mut reader = DeflateReader::new(Cursor::new(compressed));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn empty_stream() {
        let compressed = deflate(b"");
        let mut reader = DeflateReader::new(Cursor::new(compressed));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        let mut reader = DeflateReader::new(Cursor::new(vec![0xFFu8; 32]));
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}
