//! Copy codec: stored data, bounded to its declared size.

use std::io::{self, Read};

/// A reader that passes through exactly `size` bytes unchanged.
pub struct CopyReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> CopyReader<R> {
    /// Wraps `inner`, limiting output to `size` bytes.
    pub fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for CopyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = (self.remaining.min(buf.len() as u64)) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}
