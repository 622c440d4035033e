//! Random-access byte sources for archive data.
//!
//! 7z keeps its metadata block at the end of the file, so parsing requires
//! random access. [`ArchiveSource`] abstracts over the two supported
//! backings:
//!
//! - *Buffer-backed*: an immutable in-memory byte buffer.
//! - *File-backed*: an open file read positionally under a lock.
//!
//! A source is a cheap, cloneable handle; [`ArchiveSource::range_reader`]
//! turns a byte range into an owned [`Read`] that pulls at most
//! [`CHUNK_SIZE`] bytes per underlying read, which is what decoder
//! pipelines consume. The source itself never caches.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Error, Result};

/// Chunk size for range readers (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Default number of bytes a staged stream may hold in memory before
/// spilling to a temporary file (100 MiB).
pub const DEFAULT_MEMORY_THRESHOLD: u64 = 100 * 1024 * 1024;

enum Backing {
    Buffer(Arc<[u8]>),
    File { file: Mutex<File>, len: u64 },
}

/// Acquires the file lock, recovering from a poisoned mutex.
///
/// The guarded state is only a seek cursor, which the next positional read
/// re-establishes unconditionally.
fn lock_file(mutex: &Mutex<File>) -> MutexGuard<'_, File> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("archive source lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// A shared random-access handle to the raw archive bytes.
#[derive(Clone)]
pub struct ArchiveSource {
    backing: Arc<Backing>,
}

impl std::fmt::Debug for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match *self.backing {
            Backing::Buffer(_) => "buffer",
            Backing::File { .. } => "file",
        };
        f.debug_struct("ArchiveSource")
            .field("backing", &kind)
            .field("len", &self.len())
            .finish()
    }
}

impl ArchiveSource {
    /// Opens a file-backed source.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file)
    }

    /// Wraps an already-open file.
    pub fn from_file(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            backing: Arc::new(Backing::File {
                file: Mutex::new(file),
                len,
            }),
        })
    }

    /// Wraps an in-memory buffer.
    pub fn from_buffer(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            backing: Arc::new(Backing::Buffer(data.into())),
        }
    }

    /// Stages an arbitrary byte stream so it becomes seekable.
    ///
    /// Up to `memory_threshold` bytes are held in memory; anything larger
    /// spills into an unnamed temporary file that the operating system
    /// reclaims when the source (and every reader cloned from it) is
    /// dropped.
    pub fn stage_stream(mut input: impl Read, memory_threshold: u64) -> Result<Self> {
        let mut staged = Vec::new();
        let mut buf = [0u8; CHUNK_SIZE];

        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                return Ok(Self::from_buffer(staged));
            }
            if staged.len() as u64 + n as u64 > memory_threshold {
                // Spill what we have plus the rest of the stream to disk.
                let mut file = tempfile::tempfile()?;
                file.write_all(&staged)?;
                file.write_all(&buf[..n])?;
                io::copy(&mut input, &mut file)?;
                file.flush()?;
                return Self::from_file(file);
            }
            staged.extend_from_slice(&buf[..n]);
        }
    }

    /// Returns the total number of bytes in the source.
    pub fn len(&self) -> u64 {
        match *self.backing {
            Backing::Buffer(ref data) => data.len() as u64,
            Backing::File { len, .. } => len,
        }
    }

    /// Returns `true` if the source is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `buf.len()` bytes at the given position.
    ///
    /// Returns the number of bytes read; zero means `pos` is at or past
    /// the end.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        match *self.backing {
            Backing::Buffer(ref data) => {
                if pos >= data.len() as u64 {
                    return Ok(0);
                }
                let start = pos as usize;
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
            Backing::File { ref file, len } => {
                if pos >= len {
                    return Ok(0);
                }
                let mut file = lock_file(file);
                file.seek(SeekFrom::Start(pos))?;
                file.read(buf)
            }
        }
    }

    /// Reads exactly `buf.len()` bytes at the given position.
    ///
    /// Fails with [`Error::TruncatedArchive`] when the source ends first.
    pub fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(pos + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(Error::TruncatedArchive(format!(
                    "needed {} bytes at offset {:#x}, source ends at {:#x}",
                    buf.len(),
                    pos,
                    self.len()
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Returns a reader over `[offset, offset + len)`.
    ///
    /// The reader delivers the range in chunks of at most [`CHUNK_SIZE`]
    /// bytes and reports EOF at the end of the range. The range is not
    /// bounds-checked up front; running past the end of the source
    /// surfaces as `UnexpectedEof` from the reader.
    pub fn range_reader(&self, offset: u64, len: u64) -> RangeReader {
        RangeReader {
            source: self.clone(),
            pos: offset,
            end: offset.saturating_add(len),
        }
    }
}

/// An owned sequential reader over a byte range of an [`ArchiveSource`].
pub struct RangeReader {
    source: ArchiveSource,
    pos: u64,
    end: u64,
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        let remaining = (self.end - self.pos) as usize;
        let want = buf.len().min(remaining).min(CHUNK_SIZE);
        let n = self.source.read_at(self.pos, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive data range extends past end of source",
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}
