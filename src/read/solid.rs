//! Splitting one solid-folder stream into per-file sub-streams.
//!
//! A solid folder decompresses to a single byte stream holding several
//! files back to back. [`FolderSplitter`] owns the folder's decoder and
//! carves that stream at the known file boundaries, keeping a running
//! CRC-32 per file. Sub-readers pull through the shared splitter, so
//! demand from the consumer is the only thing that drives the
//! decompressor forward.
//!
//! Files can only be read in folder order. Requesting an earlier file
//! after a later one has started fails with
//! [`OutOfOrder`](crate::Error::OutOfOrder); the caller can always open a
//! fresh splitter to start over.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::checksum::Crc32;
use crate::{Error, Result};

pub(crate) struct FolderSplitter {
    decoder: Box<dyn Read + Send>,
    folder_index: usize,
    /// Per-file sizes within the folder.
    sizes: Vec<u64>,
    /// Per-file expected digests.
    crcs: Vec<Option<u32>>,
    /// Per-file global entry indices, for error labelling.
    entry_indices: Vec<usize>,
    /// File currently being produced.
    current: usize,
    /// Bytes of the current file already produced.
    consumed: u64,
    crc: Crc32,
    /// Whether the current file's end-of-file check already ran.
    verified: bool,
    /// Sticky failure: once the folder stream is bad, every remaining
    /// sub-stream reports it.
    failed: bool,
}

impl FolderSplitter {
    pub(crate) fn new(
        decoder: Box<dyn Read + Send>,
        folder_index: usize,
        sizes: Vec<u64>,
        crcs: Vec<Option<u32>>,
        entry_indices: Vec<usize>,
    ) -> Self {
        Self {
            decoder,
            folder_index,
            sizes,
            crcs,
            entry_indices,
            current: 0,
            consumed: 0,
            crc: Crc32::new(),
            verified: false,
            failed: false,
        }
    }

    /// Index of the file the splitter is positioned on.
    pub(crate) fn current_file(&self) -> usize {
        self.current
    }

    /// Bytes of the current file already routed to a consumer.
    pub(crate) fn bytes_into_current(&self) -> u64 {
        self.consumed
    }

    fn entry_index(&self, file: usize) -> usize {
        self.entry_indices.get(file).copied().unwrap_or(file)
    }

    /// Runs the end-of-file CRC comparison for the current file once.
    fn verify_current(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;

        if let Some(expected) = self.crcs.get(self.current).copied().flatten() {
            let actual = self.crc.finalize();
            if actual != expected {
                self.failed = true;
                return Err(Error::CrcMismatch {
                    entry_index: self.entry_index(self.current),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Moves past the current (fully produced or drained) file.
    fn advance(&mut self) {
        self.current += 1;
        self.consumed = 0;
        self.crc.reset();
        self.verified = false;
    }

    /// Reads some bytes of file `file`, driving the underlying decoder
    /// and draining any earlier files still pending.
    ///
    /// Returns `Ok(0)` only after the file is complete and its CRC (when
    /// known) has verified; mismatches surface before EOF.
    pub(crate) fn read_file(&mut self, file: usize, buf: &mut [u8]) -> Result<usize> {
        if self.failed {
            return Err(Error::DecompressionFailed(format!(
                "folder {} stream already failed",
                self.folder_index
            )));
        }
        if file >= self.sizes.len() {
            return Err(Error::corrupt_header(0, "file index beyond folder layout"));
        }
        if file < self.current {
            return Err(Error::OutOfOrder {
                folder_index: self.folder_index,
                requested: file,
                current: self.current,
            });
        }

        // Drain files between the cursor and the requested one; their
        // digests are still verified on the way past.
        while self.current < file {
            let mut scratch = [0u8; crate::READ_BUFFER_SIZE];
            let remaining = self.sizes[self.current] - self.consumed;
            if remaining == 0 {
                self.verify_current()?;
                self.advance();
                continue;
            }
            let want = remaining.min(scratch.len() as u64) as usize;
            let n = self.decoder.read(&mut scratch[..want]).map_err(|e| {
                self.failed = true;
                Error::from_io(e)
            })?;
            if n == 0 {
                self.failed = true;
                return Err(Error::DecompressionFailed(format!(
                    "folder {} stream ended inside file {}",
                    self.folder_index, self.current
                )));
            }
            self.crc.update(&scratch[..n]);
            self.consumed += n as u64;
        }

        let size = self.sizes[file];
        if self.consumed >= size {
            self.verify_current()?;
            return Ok(0);
        }

        let want = (size - self.consumed).min(buf.len() as u64) as usize;
        let n = self.decoder.read(&mut buf[..want]).map_err(|e| {
            self.failed = true;
            Error::from_io(e)
        })?;

        if n == 0 {
            // The folder stream ended short. With a known digest this is
            // a certain mismatch and must surface before EOF; without one
            // the file simply ends short.
            if let Some(expected) = self.crcs.get(file).copied().flatten() {
                self.failed = true;
                return Err(Error::CrcMismatch {
                    entry_index: self.entry_index(file),
                    expected,
                    actual: self.crc.finalize(),
                });
            }
            self.verified = true;
            return Ok(0);
        }

        self.crc.update(&buf[..n]);
        self.consumed += n as u64;
        Ok(n)
    }
}

/// A readable sub-stream for one file of a solid folder.
///
/// Cheap to clone the handle it holds; reads are serialised through the
/// shared splitter.
pub struct SolidEntryReader {
    splitter: Arc<Mutex<FolderSplitter>>,
    file: usize,
}

impl SolidEntryReader {
    pub(crate) fn new(splitter: Arc<Mutex<FolderSplitter>>, file: usize) -> Self {
        Self { splitter, file }
    }
}

fn lock_splitter(mutex: &Mutex<FolderSplitter>) -> MutexGuard<'_, FolderSplitter> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("solid folder splitter lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl Read for SolidEntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        lock_splitter(&self.splitter)
            .read_file(self.file, buf)
            .map_err(Error::into_io)
    }
}
