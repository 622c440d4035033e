//! Routing entries to their content streams.
//!
//! Per entry, one of four shapes:
//!
//! - no stream at all (directories, empty files, anti-files): an empty
//!   reader;
//! - a streamable single-file folder: the folder pipeline itself, CRC
//!   checked on the fly;
//! - a streamable multi-file (solid) folder: a sub-stream of the folder's
//!   shared splitter, created once per folder and reused by the
//!   following entries;
//! - anything else (BCJ2, unknown codecs): the buffered path, slicing the
//!   entry out of the folder's cached decoded output.
//!
//! The router also keeps the per-folder extraction counters that drive
//! cache and splitter retirement.

use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use crate::checksum::CrcVerifyingReader;
use crate::{Error, Result};

use super::Archive;
use super::solid::{FolderSplitter, SolidEntryReader};

/// A readable stream of one entry's decompressed content.
///
/// Bytes arrive in file order; when the archive records a CRC-32 for the
/// entry it is verified at end of stream, and a mismatch is reported as an
/// error before EOF. Dropping the reader at any point is safe.
pub struct EntryReader {
    inner: EntryReaderKind,
}

enum EntryReaderKind {
    Empty,
    Streamed(CrcVerifyingReader<Box<dyn Read + Send>>),
    /// CRC runs inside the shared splitter.
    Solid(SolidEntryReader),
    Buffered(CrcVerifyingReader<SliceReader>),
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            EntryReaderKind::Empty => Ok(0),
            EntryReaderKind::Streamed(r) => r.read(buf),
            EntryReaderKind::Solid(r) => r.read(buf),
            EntryReaderKind::Buffered(r) => r.read(buf),
        }
    }
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            EntryReaderKind::Empty => "empty",
            EntryReaderKind::Streamed(_) => "streamed",
            EntryReaderKind::Solid(_) => "solid",
            EntryReaderKind::Buffered(_) => "buffered",
        };
        f.debug_struct("EntryReader").field("kind", &kind).finish()
    }
}

/// A reader over a range of a shared decoded folder buffer.
struct SliceReader {
    data: Arc<[u8]>,
    pos: usize,
    end: usize,
}

impl Read for SliceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        let n = (self.end - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Archive {
    /// Opens a reader over the entry's decompressed content.
    ///
    /// Directories, empty files and anti-files yield an empty reader.
    /// Files inside the same solid folder must be opened in archive
    /// order while the folder is being streamed; requesting an earlier
    /// entry afterwards starts the folder over from scratch once the
    /// folder has been fully handed out, or fails with
    /// [`Error::OutOfOrder`] while it is still active.
    pub fn entry_reader(&mut self, index: usize) -> Result<EntryReader> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| Error::CorruptArchive(format!("entry {index} out of range")))?
            .clone();

        if !entry.has_stream {
            return Ok(EntryReader {
                inner: EntryReaderKind::Empty,
            });
        }

        let folder_index = entry
            .folder_index
            .ok_or_else(|| Error::CorruptArchive("stream entry without a folder".into()))?;
        let stream_index = entry.stream_index.unwrap_or(0);
        let files_in_folder = self.model.files_in_folder(folder_index);

        let inner = if entry.streamable && files_in_folder == 1 {
            let decoder = self.stream_folder(folder_index)?;
            EntryReaderKind::Streamed(CrcVerifyingReader::new(decoder, entry.crc32, index))
        } else if entry.streamable {
            let splitter = self.splitter_for_folder(folder_index)?;
            {
                let guard = splitter.lock().unwrap_or_else(|p| p.into_inner());
                let started_current =
                    stream_index == guard.current_file() && guard.bytes_into_current() > 0;
                if stream_index < guard.current_file() || started_current {
                    return Err(Error::OutOfOrder {
                        folder_index,
                        requested: stream_index,
                        current: guard.current_file(),
                    });
                }
            }
            EntryReaderKind::Solid(SolidEntryReader::new(splitter, stream_index))
        } else {
            let data = self.decode_folder_cached(folder_index)?;
            let (sizes, _) = self.model.folder_file_layout(folder_index)?;
            let offset: u64 = sizes.iter().take(stream_index).sum();
            let end = offset + entry.size;
            if end > data.len() as u64 {
                return Err(Error::CorruptArchive(format!(
                    "entry {index} extends past its folder output"
                )));
            }
            EntryReaderKind::Buffered(CrcVerifyingReader::new(
                SliceReader {
                    data,
                    pos: offset as usize,
                    end: end as usize,
                },
                entry.crc32,
                index,
            ))
        };

        self.note_extraction(folder_index, files_in_folder);
        Ok(EntryReader { inner })
    }

    /// Reads an entry's full content into memory.
    pub fn read_entry_to_vec(&mut self, index: usize) -> Result<Vec<u8>> {
        let size = self.entries.get(index).map(|e| e.size).unwrap_or(0);
        let mut reader = self.entry_reader(index)?;
        let mut data = Vec::with_capacity(size.min(1 << 24) as usize);
        reader.read_to_end(&mut data).map_err(Error::from_io)?;
        Ok(data)
    }

    /// Reads a symlink entry's target path.
    ///
    /// The target is the entry's decompressed content interpreted as
    /// UTF-8.
    pub fn read_symlink_target(&mut self, index: usize) -> Result<String> {
        let is_symlink = self
            .entries
            .get(index)
            .map(|e| e.is_symlink)
            .unwrap_or(false);
        if !is_symlink {
            return Err(Error::CorruptArchive(format!(
                "entry {index} is not a symbolic link"
            )));
        }

        let bytes = self.read_entry_to_vec(index)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::CorruptArchive("symlink target is not UTF-8".into()))
    }

    /// Returns the live splitter for a solid folder, creating it on first
    /// use.
    fn splitter_for_folder(&mut self, folder_index: usize) -> Result<Arc<Mutex<FolderSplitter>>> {
        if let Some(splitter) = self.splitters.get(&folder_index) {
            return Ok(splitter.clone());
        }

        let decoder = self.stream_folder(folder_index)?;
        let (sizes, crcs) = self.model.folder_file_layout(folder_index)?;
        let entry_indices: Vec<usize> = self
            .entries
            .iter()
            .filter(|e| e.folder_index == Some(folder_index))
            .map(|e| e.index)
            .collect();

        let splitter = Arc::new(Mutex::new(FolderSplitter::new(
            decoder,
            folder_index,
            sizes,
            crcs,
            entry_indices,
        )));
        self.splitters.insert(folder_index, splitter.clone());
        Ok(splitter)
    }

    /// Accounts one handed-out reader and retires folder state once the
    /// last file of the folder has been requested.
    fn note_extraction(&mut self, folder_index: usize, files_in_folder: u64) {
        let count = {
            let slot = self.extracted.entry(folder_index).or_insert(0);
            *slot += 1;
            *slot
        };

        if count >= files_in_folder {
            // Live readers keep their own handles; dropping the shared
            // state here only stops future reuse. Resetting the counter
            // lets a later pass over the same folder start a fresh
            // cycle.
            if self.folder_cache.remove(&folder_index).is_some() {
                log::debug!("folder {folder_index}: cache evicted after last reader");
            }
            self.splitters.remove(&folder_index);
            self.extracted.insert(folder_index, 0);
        }
    }
}
