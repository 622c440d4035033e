//! Archive reading API.
//!
//! [`Archive`] parses the metadata once, exposes the entry list, and hands
//! out per-entry readers. Extraction state (the folder cache and active
//! solid-folder splitters) lives on the archive and is retired as entries
//! are consumed.

mod decompression;
pub(crate) mod entries;
mod entry;
mod extraction;
mod info;
mod solid;

pub use entry::Entry;
pub use extraction::EntryReader;
pub use info::ArchiveInfo;

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::crypto::Password;
use crate::format::parser::{self, HeaderModel};
use crate::format::streams::ResourceLimits;
use crate::source::{ArchiveSource, DEFAULT_MEMORY_THRESHOLD};
use crate::{Error, Result};

use solid::FolderSplitter;

/// Options for opening an archive.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    password: Option<Password>,
    memory_threshold: Option<u64>,
    limits: Option<ResourceLimits>,
}

impl OpenOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the password used for AES key derivation.
    ///
    /// The password is held only for this archive's lifetime.
    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets how many bytes a staged stream input may hold in memory
    /// before spilling to a temporary file (default 100 MiB).
    pub fn memory_threshold(mut self, bytes: u64) -> Self {
        self.memory_threshold = Some(bytes);
        self
    }

    /// Sets the parsing and extraction limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// A 7z archive opened for reading.
pub struct Archive {
    pub(crate) source: ArchiveSource,
    pub(crate) model: HeaderModel,
    pub(crate) entries: Vec<Entry>,
    pub(crate) info: ArchiveInfo,
    pub(crate) password: Option<Password>,
    /// Folder index -> fully decompressed output, for folders with more
    /// consumers still to come.
    pub(crate) folder_cache: HashMap<usize, Arc<[u8]>>,
    /// Folder index -> number of entry readers handed out.
    pub(crate) extracted: HashMap<usize, u64>,
    /// Folder index -> live solid-folder splitter.
    pub(crate) splitters: HashMap<usize, Arc<Mutex<FolderSplitter>>>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("entries", &self.entries.len())
            .field("folders", &self.info.folder_count)
            .field("solid", &self.info.is_solid)
            .finish()
    }
}

impl Archive {
    /// Opens an archive from a file path.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_path_with_options(path, OpenOptions::new())
    }

    /// Opens an archive from a file path with explicit options.
    pub fn open_path_with_options(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        Self::from_source(ArchiveSource::open_path(path)?, options)
    }

    /// Opens an archive held in memory.
    pub fn open_buffer(data: impl Into<Arc<[u8]>>) -> Result<Self> {
        Self::open_buffer_with_options(data, OpenOptions::new())
    }

    /// Opens an in-memory archive with explicit options.
    pub fn open_buffer_with_options(
        data: impl Into<Arc<[u8]>>,
        options: OpenOptions,
    ) -> Result<Self> {
        Self::from_source(ArchiveSource::from_buffer(data), options)
    }

    /// Opens an archive from an arbitrary byte stream.
    ///
    /// 7z needs random access into the trailing metadata block, so the
    /// stream is staged first: in memory up to the configured threshold,
    /// beyond that in a temporary file that is removed when the archive
    /// is dropped.
    pub fn open_stream(input: impl Read) -> Result<Self> {
        Self::open_stream_with_options(input, OpenOptions::new())
    }

    /// Opens a byte stream with explicit options.
    pub fn open_stream_with_options(input: impl Read, options: OpenOptions) -> Result<Self> {
        let threshold = options
            .memory_threshold
            .unwrap_or(DEFAULT_MEMORY_THRESHOLD);
        Self::from_source(ArchiveSource::stage_stream(input, threshold)?, options)
    }

    fn from_source(source: ArchiveSource, options: OpenOptions) -> Result<Self> {
        let limits = options.limits.unwrap_or_default();
        let password = options.password;

        let (_, model) = parser::parse_archive(&source, &limits, password.as_ref())?;
        let entries = entries::build_entries(&model);
        let info = info::build_info(&model, &entries);

        if info.total_size > limits.max_total_unpacked {
            return Err(Error::ResourceLimitExceeded(format!(
                "archive unpacks to {} bytes, over the configured limit",
                info.total_size
            )));
        }

        log::debug!(
            "opened archive: {} entries in {} folders ({} packed bytes)",
            entries.len(),
            info.folder_count,
            info.packed_size
        );

        Ok(Self {
            source,
            model,
            entries,
            info,
            password,
            folder_cache: HashMap::new(),
            extracted: HashMap::new(),
            splitters: HashMap::new(),
        })
    }

    /// Returns all entries in archive order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Returns the entry at `index`.
    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the archive summary.
    pub fn info(&self) -> &ArchiveInfo {
        &self.info
    }

    /// Returns the archive comment, when present.
    pub fn comment(&self) -> Option<&str> {
        self.info.comment.as_deref()
    }
}
