//! # sevenstream
//!
//! A streaming 7z archive extractor in pure Rust: decode only, lazy entry
//! listing, per-entry readable streams with CRC-32 verification.
//!
//! ## Reading an archive
//!
//! ```rust,no_run
//! use std::io::Read;
//! use sevenstream::{Archive, Result};
//!
//! fn main() -> Result<()> {
//!     let mut archive = Archive::open_path("archive.7z")?;
//!
//!     for entry in archive.entries().to_vec() {
//!         println!("{} ({} bytes)", entry.path, entry.size);
//!         if entry.is_file() {
//!             let mut reader = archive.entry_reader(entry.index())?;
//!             let mut content = Vec::new();
//!             reader.read_to_end(&mut content)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Inputs
//!
//! Archives can be opened from a path, an in-memory buffer, or any byte
//! stream ([`Archive::open_stream`] stages the stream to memory or a
//! temporary file first, since 7z keeps its metadata at the end of the
//! file).
//!
//! ## Encrypted archives
//!
//! ```rust,no_run
//! use sevenstream::{Archive, OpenOptions};
//!
//! # fn main() -> sevenstream::Result<()> {
//! let options = OpenOptions::new().password("secret");
//! let archive = Archive::open_path_with_options("locked.7z", options)?;
//! # Ok(()) }
//! ```
//!
//! ## Supported codecs
//!
//! Copy, Delta, LZMA, LZMA2, BCJ (x86, ARM, ARM Thumb, ARM64, PowerPC,
//! SPARC, IA64), BCJ2, Deflate, BZip2 and AES-256-CBC. PPMd is recognised
//! for diagnostics but not decoded. Solid archives stream file by file;
//! folders that cannot stream (BCJ2) are decompressed once and served
//! from a cache until their last file has been read.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

/// Buffer size for internal read loops (8 KiB).
pub(crate) const READ_BUFFER_SIZE: usize = 8192;

pub mod checksum;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod format;
pub mod read;
pub mod source;
pub mod timestamp;

pub use crypto::Password;
pub use error::{Error, Result};
pub use format::streams::ResourceLimits;
pub use read::{Archive, ArchiveInfo, Entry, EntryReader, OpenOptions};
pub use source::ArchiveSource;
pub use timestamp::Timestamp;
