//! Error types for 7z extraction.
//!
//! All fallible operations in this crate return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. Structural problems (bad signature,
//! corrupt header, truncation) are reported synchronously when the archive
//! is opened; codec and integrity problems surface on the entry reader that
//! hit them.
//!
//! ```rust,no_run
//! use sevenstream::{Archive, Error};
//!
//! fn open(path: &str) -> sevenstream::Result<()> {
//!     match Archive::open_path(path) {
//!         Ok(archive) => {
//!             println!("{} entries", archive.len());
//!             Ok(())
//!         }
//!         Err(Error::InvalidSignature) => {
//!             eprintln!("not a 7z archive");
//!             Err(Error::InvalidSignature)
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::io;

/// Helper for formatting unsupported-codec messages.
struct UnsupportedCodecDisplay<'a> {
    method_id: &'a [u8],
    name: Option<&'static str>,
}

impl std::fmt::Display for UnsupportedCodecDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported codec {:02x?}", self.method_id)?;
        if let Some(name) = self.name {
            write!(f, " ({name})")?;
        }
        Ok(())
    }
}

/// The error type for all 7z reading operations.
///
/// Errors fall into several categories:
///
/// | Category | Variants |
/// |----------|----------|
/// | I/O | [`Io`][Self::Io] |
/// | Structural | [`InvalidSignature`][Self::InvalidSignature], [`UnsupportedVersion`][Self::UnsupportedVersion], [`TruncatedArchive`][Self::TruncatedArchive], [`CorruptHeader`][Self::CorruptHeader], [`CorruptArchive`][Self::CorruptArchive] |
/// | Capability | [`UnsupportedCodec`][Self::UnsupportedCodec], [`UnsupportedFeature`][Self::UnsupportedFeature], [`PasswordRequired`][Self::PasswordRequired] |
/// | Codec runtime | [`DecompressionFailed`][Self::DecompressionFailed] |
/// | Integrity | [`CrcMismatch`][Self::CrcMismatch] |
/// | Usage | [`OutOfOrder`][Self::OutOfOrder] |
/// | Resources | [`ResourceLimitExceeded`][Self::ResourceLimitExceeded] |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error from the underlying file or stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the 7z magic bytes.
    #[error("invalid 7z signature")]
    InvalidSignature,

    /// The archive declares a format version this crate does not read.
    ///
    /// Only major version 0 is supported.
    #[error("unsupported 7z version {major}.{minor}")]
    UnsupportedVersion {
        /// Declared major version.
        major: u8,
        /// Declared minor version.
        minor: u8,
    },

    /// The input ended before a complete structure could be read.
    #[error("truncated archive: {0}")]
    TruncatedArchive(String),

    /// The metadata block is damaged or contradicts itself.
    ///
    /// The offset is the byte position (when known) where the damage was
    /// detected; compressed-header recovery failures also land here.
    #[error("corrupt header at offset {offset:#x}: {reason}")]
    CorruptHeader {
        /// Byte offset where the corruption was detected.
        offset: u64,
        /// Description of the corruption.
        reason: String,
    },

    /// The archive body contradicts the parsed metadata.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// A folder uses a codec this crate does not implement.
    ///
    /// The method ID is the raw 7z coder identifier. `name` is filled in
    /// for codecs that are recognised but deliberately unsupported (PPMd).
    #[error("{}", UnsupportedCodecDisplay { method_id, name: *name })]
    UnsupportedCodec {
        /// Raw method ID bytes from the coder definition.
        method_id: Vec<u8>,
        /// Human-readable codec name, when recognised.
        name: Option<&'static str>,
    },

    /// The archive uses a 7z feature outside this crate's scope.
    #[error("unsupported feature: {feature}")]
    UnsupportedFeature {
        /// Name of the unsupported feature.
        feature: &'static str,
    },

    /// The archive (or its header) is encrypted and no password was given.
    #[error("password required for encrypted archive")]
    PasswordRequired,

    /// A codec failed while decoding a folder.
    ///
    /// For encrypted folders this is also how a wrong password usually
    /// manifests, alongside [`CrcMismatch`][Self::CrcMismatch].
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Decompressed data did not match its recorded CRC-32.
    #[error("CRC mismatch for entry {entry_index}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Index of the entry whose data failed verification.
        entry_index: usize,
        /// CRC recorded in the archive.
        expected: u32,
        /// CRC of the bytes actually produced.
        actual: u32,
    },

    /// A solid-folder sub-stream was requested after later data was consumed.
    ///
    /// Files inside a solid folder can only be streamed in archive order.
    #[error("file {requested} of folder {folder_index} requested after file {current} was already streamed")]
    OutOfOrder {
        /// Folder the request targeted.
        folder_index: usize,
        /// File index that was requested.
        requested: usize,
        /// File index the splitter had already advanced to.
        current: usize,
    },

    /// A parsing or extraction limit was exceeded.
    ///
    /// These limits protect against hostile archives (decompression bombs,
    /// absurd entry counts, extreme key-derivation iteration counts).
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),
}

impl Error {
    /// Returns `true` if this error indicates damaged archive data.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CrcMismatch { .. }
                | Error::CorruptHeader { .. }
                | Error::CorruptArchive(_)
                | Error::TruncatedArchive(_)
        )
    }

    /// Returns `true` if this error is about a missing capability rather
    /// than bad data.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCodec { .. }
                | Error::UnsupportedFeature { .. }
                | Error::UnsupportedVersion { .. }
        )
    }

    /// Returns `true` if providing (a different) password could resolve
    /// this error.
    pub fn is_password_error(&self) -> bool {
        matches!(self, Error::PasswordRequired)
    }

    /// Creates a [`CorruptHeader`][Self::CorruptHeader] error.
    pub(crate) fn corrupt_header(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an [`UnsupportedCodec`][Self::UnsupportedCodec] error.
    pub(crate) fn unsupported_codec(method_id: &[u8], name: Option<&'static str>) -> Self {
        Error::UnsupportedCodec {
            method_id: method_id.to_vec(),
            name,
        }
    }

    /// Wraps this error into an `io::Error` so it can travel through a
    /// `Read` implementation without losing the variant.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }

    /// Recovers a crate error smuggled through an `io::Error`, falling back
    /// to [`Io`][Self::Io] for genuine I/O failures.
    pub(crate) fn from_io(e: io::Error) -> Self {
        match e.downcast::<Error>() {
            Ok(err) => err,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Error::TruncatedArchive("unexpected end of input".into())
            }
            Err(e) => Error::Io(e),
        }
    }
}

/// A specialized `Result` type for 7z operations.
pub type Result<T> = std::result::Result<T, Error>;
