//! Archive entries.

use crate::format::attributes;
use crate::timestamp::Timestamp;

/// Unix file-type mask within a mode word.
const UNIX_TYPE_MASK: u32 = 0o170000;
/// Unix symlink file type (`S_IFLNK`, type nibble `0xA`).
const UNIX_SYMLINK: u32 = 0o120000;

/// A single entry of a 7z archive.
///
/// Entries are produced during parsing and handed back to
/// [`Archive::entry_reader`](crate::Archive::entry_reader) to obtain the
/// content stream.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Entry {
    /// Path within the archive, `/`-separated.
    pub path: String,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Whether this entry is a symbolic link.
    ///
    /// The link target is the entry's decompressed content, interpreted
    /// as UTF-8; see
    /// [`Archive::read_symlink_target`](crate::Archive::read_symlink_target).
    pub is_symlink: bool,
    /// Whether this entry is an anti-file (a deletion marker from an
    /// incremental archive). Anti-files yield empty streams.
    pub is_anti: bool,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// CRC-32 of the uncompressed content, when recorded.
    pub crc32: Option<u32>,
    /// Modification time (FILETIME), when recorded.
    pub modification_time: Option<u64>,
    /// Creation time (FILETIME), when recorded.
    pub creation_time: Option<u64>,
    /// Access time (FILETIME), when recorded.
    pub access_time: Option<u64>,
    /// Windows attribute word, when recorded.
    pub attributes: Option<u32>,
    /// Whether the entry's folder is AES-encrypted.
    pub is_encrypted: bool,
    /// Whether the entry's folder can be decompressed as a pure stream
    /// (no BCJ2, every codec streamable).
    pub streamable: bool,

    /// Position in the archive's entry list.
    pub(crate) index: usize,
    /// Whether packed content exists for this entry.
    pub(crate) has_stream: bool,
    /// Folder holding this entry's content.
    pub(crate) folder_index: Option<usize>,
    /// Position of this entry within its folder.
    pub(crate) stream_index: Option<usize>,
}

impl Entry {
    /// Returns the base name (the last path component).
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Returns `true` for regular files (not directories).
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }

    /// Returns this entry's position in [`Archive::entries`](crate::Archive::entries).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the POSIX mode embedded in the attribute word, if any.
    ///
    /// 7z archives written on Unix set attribute bit `0x8000` and store
    /// the mode in the upper 16 bits.
    pub fn unix_mode(&self) -> Option<u32> {
        let attrs = self.attributes?;
        if attrs & attributes::UNIX_EXTENSION != 0 {
            Some(attrs >> 16)
        } else {
            None
        }
    }

    /// Returns the modification time, when recorded.
    pub fn modified(&self) -> Option<Timestamp> {
        self.modification_time.map(Timestamp::from_filetime)
    }

    /// Returns the creation time, when recorded.
    pub fn created(&self) -> Option<Timestamp> {
        self.creation_time.map(Timestamp::from_filetime)
    }

    /// Returns the access time, when recorded.
    pub fn accessed(&self) -> Option<Timestamp> {
        self.access_time.map(Timestamp::from_filetime)
    }
}

/// Detects a symlink from the attribute word.
///
/// Either the embedded POSIX mode has the symlink file type, or the
/// Windows reparse-point bit is set.
pub(crate) fn is_symlink_attributes(attrs: Option<u32>) -> bool {
    let Some(attrs) = attrs else {
        return false;
    };
    if attrs & attributes::UNIX_EXTENSION != 0 && (attrs >> 16) & UNIX_TYPE_MASK == UNIX_SYMLINK {
        return true;
    }
    attrs & attributes::REPARSE_POINT != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> Entry {
        Entry {
            path: path.into(),
            is_directory: false,
            is_symlink: false,
            is_anti: false,
            size: 0,
            crc32: None,
            modification_time: None,
            creation_time: None,
            access_time: None,
            attributes: None,
            is_encrypted: false,
            streamable: true,
            index: 0,
            has_stream: true,
            folder_index: Some(0),
            stream_index: Some(0),
        }
    }

    #[test]
    fn name_is_last_component() {
        assert_eq!(entry("a/b/c.txt").name(), "c.txt");
        assert_eq!(entry("plain.bin").name(), "plain.bin");
    }

    #[test]
    fn unix_mode_needs_extension_bit() {
        let mut e = entry("f");
        e.attributes = Some(0o644 << 16 | 0x8000 | 0x20);
        assert_eq!(e.unix_mode(), Some(0o644));

        e.attributes = Some(0o644 << 16 | 0x20);
        assert_eq!(e.unix_mode(), None);
    }

    #[test]
    fn symlink_detection() {
        // Unix S_IFLNK in the embedded mode.
        let mode = 0o120777u32;
        assert!(is_symlink_attributes(Some(mode << 16 | 0x8000)));
        // Regular file mode.
        assert!(!is_symlink_attributes(Some(0o100644 << 16 | 0x8000)));
        // Windows reparse point.
        assert!(is_symlink_attributes(Some(0x400)));
        assert!(!is_symlink_attributes(Some(0x20)));
        assert!(!is_symlink_attributes(None));
    }

    #[test]
    fn timestamps_convert() {
        let mut e = entry("f");
        e.modification_time = Some(116_444_736_000_000_000);
        assert_eq!(e.modified().unwrap().as_unix_secs(), 0);
        assert!(e.created().is_none());
    }
}
