//! The 32-byte signature header.

use crate::checksum::Crc32;
use crate::source::ArchiveSource;
use crate::{Error, Result};

use super::{SIGNATURE, SIGNATURE_HEADER_SIZE, VERSION_MAJOR};

/// The start header of a 7z archive.
///
/// This structure occupies the first 32 bytes of the file and locates the
/// metadata block at the end of the archive. Its own CRC and the metadata
/// block's CRC must both verify before any parsed field is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartHeader {
    /// Format version, major part.
    pub version_major: u8,
    /// Format version, minor part.
    pub version_minor: u8,
    /// Offset from the end of the signature header to the metadata block.
    pub next_header_offset: u64,
    /// Size of the metadata block in bytes.
    pub next_header_size: u64,
    /// CRC-32 of the metadata block.
    pub next_header_crc: u32,
}

impl StartHeader {
    /// Reads and validates the signature header from the start of a source.
    pub fn read_from(source: &ArchiveSource) -> Result<Self> {
        let mut raw = [0u8; SIGNATURE_HEADER_SIZE as usize];
        source.read_exact_at(0, &mut raw)?;
        Self::parse(&raw)
    }

    /// Parses a signature header from its raw 32 bytes.
    pub fn parse(raw: &[u8; 32]) -> Result<Self> {
        if &raw[..6] != SIGNATURE {
            return Err(Error::InvalidSignature);
        }

        let version_major = raw[6];
        let version_minor = raw[7];
        if version_major != VERSION_MAJOR {
            return Err(Error::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        // Bytes 12..32 are covered by the start-header CRC at bytes 8..12.
        let declared_crc = u32::from_le_bytes(raw[8..12].try_into().unwrap());
        let actual_crc = Crc32::compute(&raw[12..32]);
        if actual_crc != declared_crc {
            return Err(Error::corrupt_header(
                8,
                format!(
                    "start header CRC mismatch: expected {declared_crc:#010x}, got {actual_crc:#010x}"
                ),
            ));
        }

        Ok(Self {
            version_major,
            version_minor,
            next_header_offset: u64::from_le_bytes(raw[12..20].try_into().unwrap()),
            next_header_size: u64::from_le_bytes(raw[20..28].try_into().unwrap()),
            next_header_crc: u32::from_le_bytes(raw[28..32].try_into().unwrap()),
        })
    }

    /// Absolute byte position of the metadata block.
    ///
    /// Fails when the declared offset overflows a u64.
    pub fn next_header_position(&self) -> Result<u64> {
        SIGNATURE_HEADER_SIZE
            .checked_add(self.next_header_offset)
            .ok_or_else(|| {
                Error::corrupt_header(12, "next-header offset overflows the address space")
            })
    }
}
