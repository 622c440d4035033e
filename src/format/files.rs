//! FilesInfo: per-entry metadata.
//!
//! Every property in FilesInfo is prefixed with its byte length, so
//! unknown properties can be skipped without understanding them. Names are
//! null-terminated UTF-16LE; timestamps are FILETIME defined-vectors;
//! attributes are 32-bit words with an optional POSIX mode in the upper
//! half.

use std::io::Read;

use crate::{Error, Result};

use super::nums::{
    read_bit_vector, read_bytes, read_count, read_defined_vector, read_u8, read_u32_le,
    read_u64_le,
};
use super::property_id;
use super::streams::ResourceLimits;

/// Longest accepted file name, in UTF-16 code units.
///
/// Far beyond any real path; bounds hostile name tables.
const MAX_NAME_UNITS: usize = 32 * 1024;

/// One file record as stored in the archive.
#[derive(Debug, Clone, Default)]
pub struct FileRecord {
    /// Name with separators as stored (slash or backslash).
    pub name: String,
    /// Whether the entry has packed content.
    pub has_stream: bool,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Whether the entry is an anti-file (deletion marker).
    pub is_anti: bool,
    /// Uncompressed size, zero for streamless entries.
    pub size: u64,
    /// CRC-32 of the uncompressed content, when recorded.
    pub crc: Option<u32>,
    /// Creation time (FILETIME).
    pub ctime: Option<u64>,
    /// Access time (FILETIME).
    pub atime: Option<u64>,
    /// Modification time (FILETIME).
    pub mtime: Option<u64>,
    /// Windows attribute word.
    pub attributes: Option<u32>,
}

/// The parsed FilesInfo section.
#[derive(Debug, Clone, Default)]
pub struct FilesInfo {
    /// File records in archive order.
    pub records: Vec<FileRecord>,
    /// Archive comment, when present.
    pub comment: Option<String>,
}

impl FilesInfo {
    /// Parses FilesInfo (after its property ID byte).
    ///
    /// `sizes` and `digests` are the per-file values from SubStreamsInfo,
    /// assigned in order to the records that carry a stream.
    pub fn parse<R: Read>(
        r: &mut R,
        sizes: &[u64],
        digests: &[Option<u32>],
        limits: &ResourceLimits,
    ) -> Result<Self> {
        let num_files = read_count(r, "file", limits.max_entries)?;
        let mut records: Vec<FileRecord> = vec![FileRecord::default(); num_files];

        let mut empty_streams = vec![false; num_files];
        let mut empty_files: Vec<bool> = Vec::new();
        let mut anti_files: Vec<bool> = Vec::new();
        let mut comment = None;

        loop {
            let prop_id = read_u8(r)?;
            if prop_id == property_id::END {
                break;
            }

            // Every FilesInfo property carries a length prefix; parsing
            // from the extracted payload keeps a malformed property from
            // desynchronising the outer stream.
            let prop_size = read_count(r, "file property", limits.max_header_bytes as usize)?;
            let payload = read_bytes(r, prop_size)?;
            let mut p = payload.as_slice();

            match prop_id {
                property_id::NAME => {
                    if read_u8(&mut p)? != 0 {
                        return Err(Error::UnsupportedFeature {
                            feature: "external file names",
                        });
                    }
                    for record in &mut records {
                        record.name = read_utf16le_name(&mut p)?;
                    }
                }

                property_id::EMPTY_STREAM => {
                    empty_streams = read_bit_vector(&mut p, num_files)?;
                }

                property_id::EMPTY_FILE => {
                    let empties = empty_streams.iter().filter(|&&e| e).count();
                    empty_files = read_bit_vector(&mut p, empties)?;
                }

                property_id::ANTI => {
                    let empties = empty_streams.iter().filter(|&&e| e).count();
                    anti_files = read_bit_vector(&mut p, empties)?;
                }

                property_id::CTIME => {
                    parse_times(&mut p, &mut records, |rec, t| rec.ctime = Some(t))?;
                }

                property_id::ATIME => {
                    parse_times(&mut p, &mut records, |rec, t| rec.atime = Some(t))?;
                }

                property_id::MTIME => {
                    parse_times(&mut p, &mut records, |rec, t| rec.mtime = Some(t))?;
                }

                property_id::WIN_ATTRIBUTES => {
                    let defined = read_defined_vector(&mut p, num_files)?;
                    if read_u8(&mut p)? != 0 {
                        return Err(Error::UnsupportedFeature {
                            feature: "external file attributes",
                        });
                    }
                    for (record, has_attr) in records.iter_mut().zip(defined) {
                        if has_attr {
                            record.attributes = Some(read_u32_le(&mut p)?);
                        }
                    }
                }

                property_id::COMMENT => {
                    if read_u8(&mut p)? != 0 {
                        return Err(Error::UnsupportedFeature {
                            feature: "external archive comments",
                        });
                    }
                    comment = Some(read_utf16le_name(&mut p)?);
                }

                // kDummy padding and anything unrecognised: the length
                // prefix already consumed it.
                _ => {}
            }
        }

        // Streamless entries are directories unless flagged as empty
        // files; anti marks apply only to streamless entries.
        let mut empty_idx = 0;
        for (record, is_empty) in records.iter_mut().zip(&empty_streams) {
            if *is_empty {
                record.has_stream = false;
                record.is_directory = !empty_files.get(empty_idx).copied().unwrap_or(false);
                record.is_anti = anti_files.get(empty_idx).copied().unwrap_or(false);
                empty_idx += 1;
            } else {
                record.has_stream = true;
            }
        }

        // Hand out substream sizes and digests in stream order.
        let mut stream_idx = 0;
        for record in &mut records {
            if record.has_stream {
                record.size = sizes.get(stream_idx).copied().unwrap_or(0);
                record.crc = digests.get(stream_idx).copied().flatten();
                stream_idx += 1;
            }
        }

        Ok(Self { records, comment })
    }
}

/// Reads one null-terminated UTF-16LE name.
///
/// Ill-formed surrogate sequences are header corruption.
fn read_utf16le_name<R: Read>(r: &mut R) -> Result<String> {
    let mut units = Vec::new();
    loop {
        let mut pair = [0u8; 2];
        r.read_exact(&mut pair).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::TruncatedArchive("input ended inside a file name".into())
            } else {
                Error::Io(e)
            }
        })?;
        let unit = u16::from_le_bytes(pair);
        if unit == 0 {
            break;
        }
        if units.len() >= MAX_NAME_UNITS {
            return Err(Error::ResourceLimitExceeded(format!(
                "file name exceeds {MAX_NAME_UNITS} UTF-16 units"
            )));
        }
        units.push(unit);
    }

    String::from_utf16(&units)
        .map_err(|_| Error::corrupt_header(0, "ill-formed UTF-16 in file name"))
}

/// Reads a defined-vector of FILETIME values.
fn parse_times<R: Read>(
    r: &mut R,
    records: &mut [FileRecord],
    mut set: impl FnMut(&mut FileRecord, u64),
) -> Result<()> {
    let defined = read_defined_vector(r, records.len())?;
    if read_u8(r)? != 0 {
        return Err(Error::UnsupportedFeature {
            feature: "external timestamps",
        });
    }
    for (record, has_time) in records.iter_mut().zip(defined) {
        if has_time {
            set(record, read_u64_le(r)?);
        }
    }
    Ok(())
}
