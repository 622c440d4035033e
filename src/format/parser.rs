//! Metadata block parsing.
//!
//! The metadata block at the end of the archive is a stream of
//! property-tagged sections. The outer grammar is either a plain
//! `kHeader` or a `kEncodedHeader`: a StreamsInfo-shaped description of
//! how to decompress (and possibly decrypt) the real header, which is then
//! parsed with the same grammar.
//!
//! Recovery of encoded headers first decodes at the position the
//! description declares; if that fails, the pack area is scanned backward
//! in `pack_size` steps for plausible candidates (first byte `0x00`, the
//! LZMA range-coder initialiser), accepting the first whose CRC verifies.

use std::io::{Cursor, Read};

use crate::checksum::Crc32;
use crate::codec;
use crate::crypto::Password;
use crate::source::ArchiveSource;
use crate::{Error, Result};

use super::files::FilesInfo;
use super::header::StartHeader;
use super::nums::{read_number, read_u8};
use super::streams::{Folder, PackInfo, ResourceLimits, SubStreamsInfo, UnpackInfo};
use super::{SIGNATURE_HEADER_SIZE, property_id};

/// Deepest accepted nesting of encoded headers.
const MAX_HEADER_RECURSION: u32 = 4;

/// Most fallback positions the recovery scan will try.
const MAX_RECOVERY_CANDIDATES: u64 = 1024;

/// The fully parsed archive metadata.
#[derive(Debug, Clone, Default)]
pub struct HeaderModel {
    /// Pack data layout.
    pub pack_info: Option<PackInfo>,
    /// Folder definitions.
    pub unpack_info: Option<UnpackInfo>,
    /// File partitioning of folder outputs.
    pub substreams_info: Option<SubStreamsInfo>,
    /// Per-entry metadata.
    pub files_info: Option<FilesInfo>,
    /// Whether reading the metadata itself required decryption.
    pub header_encrypted: bool,
}

impl HeaderModel {
    /// Returns the folder list.
    pub fn folders(&self) -> &[Folder] {
        self.unpack_info.as_ref().map_or(&[], |u| &u.folders)
    }

    /// Number of files materialised from the given folder.
    pub fn files_in_folder(&self, folder_index: usize) -> u64 {
        match &self.substreams_info {
            Some(ss) => ss
                .streams_per_folder
                .get(folder_index)
                .copied()
                .unwrap_or(0),
            None => {
                if folder_index < self.folders().len() {
                    1
                } else {
                    0
                }
            }
        }
    }

    /// Per-file sizes and digests within the given folder.
    pub fn folder_file_layout(&self, folder_index: usize) -> Result<(Vec<u64>, Vec<Option<u32>>)> {
        match &self.substreams_info {
            Some(ss) => {
                let count = self.files_in_folder(folder_index) as usize;
                let offset: usize = ss
                    .streams_per_folder
                    .iter()
                    .take(folder_index)
                    .map(|&n| n as usize)
                    .sum();
                let sizes = ss
                    .unpack_sizes
                    .get(offset..offset + count)
                    .ok_or_else(|| {
                        Error::corrupt_header(0, "substream sizes shorter than declared")
                    })?
                    .to_vec();
                let digests = ss
                    .digests
                    .get(offset..offset + count)
                    .map(<[Option<u32>]>::to_vec)
                    .unwrap_or_else(|| vec![None; count]);
                Ok((sizes, digests))
            }
            None => {
                let folder = self.folders().get(folder_index).ok_or_else(|| {
                    Error::corrupt_header(0, format!("folder {folder_index} out of range"))
                })?;
                Ok((vec![folder.final_unpack_size()?], vec![folder.unpack_crc]))
            }
        }
    }
}

/// Parses the complete metadata of an archive.
pub(crate) fn parse_archive(
    source: &ArchiveSource,
    limits: &ResourceLimits,
    password: Option<&Password>,
) -> Result<(StartHeader, HeaderModel)> {
    let start = StartHeader::read_from(source)?;

    if start.next_header_size == 0 {
        return Ok((start, HeaderModel::default()));
    }
    if start.next_header_size > limits.max_header_bytes {
        return Err(Error::ResourceLimitExceeded(format!(
            "metadata block of {} bytes exceeds limit",
            start.next_header_size
        )));
    }

    let header_pos = start.next_header_position()?;
    let header_end = header_pos
        .checked_add(start.next_header_size)
        .ok_or_else(|| Error::corrupt_header(12, "metadata block extends past u64 range"))?;
    if header_end > source.len() {
        return Err(Error::TruncatedArchive(format!(
            "metadata block ends at {header_end:#x} but the source has {:#x} bytes",
            source.len()
        )));
    }

    let mut block = vec![0u8; start.next_header_size as usize];
    source.read_exact_at(header_pos, &mut block)?;

    let actual_crc = Crc32::compute(&block);
    if actual_crc != start.next_header_crc {
        return Err(Error::corrupt_header(
            header_pos,
            format!(
                "metadata CRC mismatch: expected {:#010x}, got {actual_crc:#010x}",
                start.next_header_crc
            ),
        ));
    }

    let mut parser = HeaderParser {
        source,
        limits,
        password,
        metadata_pos: header_pos,
        depth: 0,
    };
    let model = parser.parse_block(&block)?;
    Ok((start, model))
}

struct HeaderParser<'a> {
    source: &'a ArchiveSource,
    limits: &'a ResourceLimits,
    password: Option<&'a Password>,
    /// Position of the outer metadata block; bounds the recovery scan.
    metadata_pos: u64,
    depth: u32,
}

/// One parsed StreamsInfo section.
#[derive(Default)]
struct StreamsInfo {
    pack_info: Option<PackInfo>,
    unpack_info: Option<UnpackInfo>,
    substreams_info: Option<SubStreamsInfo>,
}

impl HeaderParser<'_> {
    fn parse_block(&mut self, block: &[u8]) -> Result<HeaderModel> {
        let mut cursor = Cursor::new(block);
        match read_u8(&mut cursor)? {
            property_id::HEADER => self.parse_main_header(&mut cursor, false),
            property_id::ENCODED_HEADER => {
                let (decoded, encrypted) = self.recover_encoded_header(&mut cursor)?;
                let mut inner = Cursor::new(decoded.as_slice());
                match read_u8(&mut inner)? {
                    property_id::HEADER => self.parse_main_header(&mut inner, encrypted),
                    property_id::ENCODED_HEADER => {
                        // Nested encoded headers; recursion is bounded.
                        let model = self.parse_block(&decoded)?;
                        Ok(HeaderModel {
                            header_encrypted: model.header_encrypted || encrypted,
                            ..model
                        })
                    }
                    other => Err(Error::corrupt_header(
                        0,
                        format!("decoded header starts with {other:#04x}"),
                    )),
                }
            }
            other => Err(Error::corrupt_header(
                self.metadata_pos,
                format!("metadata block starts with {other:#04x}"),
            )),
        }
    }

    fn parse_main_header<R: Read>(
        &mut self,
        r: &mut R,
        header_encrypted: bool,
    ) -> Result<HeaderModel> {
        let mut model = HeaderModel {
            header_encrypted,
            ..HeaderModel::default()
        };

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::ARCHIVE_PROPERTIES => {
                    skip_archive_properties(r, self.limits)?;
                }

                property_id::ADDITIONAL_STREAMS_INFO => {
                    // Parsed to stay in sync with the grammar, then
                    // dropped; additional streams carry no entries.
                    let _ = self.parse_streams_info(r)?;
                }

                property_id::MAIN_STREAMS_INFO => {
                    let info = self.parse_streams_info(r)?;
                    model.pack_info = info.pack_info;
                    model.unpack_info = info.unpack_info;
                    model.substreams_info = info.substreams_info;
                }

                property_id::FILES_INFO => {
                    let (sizes, digests) = all_file_sizes(&model)?;
                    model.files_info =
                        Some(FilesInfo::parse(r, &sizes, &digests, self.limits)?);
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property {other:#04x} in header"),
                    ));
                }
            }
        }

        validate_model(&model)?;
        Ok(model)
    }

    fn parse_streams_info<R: Read>(&mut self, r: &mut R) -> Result<StreamsInfo> {
        let mut info = StreamsInfo::default();

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::PACK_INFO => {
                    info.pack_info = Some(PackInfo::parse(r, self.limits)?);
                }

                property_id::UNPACK_INFO => {
                    info.unpack_info = Some(UnpackInfo::parse(r, self.limits)?);
                }

                property_id::SUBSTREAMS_INFO => {
                    let folders = info
                        .unpack_info
                        .as_ref()
                        .map_or(&[] as &[Folder], |u| &u.folders);
                    info.substreams_info =
                        Some(SubStreamsInfo::parse(r, folders, self.limits)?);
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property {other:#04x} in streams info"),
                    ));
                }
            }
        }

        Ok(info)
    }

    /// Decodes an encoded header, returning the decoded block and whether
    /// decryption was involved.
    fn recover_encoded_header<R: Read>(&mut self, r: &mut R) -> Result<(Vec<u8>, bool)> {
        self.depth += 1;
        if self.depth > MAX_HEADER_RECURSION {
            return Err(Error::corrupt_header(
                self.metadata_pos,
                "encoded headers nested too deeply",
            ));
        }

        let info = self.parse_streams_info(r)?;
        let pack_info = info
            .pack_info
            .ok_or_else(|| Error::corrupt_header(0, "encoded header without pack info"))?;
        let unpack_info = info
            .unpack_info
            .ok_or_else(|| Error::corrupt_header(0, "encoded header without unpack info"))?;
        let folder = unpack_info
            .folders
            .first()
            .ok_or_else(|| Error::corrupt_header(0, "encoded header without a folder"))?;
        let pack_size = *pack_info
            .pack_sizes
            .first()
            .ok_or_else(|| Error::corrupt_header(0, "encoded header without a pack size"))?;

        let unpack_size = folder.final_unpack_size()?;
        if unpack_size > self.limits.max_header_bytes {
            return Err(Error::ResourceLimitExceeded(format!(
                "decoded header of {unpack_size} bytes exceeds limit"
            )));
        }
        let encrypted = codec::folder_uses_aes(folder);
        if encrypted && self.password.is_none() {
            return Err(Error::PasswordRequired);
        }

        let declared_pos = SIGNATURE_HEADER_SIZE
            .checked_add(pack_info.pack_pos)
            .ok_or_else(|| Error::corrupt_header(0, "encoded header pack position overflows"))?;

        match self.try_decode_header(declared_pos, pack_size, unpack_size, folder) {
            Ok(block) => return Ok((block, encrypted)),
            Err(primary_err) => {
                log::warn!(
                    "encoded header failed to decode at its declared position {declared_pos:#x} \
                     ({primary_err}); scanning the pack area for candidates"
                );
            }
        }

        // Positional fallback: walk backward across the pack area in
        // pack_size steps. Intermediate failures stay internal; only the
        // terminal all-candidates-failed condition surfaces.
        if pack_size > 0 && self.metadata_pos > SIGNATURE_HEADER_SIZE.saturating_add(pack_size) {
            let mut candidate = self.metadata_pos - pack_size;
            let mut attempts = 0u64;
            while candidate >= SIGNATURE_HEADER_SIZE && attempts < MAX_RECOVERY_CANDIDATES {
                attempts += 1;
                if candidate != declared_pos {
                    let mut first = [0u8; 1];
                    if self.source.read_at(candidate, &mut first)? == 1 && first[0] == 0x00 {
                        if let Ok(block) =
                            self.try_decode_header(candidate, pack_size, unpack_size, folder)
                        {
                            log::warn!(
                                "encoded header recovered from fallback position {candidate:#x}"
                            );
                            return Ok((block, encrypted));
                        }
                    }
                }
                match candidate.checked_sub(pack_size) {
                    Some(next) => candidate = next,
                    None => break,
                }
            }
        }

        Err(Error::corrupt_header(
            declared_pos,
            "compressed header could not be decoded at any candidate position",
        ))
    }

    /// Attempts one candidate position, verifying the folder CRC when one
    /// is declared.
    fn try_decode_header(
        &self,
        pos: u64,
        pack_size: u64,
        unpack_size: u64,
        folder: &Folder,
    ) -> Result<Vec<u8>> {
        let packed = self.source.range_reader(pos, pack_size);
        let decoder = codec::build_linear_reader(packed, folder, self.password)?;

        let mut block = Vec::with_capacity(unpack_size.min(1 << 20) as usize);
        decoder
            .take(unpack_size)
            .read_to_end(&mut block)
            .map_err(Error::from_io)?;

        if block.len() as u64 != unpack_size {
            return Err(Error::DecompressionFailed(format!(
                "encoded header produced {} of {unpack_size} bytes",
                block.len()
            )));
        }

        if let Some(expected) = folder.unpack_crc {
            let actual = Crc32::compute(&block);
            if actual != expected {
                return Err(Error::corrupt_header(
                    pos,
                    format!("decoded header CRC mismatch ({actual:#010x} != {expected:#010x})"),
                ));
            }
        }

        Ok(block)
    }
}

/// Skips the ArchiveProperties section.
fn skip_archive_properties<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<()> {
    loop {
        let prop_type = read_u8(r)?;
        if prop_type == property_id::END {
            return Ok(());
        }
        let size = read_number(r)?;
        if size > limits.max_header_bytes {
            return Err(Error::ResourceLimitExceeded(
                "oversized archive property".into(),
            ));
        }
        let mut remaining = size;
        let mut scratch = [0u8; 512];
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            r.read_exact(&mut scratch[..want]).map_err(|_| {
                Error::TruncatedArchive("input ended inside archive properties".into())
            })?;
            remaining -= want as u64;
        }
    }
}

/// Sizes and digests of every file with a stream, in global stream order.
fn all_file_sizes(model: &HeaderModel) -> Result<(Vec<u64>, Vec<Option<u32>>)> {
    if let Some(ss) = &model.substreams_info {
        return Ok((ss.unpack_sizes.clone(), ss.digests.clone()));
    }
    // No SubStreamsInfo: one file per folder.
    let mut sizes = Vec::new();
    let mut digests = Vec::new();
    for folder in model.folders() {
        sizes.push(folder.final_unpack_size()?);
        digests.push(folder.unpack_crc);
    }
    Ok((sizes, digests))
}

/// Cross-checks the parsed sections against each other.
fn validate_model(model: &HeaderModel) -> Result<()> {
    let num_pack = model.pack_info.as_ref().map_or(0, PackInfo::num_streams);
    let needed: usize = model
        .folders()
        .iter()
        .map(|f| f.packed_streams.len())
        .sum();
    if needed != num_pack {
        return Err(Error::corrupt_header(
            0,
            format!("folders consume {needed} pack streams but the archive declares {num_pack}"),
        ));
    }

    if let Some(ss) = &model.substreams_info {
        if ss.streams_per_folder.len() != model.folders().len() {
            return Err(Error::corrupt_header(
                0,
                "substream folder count disagrees with unpack info",
            ));
        }
        let total = ss.total_streams() as usize;
        if ss.unpack_sizes.len() != total || ss.digests.len() != total {
            return Err(Error::corrupt_header(
                0,
                "substream size or digest vectors disagree with the stream count",
            ));
        }
    }

    if let Some(files) = &model.files_info {
        let with_stream = files.records.iter().filter(|e| e.has_stream).count();
        let available = match &model.substreams_info {
            Some(ss) => ss.total_streams() as usize,
            None => model.folders().len(),
        };
        if with_stream > available {
            return Err(Error::corrupt_header(
                0,
                format!("{with_stream} entries carry streams but only {available} exist"),
            ));
        }
    }

    Ok(())
}
