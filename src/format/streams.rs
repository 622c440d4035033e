//! StreamsInfo structures: pack data layout and folder definitions.
//!
//! A *folder* is the 7z decompression unit: a small graph of coders whose
//! edges are *bind pairs* (one coder's output wired into another's input)
//! and whose unbound inputs are fed by *packed streams* from the archive
//! body. The graph is a tree with a single final output, which is then
//! partitioned into one or more files by `SubStreamsInfo`.

use std::io::Read;

use crate::{Error, Result};

use super::nums::{
    read_bytes, read_count, read_defined_vector, read_number, read_number_array, read_u8,
    read_u32_le,
};
use super::property_id;

/// Upper bound on coders in a single folder.
///
/// Real archives use at most five (BCJ2 plus its three compressors plus a
/// filter); anything larger is treated as hostile.
const MAX_CODERS_PER_FOLDER: u64 = 16;

/// Limits enforced while parsing headers and extracting entries.
///
/// Defaults are sized to pass any legitimate archive while refusing
/// decompression bombs and hostile headers.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum number of entries, pack streams, or substreams.
    pub max_entries: usize,
    /// Maximum metadata block size in bytes.
    pub max_header_bytes: u64,
    /// Maximum unpacked size of a single entry.
    pub max_entry_unpacked: u64,
    /// Maximum total unpacked size across all entries.
    pub max_total_unpacked: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_entries: 1_000_000,
            max_header_bytes: 64 << 20,
            max_entry_unpacked: 64 << 30,
            max_total_unpacked: 1 << 40,
        }
    }
}

impl ResourceLimits {
    /// Creates limits with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates limits with no restrictions.
    pub fn unlimited() -> Self {
        Self {
            max_entries: usize::MAX,
            max_header_bytes: u64::MAX,
            max_entry_unpacked: u64::MAX,
            max_total_unpacked: u64::MAX,
        }
    }

    /// Sets the maximum entry count.
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Sets the maximum metadata block size.
    pub fn max_header_bytes(mut self, max: u64) -> Self {
        self.max_header_bytes = max;
        self
    }

    /// Sets the maximum unpacked size of a single entry.
    pub fn max_entry_unpacked(mut self, max: u64) -> Self {
        self.max_entry_unpacked = max;
        self
    }

    /// Sets the maximum total unpacked size.
    pub fn max_total_unpacked(mut self, max: u64) -> Self {
        self.max_total_unpacked = max;
        self
    }
}

/// Location and sizes of the packed streams in the archive body.
#[derive(Debug, Clone, Default)]
pub struct PackInfo {
    /// Offset of the first packed stream, relative to the end of the
    /// signature header.
    pub pack_pos: u64,
    /// Size of each packed stream, in archive order.
    pub pack_sizes: Vec<u64>,
    /// Optional CRC-32 of each packed stream.
    pub pack_crcs: Vec<Option<u32>>,
}

impl PackInfo {
    /// Parses a PackInfo section (after its property ID byte).
    pub fn parse<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<Self> {
        let pack_pos = read_number(r)?;
        let num_streams = read_count(r, "pack stream", limits.max_entries)?;

        let mut pack_sizes = Vec::new();
        let mut pack_crcs = vec![None; num_streams];

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::SIZE => {
                    pack_sizes = read_number_array(r, num_streams)?;
                }

                property_id::CRC => {
                    let defined = read_defined_vector(r, num_streams)?;
                    for (slot, has_crc) in pack_crcs.iter_mut().zip(defined) {
                        if has_crc {
                            *slot = Some(read_u32_le(r)?);
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property {other:#04x} in PackInfo"),
                    ));
                }
            }
        }

        if pack_sizes.len() != num_streams {
            return Err(Error::corrupt_header(
                0,
                format!(
                    "PackInfo declares {num_streams} streams but sizes for {}",
                    pack_sizes.len()
                ),
            ));
        }

        Ok(Self {
            pack_pos,
            pack_sizes,
            pack_crcs,
        })
    }

    /// Returns the number of packed streams.
    pub fn num_streams(&self) -> usize {
        self.pack_sizes.len()
    }
}

/// A codec instance inside a folder graph.
#[derive(Debug, Clone)]
pub struct Coder {
    /// Raw method ID (1..=15 bytes, typically 1 to 4).
    pub method_id: Vec<u8>,
    /// Declared input stream count.
    pub num_in_streams: u64,
    /// Declared output stream count.
    pub num_out_streams: u64,
    /// Codec properties blob (dictionary sizes, filter distances, ...).
    pub properties: Option<Vec<u8>>,
}

impl Coder {
    /// Returns the coder's properties or an empty slice.
    pub fn properties(&self) -> &[u8] {
        self.properties.as_deref().unwrap_or(&[])
    }
}

/// An edge in the folder graph: `out_index` feeds `in_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindPair {
    /// Global input-stream index receiving the data.
    pub in_index: u64,
    /// Global output-stream index producing the data.
    pub out_index: u64,
}

/// A 7z decompression unit.
#[derive(Debug, Clone)]
pub struct Folder {
    /// Coders, in declaration order.
    pub coders: Vec<Coder>,
    /// Edges wiring coder outputs into coder inputs.
    pub bind_pairs: Vec<BindPair>,
    /// Global input-stream indices fed from packed archive data, in pack
    /// order.
    pub packed_streams: Vec<u64>,
    /// Output size of every coder output stream, indexed globally.
    pub unpack_sizes: Vec<u64>,
    /// Optional CRC-32 of the folder's final output.
    pub unpack_crc: Option<u32>,
}

impl Folder {
    /// Parses a single folder definition.
    fn parse<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<Self> {
        let num_coders = read_number(r)?;
        if num_coders == 0 || num_coders > MAX_CODERS_PER_FOLDER {
            return Err(Error::corrupt_header(
                0,
                format!("folder declares {num_coders} coders"),
            ));
        }

        let mut coders = Vec::with_capacity(num_coders as usize);
        let mut total_in = 0u64;
        let mut total_out = 0u64;

        for _ in 0..num_coders {
            let flags = read_u8(r)?;
            let id_size = (flags & 0x0F) as usize;
            let is_complex = flags & 0x10 != 0;
            let has_properties = flags & 0x20 != 0;

            let method_id = read_bytes(r, id_size)?;

            let (num_in_streams, num_out_streams) = if is_complex {
                (read_number(r)?, read_number(r)?)
            } else {
                (1, 1)
            };
            if num_in_streams == 0 || num_out_streams == 0 {
                return Err(Error::corrupt_header(0, "coder with zero streams"));
            }

            let properties = if has_properties {
                let size = read_count(r, "coder properties", limits.max_header_bytes as usize)?;
                Some(read_bytes(r, size)?)
            } else {
                None
            };

            total_in += num_in_streams;
            total_out += num_out_streams;

            coders.push(Coder {
                method_id,
                num_in_streams,
                num_out_streams,
                properties,
            });
        }

        // The graph is a tree with one final output, so there is exactly
        // one bind pair per non-final output.
        let num_bind_pairs = total_out - 1;
        let mut bind_pairs = Vec::with_capacity(num_bind_pairs as usize);
        for _ in 0..num_bind_pairs {
            let in_index = read_number(r)?;
            let out_index = read_number(r)?;
            if in_index >= total_in || out_index >= total_out {
                return Err(Error::corrupt_header(
                    0,
                    format!("bind pair {in_index}->{out_index} out of range"),
                ));
            }
            bind_pairs.push(BindPair {
                in_index,
                out_index,
            });
        }

        let num_packed = total_in
            .checked_sub(num_bind_pairs)
            .ok_or_else(|| Error::corrupt_header(0, "more bind pairs than coder inputs"))?;

        let packed_streams = if num_packed == 1 {
            // Implicit: the single unbound input.
            let mut bound = vec![false; total_in as usize];
            for bp in &bind_pairs {
                bound[bp.in_index as usize] = true;
            }
            let unbound = bound.iter().position(|b| !b).ok_or_else(|| {
                Error::corrupt_header(0, "folder has no unbound input for its packed stream")
            })?;
            vec![unbound as u64]
        } else {
            let indices = read_number_array(r, num_packed as usize)?;
            for &idx in &indices {
                if idx >= total_in {
                    return Err(Error::corrupt_header(
                        0,
                        format!("packed stream index {idx} out of range"),
                    ));
                }
            }
            indices
        };

        let folder = Self {
            coders,
            bind_pairs,
            packed_streams,
            unpack_sizes: Vec::new(),
            unpack_crc: None,
        };
        folder.validate()?;
        Ok(folder)
    }

    /// Checks the structural invariants of the coder graph.
    ///
    /// Unbound inputs must equal the packed-stream count, no input may be
    /// fed twice, and the coder-level graph must be acyclic.
    pub fn validate(&self) -> Result<()> {
        let total_in = self.total_in_streams();

        let mut fed = vec![false; total_in as usize];
        for bp in &self.bind_pairs {
            let slot = &mut fed[bp.in_index as usize];
            if *slot {
                return Err(Error::corrupt_header(
                    0,
                    format!("input stream {} bound twice", bp.in_index),
                ));
            }
            *slot = true;
        }
        for &idx in &self.packed_streams {
            let slot = &mut fed[idx as usize];
            if *slot {
                return Err(Error::corrupt_header(
                    0,
                    format!("input stream {idx} fed by both pack data and a bind pair"),
                ));
            }
            *slot = true;
        }
        if fed.iter().any(|f| !f) {
            return Err(Error::corrupt_header(0, "folder leaves a coder input unfed"));
        }

        self.check_acyclic()
    }

    /// Rejects cyclic coder graphs.
    ///
    /// The bind-pair graph of a well-formed archive is a tree; a cycle
    /// would make the decode schedule diverge, so it is treated as header
    /// corruption.
    fn check_acyclic(&self) -> Result<()> {
        let n = self.coders.len();
        let offsets = self.coder_stream_offsets();

        // Coder-level edges: producer -> consumer.
        let mut in_degree = vec![0usize; n];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        for bp in &self.bind_pairs {
            let producer = self.coder_for_out_stream(&offsets, bp.out_index)?.0;
            let consumer = self.coder_for_in_stream(&offsets, bp.in_index)?.0;
            edges[producer].push(consumer);
            in_degree[consumer] += 1;
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(coder) = ready.pop() {
            visited += 1;
            for &next in &edges[coder] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(next);
                }
            }
        }

        if visited != n {
            return Err(Error::corrupt_header(0, "cyclic coder graph"));
        }
        Ok(())
    }

    /// Total input streams across all coders.
    pub fn total_in_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_in_streams).sum()
    }

    /// Total output streams across all coders.
    pub fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Per-coder `(first_in_stream, first_out_stream)` offsets in the
    /// folder's global stream index space.
    pub fn coder_stream_offsets(&self) -> Vec<(u64, u64)> {
        let mut offsets = Vec::with_capacity(self.coders.len());
        let (mut ins, mut outs) = (0u64, 0u64);
        for coder in &self.coders {
            offsets.push((ins, outs));
            ins += coder.num_in_streams;
            outs += coder.num_out_streams;
        }
        offsets
    }

    /// Resolves a global input-stream index to `(coder index, local input)`.
    pub fn coder_for_in_stream(
        &self,
        offsets: &[(u64, u64)],
        in_stream: u64,
    ) -> Result<(usize, u64)> {
        for (idx, coder) in self.coders.iter().enumerate() {
            let first = offsets[idx].0;
            if in_stream >= first && in_stream < first + coder.num_in_streams {
                return Ok((idx, in_stream - first));
            }
        }
        Err(Error::corrupt_header(
            0,
            format!("input stream {in_stream} belongs to no coder"),
        ))
    }

    /// Resolves a global output-stream index to `(coder index, local output)`.
    pub fn coder_for_out_stream(
        &self,
        offsets: &[(u64, u64)],
        out_stream: u64,
    ) -> Result<(usize, u64)> {
        for (idx, coder) in self.coders.iter().enumerate() {
            let first = offsets[idx].1;
            if out_stream >= first && out_stream < first + coder.num_out_streams {
                return Ok((idx, out_stream - first));
            }
        }
        Err(Error::corrupt_header(
            0,
            format!("output stream {out_stream} belongs to no coder"),
        ))
    }

    /// Finds the bind pair feeding the given input stream, if any.
    pub fn bind_pair_for_in_stream(&self, in_stream: u64) -> Option<&BindPair> {
        self.bind_pairs.iter().find(|bp| bp.in_index == in_stream)
    }

    /// Finds the bind pair consuming the given output stream, if any.
    pub fn bind_pair_for_out_stream(&self, out_stream: u64) -> Option<&BindPair> {
        self.bind_pairs.iter().find(|bp| bp.out_index == out_stream)
    }

    /// Returns the pack-order position of an input stream, if it is fed
    /// from packed archive data.
    pub fn packed_stream_position(&self, in_stream: u64) -> Option<usize> {
        self.packed_streams.iter().position(|&ps| ps == in_stream)
    }

    /// Global index of the final output stream (the one no bind pair
    /// consumes).
    pub fn final_out_stream(&self) -> Result<u64> {
        let total_out = self.total_out_streams();
        (0..total_out)
            .find(|&out| self.bind_pair_for_out_stream(out).is_none())
            .ok_or_else(|| Error::corrupt_header(0, "folder has no final output stream"))
    }

    /// Size of the folder's final output.
    pub fn final_unpack_size(&self) -> Result<u64> {
        let out = self.final_out_stream()?;
        self.unpack_sizes
            .get(out as usize)
            .copied()
            .ok_or_else(|| Error::corrupt_header(0, "folder is missing its final unpack size"))
    }

    /// Returns `true` when the graph is a simple chain: one packed input
    /// and every coder single-input, single-output.
    pub fn is_linear(&self) -> bool {
        self.packed_streams.len() == 1
            && self
                .coders
                .iter()
                .all(|c| c.num_in_streams == 1 && c.num_out_streams == 1)
    }

    /// Coder indices of a linear folder ordered from the coder that reads
    /// pack data to the coder that emits the final output.
    ///
    /// Fails on non-linear folders.
    pub fn ordered_chain(&self) -> Result<Vec<usize>> {
        if !self.is_linear() {
            return Err(Error::corrupt_header(
                0,
                "ordered_chain called on a non-linear folder",
            ));
        }

        // With 1-in/1-out coders the global input and output index of
        // coder i are both i.
        let mut chain = Vec::with_capacity(self.coders.len());
        let mut current = self.packed_streams[0] as usize;
        loop {
            chain.push(current);
            match self.bind_pair_for_out_stream(current as u64) {
                Some(bp) => current = bp.in_index as usize,
                None => break,
            }
            if chain.len() > self.coders.len() {
                return Err(Error::corrupt_header(0, "cyclic coder chain"));
            }
        }

        if chain.len() != self.coders.len() {
            return Err(Error::corrupt_header(
                0,
                "linear folder chain does not visit every coder",
            ));
        }
        Ok(chain)
    }
}

/// UnpackInfo: the folder list with output sizes and CRCs.
#[derive(Debug, Clone, Default)]
pub struct UnpackInfo {
    /// Folders, in archive order.
    pub folders: Vec<Folder>,
}

impl UnpackInfo {
    /// Parses an UnpackInfo section (after its property ID byte).
    pub fn parse<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<Self> {
        let mut folders = Vec::new();

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::FOLDER => {
                    let num_folders = read_count(r, "folder", limits.max_entries)?;
                    if read_u8(r)? != 0 {
                        return Err(Error::UnsupportedFeature {
                            feature: "external folder definitions",
                        });
                    }
                    folders.reserve(num_folders);
                    for _ in 0..num_folders {
                        folders.push(Folder::parse(r, limits)?);
                    }
                }

                property_id::CODERS_UNPACK_SIZE => {
                    for folder in &mut folders {
                        let count = folder.total_out_streams() as usize;
                        folder.unpack_sizes = read_number_array(r, count)?;
                        for &size in &folder.unpack_sizes {
                            if size > limits.max_entry_unpacked {
                                return Err(Error::ResourceLimitExceeded(format!(
                                    "coder output size {size} exceeds limit"
                                )));
                            }
                        }
                    }
                }

                property_id::CRC => {
                    let defined = read_defined_vector(r, folders.len())?;
                    for (folder, has_crc) in folders.iter_mut().zip(defined) {
                        if has_crc {
                            folder.unpack_crc = Some(read_u32_le(r)?);
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property {other:#04x} in UnpackInfo"),
                    ));
                }
            }
        }

        Ok(Self { folders })
    }
}

/// SubStreamsInfo: how each folder's output is partitioned into files.
#[derive(Debug, Clone, Default)]
pub struct SubStreamsInfo {
    /// Number of files materialised from each folder.
    pub streams_per_folder: Vec<u64>,
    /// Unpacked size of every file, across all folders in order.
    pub unpack_sizes: Vec<u64>,
    /// Optional CRC-32 of every file, across all folders in order.
    pub digests: Vec<Option<u32>>,
}

impl SubStreamsInfo {
    /// Parses a SubStreamsInfo section (after its property ID byte).
    pub fn parse<R: Read>(r: &mut R, folders: &[Folder], limits: &ResourceLimits) -> Result<Self> {
        let mut streams_per_folder = vec![1u64; folders.len()];
        let mut unpack_sizes = Vec::new();
        let mut digests = Vec::new();

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::NUM_UNPACK_STREAM => {
                    let mut total = 0u64;
                    for slot in streams_per_folder.iter_mut() {
                        *slot = read_number(r)?;
                        total += *slot;
                        if total > limits.max_entries as u64 {
                            return Err(Error::ResourceLimitExceeded(format!(
                                "archive declares more than {} substreams",
                                limits.max_entries
                            )));
                        }
                    }
                }

                property_id::SIZE => {
                    // Per folder, n-1 explicit sizes; the last is the
                    // remainder of the folder's output.
                    for (folder, &count) in folders.iter().zip(&streams_per_folder) {
                        if count == 0 {
                            continue;
                        }
                        let mut remaining = folder.final_unpack_size()?;
                        for _ in 0..count - 1 {
                            let size = read_number(r)?;
                            remaining = remaining.checked_sub(size).ok_or_else(|| {
                                Error::corrupt_header(
                                    0,
                                    "substream sizes exceed the folder output size",
                                )
                            })?;
                            unpack_sizes.push(size);
                        }
                        unpack_sizes.push(remaining);
                    }
                }

                property_id::CRC => {
                    // Files inherit the folder CRC when they are alone in
                    // their folder; only the rest carry explicit digests.
                    let mut needing: usize = 0;
                    for (folder, &count) in folders.iter().zip(&streams_per_folder) {
                        if folder.unpack_crc.is_none() || count != 1 {
                            needing += count as usize;
                        }
                    }

                    let defined = read_defined_vector(r, needing)?;
                    let mut defined_iter = defined.into_iter();

                    for (folder, &count) in folders.iter().zip(&streams_per_folder) {
                        if folder.unpack_crc.is_some() && count == 1 {
                            digests.push(folder.unpack_crc);
                        } else {
                            for _ in 0..count {
                                let has_crc = defined_iter.next().unwrap_or(false);
                                digests.push(if has_crc {
                                    Some(read_u32_le(r)?)
                                } else {
                                    None
                                });
                            }
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property {other:#04x} in SubStreamsInfo"),
                    ));
                }
            }
        }

        // Absent kSize: every folder yields exactly one file of the
        // folder's full output size.
        if unpack_sizes.is_empty() {
            for (folder, &count) in folders.iter().zip(&streams_per_folder) {
                if count == 1 {
                    unpack_sizes.push(folder.final_unpack_size()?);
                } else if count != 0 {
                    return Err(Error::corrupt_header(
                        0,
                        "multi-file folder without substream sizes",
                    ));
                }
            }
        }

        // Absent kCRC: single-file folders inherit the folder digest.
        if digests.is_empty() {
            for (folder, &count) in folders.iter().zip(&streams_per_folder) {
                if count == 1 {
                    digests.push(folder.unpack_crc);
                } else {
                    digests.extend(std::iter::repeat_n(None, count as usize));
                }
            }
        }

        Ok(Self {
            streams_per_folder,
            unpack_sizes,
            digests,
        })
    }

    /// Total number of files across all folders.
    pub fn total_streams(&self) -> u64 {
        self.streams_per_folder.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_number(buf: &mut Vec<u8>, value: u64) {
        // Minimal encoder for test fixtures.
        if value < 0x80 {
            buf.push(value as u8);
        } else if value < 0x4000 {
            buf.push(0x80 | (value >> 8) as u8);
            buf.push(value as u8);
        } else {
            buf.push(0xFF);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn copy_coder() -> Coder {
        Coder {
            method_id: vec![0x00],
            num_in_streams: 1,
            num_out_streams: 1,
            properties: None,
        }
    }

    fn linear_folder(size: u64) -> Folder {
        Folder {
            coders: vec![copy_coder()],
            bind_pairs: vec![],
            packed_streams: vec![0],
            unpack_sizes: vec![size],
            unpack_crc: None,
        }
    }

    fn bcj2_like_folder() -> Folder {
        // [0..=2] LZMA2-style 1-in/1-out coders, [3] a 4-in/1-out merger.
        // Outputs 0,1,2 feed merger inputs 3,4,5; merger inputs at
        // global indices 3..7, merger output at global index 3.
        Folder {
            coders: vec![
                copy_coder(),
                copy_coder(),
                copy_coder(),
                Coder {
                    method_id: vec![0x03, 0x03, 0x01, 0x1B],
                    num_in_streams: 4,
                    num_out_streams: 1,
                    properties: None,
                },
            ],
            bind_pairs: vec![
                BindPair {
                    in_index: 3,
                    out_index: 0,
                },
                BindPair {
                    in_index: 4,
                    out_index: 1,
                },
                BindPair {
                    in_index: 5,
                    out_index: 2,
                },
            ],
            packed_streams: vec![0, 1, 2, 6],
            unpack_sizes: vec![100, 40, 10, 150],
            unpack_crc: Some(0x12345678),
        }
    }

    #[test]
    fn pack_info_basic() {
        let mut data = Vec::new();
        write_number(&mut data, 100); // pack_pos
        write_number(&mut data, 2); // stream count
        data.push(property_id::SIZE);
        write_number(&mut data, 50);
        write_number(&mut data, 75);
        data.push(property_id::END);

        let info = PackInfo::parse(&mut Cursor::new(&data), &ResourceLimits::default()).unwrap();
        assert_eq!(info.pack_pos, 100);
        assert_eq!(info.pack_sizes, vec![50, 75]);
        assert_eq!(info.num_streams(), 2);
    }

    #[test]
    fn pack_info_partial_crcs() {
        let mut data = Vec::new();
        write_number(&mut data, 0);
        write_number(&mut data, 3);
        data.push(property_id::SIZE);
        for size in [10u64, 20, 30] {
            write_number(&mut data, size);
        }
        data.push(property_id::CRC);
        data.push(0x00); // bitmask follows
        data.push(0b1010_0000);
        data.extend_from_slice(&0x11111111u32.to_le_bytes());
        data.extend_from_slice(&0x33333333u32.to_le_bytes());
        data.push(property_id::END);

        let info = PackInfo::parse(&mut Cursor::new(&data), &ResourceLimits::default()).unwrap();
        assert_eq!(
            info.pack_crcs,
            vec![Some(0x11111111), None, Some(0x33333333)]
        );
    }

    #[test]
    fn pack_info_missing_sizes_is_corrupt() {
        let mut data = Vec::new();
        write_number(&mut data, 0);
        write_number(&mut data, 2);
        data.push(property_id::END);

        let err = PackInfo::parse(&mut Cursor::new(&data), &ResourceLimits::default()).unwrap_err();
        assert!(matches!(err, Error::CorruptHeader { .. }));
    }

    #[test]
    fn pack_info_count_limit() {
        let mut data = Vec::new();
        write_number(&mut data, 0);
        write_number(&mut data, 2_000_000);

        let err = PackInfo::parse(&mut Cursor::new(&data), &ResourceLimits::default()).unwrap_err();
        assert!(matches!(err, Error::ResourceLimitExceeded(_)));
    }

    #[test]
    fn unpack_info_single_copy_folder() {
        let mut data = Vec::new();
        data.push(property_id::FOLDER);
        write_number(&mut data, 1); // folder count
        data.push(0x00); // inline
        write_number(&mut data, 1); // coder count
        data.push(0x01); // 1-byte id, simple, no props
        data.push(0x00); // Copy
        data.push(property_id::CODERS_UNPACK_SIZE);
        write_number(&mut data, 1000);
        data.push(property_id::CRC);
        data.push(0x01);
        data.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        data.push(property_id::END);

        let info = UnpackInfo::parse(&mut Cursor::new(&data), &ResourceLimits::default()).unwrap();
        assert_eq!(info.folders.len(), 1);
        let folder = &info.folders[0];
        assert_eq!(folder.coders[0].method_id, vec![0x00]);
        assert_eq!(folder.unpack_sizes, vec![1000]);
        assert_eq!(folder.unpack_crc, Some(0xDEADBEEF));
        assert!(folder.is_linear());
        assert_eq!(folder.final_unpack_size().unwrap(), 1000);
    }

    #[test]
    fn unpack_info_external_folders_unsupported() {
        let mut data = Vec::new();
        data.push(property_id::FOLDER);
        write_number(&mut data, 1);
        data.push(0x01); // external

        let err =
            UnpackInfo::parse(&mut Cursor::new(&data), &ResourceLimits::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
    }

    #[test]
    fn folder_two_coder_chain_order() {
        // Declaration order [filter, codec]; pack data enters the codec
        // (input 1), codec output 1 feeds filter input 0, filter output 0
        // is final.
        let folder = Folder {
            coders: vec![copy_coder(), copy_coder()],
            bind_pairs: vec![BindPair {
                in_index: 0,
                out_index: 1,
            }],
            packed_streams: vec![1],
            unpack_sizes: vec![100, 100],
            unpack_crc: None,
        };
        folder.validate().unwrap();
        assert_eq!(folder.ordered_chain().unwrap(), vec![1, 0]);
        assert_eq!(folder.final_out_stream().unwrap(), 0);
    }

    #[test]
    fn folder_graph_helpers() {
        let folder = bcj2_like_folder();
        folder.validate().unwrap();

        assert_eq!(folder.total_in_streams(), 7);
        assert_eq!(folder.total_out_streams(), 4);
        assert!(!folder.is_linear());

        let offsets = folder.coder_stream_offsets();
        assert_eq!(offsets, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);

        assert_eq!(folder.coder_for_in_stream(&offsets, 5).unwrap(), (3, 2));
        assert_eq!(folder.coder_for_out_stream(&offsets, 3).unwrap(), (3, 0));

        assert_eq!(folder.final_out_stream().unwrap(), 3);
        assert_eq!(folder.final_unpack_size().unwrap(), 150);

        assert_eq!(folder.packed_stream_position(6), Some(3));
        assert_eq!(folder.packed_stream_position(3), None);
        assert!(folder.bind_pair_for_in_stream(4).is_some());
        assert!(folder.bind_pair_for_in_stream(6).is_none());
    }

    #[test]
    fn folder_cycle_detected() {
        // Two coders feeding each other.
        let folder = Folder {
            coders: vec![copy_coder(), copy_coder()],
            bind_pairs: vec![
                BindPair {
                    in_index: 0,
                    out_index: 1,
                },
                BindPair {
                    in_index: 1,
                    out_index: 0,
                },
            ],
            packed_streams: vec![],
            unpack_sizes: vec![10, 10],
            unpack_crc: None,
        };
        let err = folder.validate().unwrap_err();
        assert!(matches!(err, Error::CorruptHeader { .. }));
    }

    #[test]
    fn folder_double_fed_input_detected() {
        let folder = Folder {
            coders: vec![copy_coder(), copy_coder()],
            bind_pairs: vec![BindPair {
                in_index: 0,
                out_index: 1,
            }],
            packed_streams: vec![0, 1],
            unpack_sizes: vec![10, 10],
            unpack_crc: None,
        };
        assert!(folder.validate().is_err());
    }

    #[test]
    fn substreams_default_one_per_folder() {
        let folders = vec![linear_folder(1000), linear_folder(2000)];
        let data = vec![property_id::END];

        let info = SubStreamsInfo::parse(
            &mut Cursor::new(&data),
            &folders,
            &ResourceLimits::default(),
        )
        .unwrap();
        assert_eq!(info.streams_per_folder, vec![1, 1]);
        assert_eq!(info.unpack_sizes, vec![1000, 2000]);
        assert_eq!(info.total_streams(), 2);
    }

    #[test]
    fn substreams_solid_folder_sizes() {
        let folders = vec![linear_folder(1500), linear_folder(500)];

        let mut data = Vec::new();
        data.push(property_id::NUM_UNPACK_STREAM);
        write_number(&mut data, 2);
        write_number(&mut data, 1);
        data.push(property_id::SIZE);
        write_number(&mut data, 1000); // second file is the 500 remainder
        data.push(property_id::END);

        let info = SubStreamsInfo::parse(
            &mut Cursor::new(&data),
            &folders,
            &ResourceLimits::default(),
        )
        .unwrap();
        assert_eq!(info.streams_per_folder, vec![2, 1]);
        assert_eq!(info.unpack_sizes, vec![1000, 500, 500]);
    }

    #[test]
    fn substreams_sizes_overflow_is_corrupt() {
        let folders = vec![linear_folder(100)];

        let mut data = Vec::new();
        data.push(property_id::NUM_UNPACK_STREAM);
        write_number(&mut data, 2);
        data.push(property_id::SIZE);
        write_number(&mut data, 200); // larger than the folder output
        data.push(property_id::END);

        let err = SubStreamsInfo::parse(
            &mut Cursor::new(&data),
            &folders,
            &ResourceLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::CorruptHeader { .. }));
    }

    #[test]
    fn substreams_explicit_digests() {
        let folders = vec![linear_folder(30)];

        let mut data = Vec::new();
        data.push(property_id::NUM_UNPACK_STREAM);
        write_number(&mut data, 3);
        data.push(property_id::SIZE);
        write_number(&mut data, 10);
        write_number(&mut data, 10);
        data.push(property_id::CRC);
        data.push(0x01); // all defined
        for crc in [1u32, 2, 3] {
            data.extend_from_slice(&crc.to_le_bytes());
        }
        data.push(property_id::END);

        let info = SubStreamsInfo::parse(
            &mut Cursor::new(&data),
            &folders,
            &ResourceLimits::default(),
        )
        .unwrap();
        assert_eq!(info.digests, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(info.unpack_sizes, vec![10, 10, 10]);
    }

    #[test]
    fn substreams_single_file_inherits_folder_crc() {
        let mut folder = linear_folder(64);
        folder.unpack_crc = Some(0xAABBCCDD);
        let folders = vec![folder];
        let data = vec![property_id::END];

        let info = SubStreamsInfo::parse(
            &mut Cursor::new(&data),
            &folders,
            &ResourceLimits::default(),
        )
        .unwrap();
        assert_eq!(info.digests, vec![Some(0xAABBCCDD)]);
    }
}
