//! Shared helpers that synthesise 7z archives byte by byte.
//!
//! The builders here write the container structures directly (signature
//! header, property-tagged metadata, pack area) so the reader can be
//! exercised against known-good archives without shipping binary
//! fixtures.

#![allow(dead_code)]

/// Property IDs, mirrored from the format.
pub mod prop {
    pub const END: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const MAIN_STREAMS_INFO: u8 = 0x04;
    pub const FILES_INFO: u8 = 0x05;
    pub const PACK_INFO: u8 = 0x06;
    pub const UNPACK_INFO: u8 = 0x07;
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    pub const SIZE: u8 = 0x09;
    pub const CRC: u8 = 0x0A;
    pub const FOLDER: u8 = 0x0B;
    pub const CODERS_UNPACK_SIZE: u8 = 0x0C;
    pub const NUM_UNPACK_STREAM: u8 = 0x0D;
    pub const EMPTY_STREAM: u8 = 0x0E;
    pub const EMPTY_FILE: u8 = 0x0F;
    pub const ANTI: u8 = 0x10;
    pub const NAME: u8 = 0x11;
    pub const WIN_ATTRIBUTES: u8 = 0x15;
    pub const COMMENT: u8 = 0x16;
    pub const ENCODED_HEADER: u8 = 0x17;
}

/// Method IDs used by the fixtures.
pub mod method {
    pub const COPY: &[u8] = &[0x00];
    pub const DELTA: &[u8] = &[0x03];
    pub const LZMA2: &[u8] = &[0x21];
    pub const BCJ2: &[u8] = &[0x03, 0x03, 0x01, 0x1B];
    pub const DEFLATE: &[u8] = &[0x04, 0x01, 0x08];
    pub const BZIP2: &[u8] = &[0x04, 0x02, 0x02];
    pub const AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];
    pub const PPMD: &[u8] = &[0x03, 0x04, 0x01];
}

/// Writes a 7z variable-length integer.
pub fn write_number(buf: &mut Vec<u8>, value: u64) {
    if value < 0x80 {
        buf.push(value as u8);
    } else if value < 0x4000 {
        buf.push(0x80 | (value >> 8) as u8);
        buf.push(value as u8);
    } else if value < 0x20_0000 {
        buf.push(0xC0 | (value >> 16) as u8);
        buf.push(value as u8);
        buf.push((value >> 8) as u8);
    } else {
        buf.push(0xFF);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// Writes a null-terminated UTF-16LE string.
pub fn write_utf16(buf: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
    buf.extend_from_slice(&[0, 0]);
}

/// Writes an MSB-first bit vector.
pub fn write_bits(buf: &mut Vec<u8>, bits: &[bool]) {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (7 - i % 8);
        }
    }
    buf.extend_from_slice(&bytes);
}

/// The four streams produced by [`bcj2_encode`].
#[derive(Debug, Clone)]
pub struct Bcj2Streams {
    /// Main code stream.
    pub main: Vec<u8>,
    /// CALL targets, big-endian.
    pub call: Vec<u8>,
    /// JMP/Jcc targets, big-endian.
    pub jump: Vec<u8>,
    /// Range-coded selector bits.
    pub selector: Vec<u8>,
}

/// BCJ2 fixture encoder constants, mirroring the decoder's range-coder
/// parameters.
mod bcj2 {
    pub const NUM_CONTEXTS: usize = 258;
    pub const JMP_CONTEXT: usize = 256;
    pub const JCC_CONTEXT: usize = 257;
    pub const MODEL_TOTAL_BITS: u32 = 11;
    pub const MODEL_TOTAL: u32 = 1 << MODEL_TOTAL_BITS;
    pub const MOVE_BITS: u32 = 5;
    pub const TOP_VALUE: u32 = 1 << 24;

    pub fn is_marker(prev: u8, curr: u8) -> bool {
        (curr & 0xFE) == 0xE8 || (prev == 0x0F && (curr & 0xF0) == 0x80)
    }

    pub fn context_index(prev: u8, curr: u8) -> usize {
        match curr {
            0xE8 => prev as usize,
            0xE9 => JMP_CONTEXT,
            _ => JCC_CONTEXT,
        }
    }

    /// Binary range encoder, the inverse of the crate's selector decoder.
    pub struct RangeEncoder {
        range: u32,
        low: u64,
        cache: u8,
        cache_size: u64,
        output: Vec<u8>,
    }

    impl RangeEncoder {
        pub fn new() -> Self {
            Self {
                range: u32::MAX,
                low: 0,
                cache: 0,
                cache_size: 1,
                output: Vec::new(),
            }
        }

        pub fn encode_bit(&mut self, bit: bool, prob: &mut u32) {
            let bound = (self.range >> MODEL_TOTAL_BITS) * *prob;
            if bit {
                self.low += bound as u64;
                self.range -= bound;
                *prob -= *prob >> MOVE_BITS;
            } else {
                self.range = bound;
                *prob += (MODEL_TOTAL - *prob) >> MOVE_BITS;
            }
            while self.range < TOP_VALUE {
                self.shift_low();
                self.range <<= 8;
            }
        }

        fn shift_low(&mut self) {
            let carry = (self.low >> 32) as u8;
            if self.low < 0xFF00_0000 || carry == 1 {
                self.output.push(self.cache.wrapping_add(carry));
                for _ in 1..self.cache_size {
                    self.output.push(0xFFu8.wrapping_add(carry));
                }
                self.cache = (self.low >> 24) as u8;
                self.cache_size = 0;
            }
            self.cache_size += 1;
            self.low = (self.low as u32 as u64) << 8;
        }

        pub fn finish(mut self) -> Vec<u8> {
            for _ in 0..5 {
                self.shift_low();
            }
            self.output
        }
    }
}

/// Splits a byte stream into the four BCJ2 streams, converting every
/// branch target to its absolute big-endian form.
///
/// Markers too close to the end to carry a full target still consume a
/// selector bit (always zero), mirroring what the decoder consumes.
pub fn bcj2_encode(data: &[u8]) -> Bcj2Streams {
    let mut main = Vec::with_capacity(data.len());
    let mut call = Vec::new();
    let mut jump = Vec::new();
    let mut encoder = bcj2::RangeEncoder::new();
    let mut probs = [bcj2::MODEL_TOTAL / 2; bcj2::NUM_CONTEXTS];

    let mut prev_byte = 0u8;
    let mut i = 0usize;
    while i < data.len() {
        let b = data[i];
        main.push(b);

        if !bcj2::is_marker(prev_byte, b) {
            prev_byte = b;
            i += 1;
            continue;
        }

        let ctx = bcj2::context_index(prev_byte, b);
        let convert = i + 5 <= data.len();
        encoder.encode_bit(convert, &mut probs[ctx]);

        if !convert {
            prev_byte = b;
            i += 1;
            continue;
        }

        let relative = u32::from_le_bytes(data[i + 1..i + 5].try_into().unwrap());
        let absolute = relative.wrapping_add((i as u32).wrapping_add(5));
        let target = absolute.to_be_bytes();
        if b == 0xE8 {
            call.extend_from_slice(&target);
        } else {
            jump.extend_from_slice(&target);
        }

        prev_byte = data[i + 4];
        i += 5;
    }

    Bcj2Streams {
        main,
        call,
        jump,
        selector: encoder.finish(),
    }
}

/// A coder inside a folder fixture.
pub struct CoderSpec {
    pub method_id: Vec<u8>,
    pub num_in: u64,
    pub num_out: u64,
    pub properties: Option<Vec<u8>>,
}

impl CoderSpec {
    pub fn simple(method_id: &[u8]) -> Self {
        Self {
            method_id: method_id.to_vec(),
            num_in: 1,
            num_out: 1,
            properties: None,
        }
    }

    pub fn with_properties(method_id: &[u8], properties: &[u8]) -> Self {
        Self {
            properties: Some(properties.to_vec()),
            ..Self::simple(method_id)
        }
    }
}

/// One file materialised from a folder.
pub struct FileSpec {
    pub name: String,
    pub size: u64,
    pub crc: Option<u32>,
    pub attributes: Option<u32>,
}

impl FileSpec {
    /// A file whose CRC is computed from its plaintext.
    pub fn plain(name: &str, content: &[u8]) -> Self {
        Self {
            name: name.into(),
            size: content.len() as u64,
            crc: Some(crc32fast::hash(content)),
            attributes: None,
        }
    }
}

/// A streamless entry (directory, empty file, or anti-file).
pub struct EmptySpec {
    pub name: String,
    pub is_dir: bool,
    pub is_anti: bool,
    pub attributes: Option<u32>,
}

impl EmptySpec {
    pub fn dir(name: &str) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            is_anti: false,
            attributes: None,
        }
    }

    pub fn empty_file(name: &str) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            is_anti: false,
            attributes: None,
        }
    }

    pub fn anti(name: &str) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            is_anti: true,
            attributes: None,
        }
    }
}

/// A folder fixture: coder graph, pack bytes, and materialised files.
pub struct FolderSpec {
    pub coders: Vec<CoderSpec>,
    /// `(in_index, out_index)` pairs.
    pub bind_pairs: Vec<(u64, u64)>,
    /// Explicit packed-stream indices; `None` emits the implicit
    /// single-stream form.
    pub packed_indices: Option<Vec<u64>>,
    /// Raw pack bytes, one per packed stream.
    pub pack_streams: Vec<Vec<u8>>,
    /// Output size of every coder output stream.
    pub unpack_sizes: Vec<u64>,
    /// Folder-level output CRC.
    pub crc: Option<u32>,
    /// Files carved from the folder output, in order.
    pub files: Vec<FileSpec>,
}

impl FolderSpec {
    /// A single-coder Copy folder holding one file.
    pub fn copy_file(name: &str, content: &[u8]) -> Self {
        Self {
            coders: vec![CoderSpec::simple(method::COPY)],
            bind_pairs: vec![],
            packed_indices: None,
            pack_streams: vec![content.to_vec()],
            unpack_sizes: vec![content.len() as u64],
            crc: None,
            files: vec![FileSpec::plain(name, content)],
        }
    }

    /// A single-coder Copy folder holding several files back to back.
    pub fn copy_solid(files: &[(&str, &[u8])]) -> Self {
        let mut blob = Vec::new();
        let mut specs = Vec::new();
        for (name, content) in files {
            blob.extend_from_slice(content);
            specs.push(FileSpec::plain(name, content));
        }
        Self {
            coders: vec![CoderSpec::simple(method::COPY)],
            bind_pairs: vec![],
            packed_indices: None,
            unpack_sizes: vec![blob.len() as u64],
            pack_streams: vec![blob],
            crc: None,
            files: specs,
        }
    }
}

fn write_folder_definition(buf: &mut Vec<u8>, folder: &FolderSpec) {
    write_number(buf, folder.coders.len() as u64);
    for coder in &folder.coders {
        let is_complex = coder.num_in != 1 || coder.num_out != 1;
        let mut flags = coder.method_id.len() as u8;
        if is_complex {
            flags |= 0x10;
        }
        if coder.properties.is_some() {
            flags |= 0x20;
        }
        buf.push(flags);
        buf.extend_from_slice(&coder.method_id);
        if is_complex {
            write_number(buf, coder.num_in);
            write_number(buf, coder.num_out);
        }
        if let Some(props) = &coder.properties {
            write_number(buf, props.len() as u64);
            buf.extend_from_slice(props);
        }
    }
    for &(in_index, out_index) in &folder.bind_pairs {
        write_number(buf, in_index);
        write_number(buf, out_index);
    }
    if let Some(indices) = &folder.packed_indices {
        for &idx in indices {
            write_number(buf, idx);
        }
    }
}

/// Builds the pack area and the plain `kHeader` metadata block.
pub fn build_metadata(folders: &[FolderSpec], empties: &[EmptySpec]) -> (Vec<u8>, Vec<u8>) {
    build_metadata_with_pack_pos(folders, empties, 0)
}

/// Like [`build_metadata`], but declaring the pack area at `pack_pos`
/// bytes past the signature header (the caller provides the leading
/// filler in the body).
pub fn build_metadata_with_pack_pos(
    folders: &[FolderSpec],
    empties: &[EmptySpec],
    pack_pos: u64,
) -> (Vec<u8>, Vec<u8>) {
    let mut pack_area = Vec::new();
    let mut pack_sizes = Vec::new();
    for folder in folders {
        for stream in &folder.pack_streams {
            pack_sizes.push(stream.len() as u64);
            pack_area.extend_from_slice(stream);
        }
    }

    let mut meta = Vec::new();
    meta.push(prop::HEADER);

    meta.push(prop::MAIN_STREAMS_INFO);

    // PackInfo
    meta.push(prop::PACK_INFO);
    write_number(&mut meta, pack_pos);
    write_number(&mut meta, pack_sizes.len() as u64);
    meta.push(prop::SIZE);
    for &size in &pack_sizes {
        write_number(&mut meta, size);
    }
    meta.push(prop::END);

    // UnpackInfo
    meta.push(prop::UNPACK_INFO);
    meta.push(prop::FOLDER);
    write_number(&mut meta, folders.len() as u64);
    meta.push(0x00); // inline
    for folder in folders {
        write_folder_definition(&mut meta, folder);
    }
    meta.push(prop::CODERS_UNPACK_SIZE);
    for folder in folders {
        for &size in &folder.unpack_sizes {
            write_number(&mut meta, size);
        }
    }
    if folders.iter().any(|f| f.crc.is_some()) {
        meta.push(prop::CRC);
        meta.push(0x00);
        let defined: Vec<bool> = folders.iter().map(|f| f.crc.is_some()).collect();
        write_bits(&mut meta, &defined);
        for folder in folders {
            if let Some(crc) = folder.crc {
                meta.extend_from_slice(&crc.to_le_bytes());
            }
        }
    }
    meta.push(prop::END);

    // SubStreamsInfo
    meta.push(prop::SUBSTREAMS_INFO);
    if folders.iter().any(|f| f.files.len() != 1) {
        meta.push(prop::NUM_UNPACK_STREAM);
        for folder in folders {
            write_number(&mut meta, folder.files.len() as u64);
        }
    }
    if folders.iter().any(|f| f.files.len() > 1) {
        meta.push(prop::SIZE);
        for folder in folders {
            for file in &folder.files[..folder.files.len().saturating_sub(1)] {
                write_number(&mut meta, file.size);
            }
        }
    }
    // Digests for every file not inheriting its folder CRC.
    let needing: Vec<&FileSpec> = folders
        .iter()
        .filter(|f| f.crc.is_none() || f.files.len() != 1)
        .flat_map(|f| f.files.iter())
        .collect();
    if needing.iter().any(|f| f.crc.is_some()) {
        meta.push(prop::CRC);
        if needing.iter().all(|f| f.crc.is_some()) {
            meta.push(0x01);
        } else {
            meta.push(0x00);
            let defined: Vec<bool> = needing.iter().map(|f| f.crc.is_some()).collect();
            write_bits(&mut meta, &defined);
        }
        for file in &needing {
            if let Some(crc) = file.crc {
                meta.extend_from_slice(&crc.to_le_bytes());
            }
        }
    }
    meta.push(prop::END);

    meta.push(prop::END); // end of MainStreamsInfo

    // FilesInfo: stream files (folder order) followed by streamless
    // entries.
    let stream_files: Vec<&FileSpec> = folders.iter().flat_map(|f| f.files.iter()).collect();
    let total = stream_files.len() + empties.len();

    meta.push(prop::FILES_INFO);
    write_number(&mut meta, total as u64);

    if !empties.is_empty() {
        let mut bits = vec![false; stream_files.len()];
        bits.extend(std::iter::repeat_n(true, empties.len()));
        let mut payload = Vec::new();
        write_bits(&mut payload, &bits);
        meta.push(prop::EMPTY_STREAM);
        write_number(&mut meta, payload.len() as u64);
        meta.extend_from_slice(&payload);

        if empties.iter().any(|e| !e.is_dir) {
            let bits: Vec<bool> = empties.iter().map(|e| !e.is_dir).collect();
            let mut payload = Vec::new();
            write_bits(&mut payload, &bits);
            meta.push(prop::EMPTY_FILE);
            write_number(&mut meta, payload.len() as u64);
            meta.extend_from_slice(&payload);
        }

        if empties.iter().any(|e| e.is_anti) {
            let bits: Vec<bool> = empties.iter().map(|e| e.is_anti).collect();
            let mut payload = Vec::new();
            write_bits(&mut payload, &bits);
            meta.push(prop::ANTI);
            write_number(&mut meta, payload.len() as u64);
            meta.extend_from_slice(&payload);
        }
    }

    let mut names = vec![0x00u8]; // not external
    for file in &stream_files {
        write_utf16(&mut names, &file.name);
    }
    for empty in empties {
        write_utf16(&mut names, &empty.name);
    }
    meta.push(prop::NAME);
    write_number(&mut meta, names.len() as u64);
    meta.extend_from_slice(&names);

    let attrs: Vec<Option<u32>> = stream_files
        .iter()
        .map(|f| f.attributes)
        .chain(empties.iter().map(|e| e.attributes))
        .collect();
    if attrs.iter().any(Option::is_some) {
        let mut payload = Vec::new();
        let defined: Vec<bool> = attrs.iter().map(Option::is_some).collect();
        payload.push(0x00);
        write_bits(&mut payload, &defined);
        payload.push(0x00); // not external
        for attr in attrs.iter().flatten() {
            payload.extend_from_slice(&attr.to_le_bytes());
        }
        meta.push(prop::WIN_ATTRIBUTES);
        write_number(&mut meta, payload.len() as u64);
        meta.extend_from_slice(&payload);
    }

    meta.push(prop::END); // end of FilesInfo
    meta.push(prop::END); // end of header

    (pack_area, meta)
}

/// Assembles a complete archive from a pack area and a metadata block.
pub fn assemble(pack_area: &[u8], metadata: &[u8]) -> Vec<u8> {
    let mut archive = Vec::new();
    archive.extend_from_slice(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]);
    archive.push(0x00); // major
    archive.push(0x04); // minor

    let mut tail = Vec::new();
    tail.extend_from_slice(&(pack_area.len() as u64).to_le_bytes());
    tail.extend_from_slice(&(metadata.len() as u64).to_le_bytes());
    tail.extend_from_slice(&crc32fast::hash(metadata).to_le_bytes());

    archive.extend_from_slice(&crc32fast::hash(&tail).to_le_bytes());
    archive.extend_from_slice(&tail);
    archive.extend_from_slice(pack_area);
    archive.extend_from_slice(metadata);
    archive
}

/// Builds a complete plain-header archive.
pub fn build_archive(folders: &[FolderSpec], empties: &[EmptySpec]) -> Vec<u8> {
    let (pack_area, metadata) = build_metadata(folders, empties);
    assemble(&pack_area, &metadata)
}

/// Wraps a plain metadata block in a `kEncodedHeader` stored with the
/// Copy codec, placing the payload after `pack_area` in the body.
pub fn wrap_header_copy(pack_area: Vec<u8>, metadata: &[u8]) -> Vec<u8> {
    let mut body = pack_area;
    let payload_pos = body.len() as u64;
    body.extend_from_slice(metadata);

    let mut enc = Vec::new();
    enc.push(prop::ENCODED_HEADER);
    enc.push(prop::PACK_INFO);
    write_number(&mut enc, payload_pos);
    write_number(&mut enc, 1);
    enc.push(prop::SIZE);
    write_number(&mut enc, metadata.len() as u64);
    enc.push(prop::END);
    enc.push(prop::UNPACK_INFO);
    enc.push(prop::FOLDER);
    write_number(&mut enc, 1);
    enc.push(0x00);
    enc.push(0x01); // 1-byte method id, simple, no props
    enc.push(0x00); // Copy
    enc.push(prop::CODERS_UNPACK_SIZE);
    write_number(&mut enc, metadata.len() as u64);
    enc.push(prop::CRC);
    enc.push(0x01);
    enc.extend_from_slice(&crc32fast::hash(metadata).to_le_bytes());
    enc.push(prop::END);
    enc.push(prop::END);

    assemble(&body, &enc)
}
