//! Archive-level summary information.

use crate::codec::Codec;
use crate::format::parser::HeaderModel;

use super::entry::Entry;

/// Summary of an opened archive.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct ArchiveInfo {
    /// Number of entries, including directories and anti-files.
    pub entry_count: usize,
    /// Total uncompressed size of all entries.
    pub total_size: u64,
    /// Total packed size of the archive body.
    pub packed_size: u64,
    /// Number of folders (decompression units).
    pub folder_count: usize,
    /// Whether any folder holds more than one file.
    pub is_solid: bool,
    /// Whether any entry is AES-encrypted.
    pub has_encrypted_entries: bool,
    /// Whether the metadata block itself was encrypted.
    pub header_encrypted: bool,
    /// Names of the codecs used by the archive's folders.
    pub codecs: Vec<&'static str>,
    /// Archive comment, when present.
    pub comment: Option<String>,
}

/// Builds the summary from the parsed model and entry list.
pub(crate) fn build_info(model: &HeaderModel, entries: &[Entry]) -> ArchiveInfo {
    let packed_size = model
        .pack_info
        .as_ref()
        .map(|pi| pi.pack_sizes.iter().sum())
        .unwrap_or(0);

    let is_solid = model
        .substreams_info
        .as_ref()
        .map(|ss| ss.streams_per_folder.iter().any(|&n| n > 1))
        .unwrap_or(false);

    let mut codecs: Vec<&'static str> = Vec::new();
    for folder in model.folders() {
        for coder in &folder.coders {
            let name = match Codec::from_method_id(&coder.method_id) {
                Ok(codec) => codec.name(),
                Err(_) => "unknown",
            };
            if !codecs.contains(&name) {
                codecs.push(name);
            }
        }
    }

    ArchiveInfo {
        entry_count: entries.len(),
        total_size: entries.iter().map(|e| e.size).sum(),
        packed_size,
        folder_count: model.folders().len(),
        is_solid,
        has_encrypted_entries: entries.iter().any(|e| e.is_encrypted),
        header_encrypted: model.header_encrypted,
        codecs,
        comment: model
            .files_info
            .as_ref()
            .and_then(|fi| fi.comment.clone()),
    }
}
