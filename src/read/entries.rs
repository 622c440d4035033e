//! Entry list construction from the parsed header model.

use crate::codec;
use crate::format::parser::HeaderModel;

use super::entry::{Entry, is_symlink_attributes};

/// Builds the entry list, wiring each stream-carrying record to its
/// folder and position within that folder.
pub(crate) fn build_entries(model: &HeaderModel) -> Vec<Entry> {
    let Some(files_info) = &model.files_info else {
        return Vec::new();
    };

    let folders = model.folders();
    let folder_streamable: Vec<bool> = folders
        .iter()
        .map(codec::folder_is_streamable)
        .collect();
    let folder_encrypted: Vec<bool> = folders.iter().map(|f| codec::folder_uses_aes(f)).collect();

    let mut entries = Vec::with_capacity(files_info.records.len());
    let mut folder_idx = 0usize;
    let mut stream_in_folder = 0usize;

    for (index, record) in files_info.records.iter().enumerate() {
        let (folder_index, stream_index) = if record.has_stream {
            // Skip folders that materialise no files (metadata-only).
            while folder_idx < folders.len() && model.files_in_folder(folder_idx) == 0 {
                folder_idx += 1;
                stream_in_folder = 0;
            }

            let position = (folder_idx, stream_in_folder);

            stream_in_folder += 1;
            if stream_in_folder as u64 >= model.files_in_folder(folder_idx) {
                folder_idx += 1;
                stream_in_folder = 0;
            }

            (Some(position.0), Some(position.1))
        } else {
            (None, None)
        };

        let is_symlink = !record.is_directory
            && record.has_stream
            && is_symlink_attributes(record.attributes);

        entries.push(Entry {
            path: record.name.replace('\\', "/"),
            is_directory: record.is_directory,
            is_symlink,
            is_anti: record.is_anti,
            size: record.size,
            crc32: record.crc,
            modification_time: record.mtime,
            creation_time: record.ctime,
            access_time: record.atime,
            attributes: record.attributes,
            is_encrypted: folder_index
                .map(|f| folder_encrypted.get(f).copied().unwrap_or(false))
                .unwrap_or(false),
            streamable: folder_index
                .map(|f| folder_streamable.get(f).copied().unwrap_or(false))
                .unwrap_or(false),
            index,
            has_stream: record.has_stream,
            folder_index,
            stream_index,
        });
    }

    entries
}
