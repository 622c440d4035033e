//! The folder decompression engine.
//!
//! Two paths:
//!
//! - *Linear fast path*: a folder whose coders form a simple chain runs as
//!   a streaming pipeline straight off the archive source.
//! - *Graph path*: folders with a BCJ2 coder (or any other non-linear
//!   tree) are decoded buffered. Non-BCJ2 coders are scheduled by
//!   repeated relaxation (a coder runs once all of its inputs are pack
//!   data or already-decoded outputs), then BCJ2's four inputs are
//!   resolved and merged.
//!
//! The engine also owns the folder cache: a folder's decoded output is
//! kept only while more than one of its files remains to be read, and is
//! evicted the moment its last file has been handed out.

use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::codec::{self, Codec};
use crate::format::SIGNATURE_HEADER_SIZE;
use crate::format::streams::{Coder, Folder};
use crate::{Error, Result};

use super::Archive;

impl Archive {
    pub(crate) fn folder(&self, folder_index: usize) -> Result<&Folder> {
        self.model
            .folders()
            .get(folder_index)
            .ok_or_else(|| Error::corrupt_header(0, format!("folder {folder_index} out of range")))
    }

    /// Global index of the first pack stream belonging to a folder.
    fn pack_base_index(&self, folder_index: usize) -> usize {
        self.model
            .folders()
            .iter()
            .take(folder_index)
            .map(|f| f.packed_streams.len())
            .sum()
    }

    /// Absolute offset of a pack stream, overflow-checked.
    fn pack_stream_offset(&self, pack_index: usize) -> Result<(u64, u64)> {
        let pack_info = self
            .model
            .pack_info
            .as_ref()
            .ok_or_else(|| Error::corrupt_header(0, "archive has no pack info"))?;

        let size = pack_info
            .pack_sizes
            .get(pack_index)
            .copied()
            .ok_or_else(|| {
                Error::corrupt_header(0, format!("pack stream {pack_index} out of range"))
            })?;

        let mut offset = SIGNATURE_HEADER_SIZE
            .checked_add(pack_info.pack_pos)
            .ok_or_else(|| Error::corrupt_header(0, "pack position overflows"))?;
        for &prior in &pack_info.pack_sizes[..pack_index] {
            offset = offset
                .checked_add(prior)
                .ok_or_else(|| Error::corrupt_header(0, "pack offsets overflow"))?;
        }

        Ok((offset, size))
    }

    /// Builds the streaming pipeline for a linear folder.
    ///
    /// The returned reader yields the folder's complete decoded output.
    pub(crate) fn stream_folder(&self, folder_index: usize) -> Result<Box<dyn Read + Send>> {
        let folder = self.folder(folder_index)?;
        let pack_base = self.pack_base_index(folder_index);
        let (offset, size) = self.pack_stream_offset(pack_base)?;

        log::debug!("streaming folder {folder_index}: {size} packed bytes at {offset:#x}");

        let packed = self.source.range_reader(offset, size);
        codec::build_linear_reader(packed, folder, self.password.as_ref())
    }

    /// Reads every pack stream of a folder into memory, in pack order.
    fn read_pack_streams(&self, folder_index: usize) -> Result<Vec<Vec<u8>>> {
        let folder = self.folder(folder_index)?;
        let pack_base = self.pack_base_index(folder_index);

        let mut streams = Vec::with_capacity(folder.packed_streams.len());
        for i in 0..folder.packed_streams.len() {
            let (offset, size) = self.pack_stream_offset(pack_base + i)?;
            let mut data = vec![0u8; size as usize];
            self.source.read_exact_at(offset, &mut data)?;
            streams.push(data);
        }
        Ok(streams)
    }

    /// Decodes a whole folder, consulting and maintaining the cache.
    ///
    /// The result is cached iff, counting the current request, more than
    /// one file of the folder remains to be read. Eviction happens in
    /// [`note_extraction`](Self::note_extraction) once every file has
    /// been handed out.
    pub(crate) fn decode_folder_cached(&mut self, folder_index: usize) -> Result<Arc<[u8]>> {
        if let Some(data) = self.folder_cache.get(&folder_index) {
            log::debug!("folder {folder_index}: cache hit");
            return Ok(data.clone());
        }

        let data: Arc<[u8]> = self.decode_folder(folder_index)?.into();

        let total = self.model.files_in_folder(folder_index);
        let done = self.extracted.get(&folder_index).copied().unwrap_or(0);
        if total.saturating_sub(done) > 1 {
            log::debug!(
                "folder {folder_index}: caching {} bytes for {} more readers",
                data.len(),
                total - done - 1
            );
            self.folder_cache.insert(folder_index, data.clone());
        }

        Ok(data)
    }

    /// Decodes a whole folder into memory.
    fn decode_folder(&self, folder_index: usize) -> Result<Vec<u8>> {
        let folder = self.folder(folder_index)?;
        let expected = folder.final_unpack_size()?;

        let data = if folder.is_linear() {
            let mut decoder = self.stream_folder(folder_index)?;
            let mut data = Vec::with_capacity(expected.min(1 << 24) as usize);
            decoder.read_to_end(&mut data).map_err(Error::from_io)?;
            data
        } else {
            let pack_streams = self.read_pack_streams(folder_index)?;
            self.decode_folder_graph(folder, pack_streams)?
        };

        if data.len() as u64 != expected {
            return Err(Error::DecompressionFailed(format!(
                "folder {folder_index} produced {} of {expected} bytes",
                data.len()
            )));
        }
        Ok(data)
    }

    /// Decodes a non-linear folder by scheduling its coder graph.
    fn decode_folder_graph(
        &self,
        folder: &Folder,
        mut pack_streams: Vec<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let offsets = folder.coder_stream_offsets();
        let n = folder.coders.len();

        let bcj2_index = folder
            .coders
            .iter()
            .position(|c| c.method_id.as_slice() == codec::method::BCJ2);

        for (idx, coder) in folder.coders.iter().enumerate() {
            if Some(idx) != bcj2_index && coder.num_in_streams != 1 {
                return Err(Error::UnsupportedFeature {
                    feature: "multi-input coders other than BCJ2",
                });
            }
        }

        // Repeated relaxation over the non-BCJ2 coders: a coder is ready
        // when its input is pack data or an already-decoded output. The
        // graph is a tree, so every output is consumed exactly once and
        // decoded buffers can be moved, not copied.
        let mut outputs: Vec<Option<Vec<u8>>> = vec![None; n];
        let mut done: Vec<bool> = (0..n).map(|i| Some(i) == bcj2_index).collect();

        loop {
            let mut progressed = false;

            for idx in 0..n {
                if done[idx] {
                    continue;
                }

                let in_stream = offsets[idx].0;
                let input: Option<Vec<u8>> =
                    if let Some(p) = folder.packed_stream_position(in_stream) {
                        if p >= pack_streams.len() {
                            return Err(Error::corrupt_header(
                                0,
                                "pack stream index out of range",
                            ));
                        }
                        Some(std::mem::take(&mut pack_streams[p]))
                    } else if let Some(bp) = folder.bind_pair_for_in_stream(in_stream) {
                        let (src, _) = folder.coder_for_out_stream(&offsets, bp.out_index)?;
                        if Some(src) == bcj2_index {
                            return Err(Error::UnsupportedFeature {
                                feature: "coders consuming BCJ2 output",
                            });
                        }
                        if done[src] { outputs[src].take() } else { None }
                    } else {
                        return Err(Error::corrupt_header(
                            0,
                            format!("coder input {in_stream} is unfed"),
                        ));
                    };

                if let Some(data) = input {
                    let out_size = folder
                        .unpack_sizes
                        .get(offsets[idx].1 as usize)
                        .copied()
                        .ok_or_else(|| {
                            Error::corrupt_header(0, "coder without an unpack size")
                        })?;
                    outputs[idx] = Some(self.decode_single(&folder.coders[idx], data, out_size)?);
                    done[idx] = true;
                    progressed = true;
                }
            }

            if done.iter().all(|&d| d) {
                break;
            }
            if !progressed {
                return Err(Error::corrupt_header(
                    0,
                    "coder graph has unresolvable inputs",
                ));
            }
        }

        let final_size = folder.final_unpack_size()?;

        match bcj2_index {
            Some(bcj2) => {
                // Resolve BCJ2's four inputs (main, call, jump, selector)
                // from decoded outputs or raw pack streams.
                let first_in = offsets[bcj2].0;
                let mut inputs: Vec<Vec<u8>> = Vec::with_capacity(4);
                for i in 0..4 {
                    let in_stream = first_in + i;
                    let data = if let Some(bp) = folder.bind_pair_for_in_stream(in_stream) {
                        let (src, _) = folder.coder_for_out_stream(&offsets, bp.out_index)?;
                        outputs[src].take().ok_or_else(|| {
                            Error::corrupt_header(0, format!("BCJ2 input {i} fed twice"))
                        })?
                    } else if let Some(p) = folder.packed_stream_position(in_stream) {
                        if p >= pack_streams.len() {
                            return Err(Error::corrupt_header(0, "pack stream out of range"));
                        }
                        std::mem::take(&mut pack_streams[p])
                    } else {
                        return Err(Error::corrupt_header(
                            0,
                            format!("BCJ2 input {i} is unfed"),
                        ));
                    };
                    inputs.push(data);
                }

                let selector = inputs.pop().unwrap();
                let jump = inputs.pop().unwrap();
                let call = inputs.pop().unwrap();
                let main = inputs.pop().unwrap();

                let decoder = codec::bcj2::Bcj2Decoder::new(
                    Cursor::new(main),
                    Cursor::new(call),
                    Cursor::new(jump),
                    Cursor::new(selector),
                )?;

                let mut data = Vec::with_capacity(final_size.min(1 << 24) as usize);
                decoder
                    .take(final_size)
                    .read_to_end(&mut data)
                    .map_err(Error::from_io)?;
                Ok(data)
            }
            None => {
                // A non-linear tree without BCJ2: the final coder's
                // output is the folder output.
                let (final_coder, _) =
                    folder.coder_for_out_stream(&offsets, folder.final_out_stream()?)?;
                outputs[final_coder].take().ok_or_else(|| {
                    Error::DecompressionFailed("final coder produced no output".into())
                })
            }
        }
    }

    /// Runs one single-input coder over a buffered input.
    fn decode_single(&self, coder: &Coder, input: Vec<u8>, out_size: u64) -> Result<Vec<u8>> {
        let kind = Codec::from_method_id(&coder.method_id)?;
        let reader = codec::build_reader(
            kind,
            Cursor::new(input),
            coder.properties(),
            out_size,
            self.password.as_ref(),
        )?;

        let mut out = Vec::with_capacity(out_size.min(1 << 24) as usize);
        reader
            .take(out_size)
            .read_to_end(&mut out)
            .map_err(Error::from_io)?;

        if out.len() as u64 != out_size {
            return Err(Error::DecompressionFailed(format!(
                "{} produced {} of {out_size} bytes",
                kind.name(),
                out.len()
            )));
        }
        Ok(out)
    }
}
