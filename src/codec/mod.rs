//! Codec registry and decoder construction.
//!
//! The registry maps 7z method IDs (byte strings of one to four bytes) to
//! [`Codec`] values carrying a name, a streamability verdict, and a
//! decoder constructor. Linear folders are decoded by chaining
//! constructors; BCJ2 is a tagged special case with four inputs and is
//! driven by the folder engine instead.

pub mod bcj2;
pub mod bzip2;
mod copy;
pub mod deflate;
pub mod filters;
pub mod lzma;

use std::io::Read;

use crate::crypto::Password;
use crate::format::streams::Folder;
use crate::{Error, Result};

pub use copy::CopyReader;

/// Known 7z method IDs.
pub mod method {
    /// Copy (stored).
    pub const COPY: &[u8] = &[0x00];
    /// Delta filter.
    pub const DELTA: &[u8] = &[0x03];
    /// LZMA.
    pub const LZMA: &[u8] = &[0x03, 0x01, 0x01];
    /// LZMA2.
    pub const LZMA2: &[u8] = &[0x21];
    /// BCJ x86 filter.
    pub const BCJ_X86: &[u8] = &[0x03, 0x03, 0x01, 0x03];
    /// BCJ ARM filter.
    pub const BCJ_ARM: &[u8] = &[0x03, 0x03, 0x05, 0x01];
    /// BCJ ARM Thumb filter.
    pub const BCJ_ARM_THUMB: &[u8] = &[0x03, 0x03, 0x07, 0x01];
    /// BCJ ARM64 filter.
    pub const BCJ_ARM64: &[u8] = &[0x03, 0x03, 0x0A, 0x01];
    /// BCJ PowerPC filter.
    pub const BCJ_PPC: &[u8] = &[0x03, 0x03, 0x02, 0x05];
    /// BCJ IA64 filter.
    pub const BCJ_IA64: &[u8] = &[0x03, 0x03, 0x04, 0x01];
    /// BCJ SPARC filter.
    pub const BCJ_SPARC: &[u8] = &[0x03, 0x03, 0x08, 0x05];
    /// BCJ2 four-stream x86 filter.
    pub const BCJ2: &[u8] = &[0x03, 0x03, 0x01, 0x1B];
    /// Raw deflate.
    pub const DEFLATE: &[u8] = &[0x04, 0x01, 0x08];
    /// BZip2.
    pub const BZIP2: &[u8] = &[0x04, 0x02, 0x02];
    /// AES-256-CBC.
    pub const AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];
    /// PPMd. Recognised for diagnostics, not supported.
    pub const PPMD: &[u8] = &[0x03, 0x04, 0x01];
}

/// A supported codec, resolved from a coder's method ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Codec {
    /// Stored data.
    Copy,
    /// Delta filter.
    Delta,
    /// LZMA.
    Lzma,
    /// LZMA2.
    Lzma2,
    /// BCJ branch filter for the given architecture.
    Bcj(filters::BcjArch),
    /// BCJ2 four-stream branch filter.
    Bcj2,
    /// Raw deflate.
    Deflate,
    /// BZip2.
    BZip2,
    /// AES-256-CBC decryption.
    Aes256,
}

impl Codec {
    /// Resolves a method ID.
    ///
    /// PPMd is recognised by name but unsupported; unknown IDs fail with
    /// their raw bytes.
    pub fn from_method_id(id: &[u8]) -> Result<Self> {
        use filters::BcjArch;
        match id {
            method::COPY => Ok(Self::Copy),
            method::DELTA => Ok(Self::Delta),
            method::LZMA => Ok(Self::Lzma),
            method::LZMA2 => Ok(Self::Lzma2),
            method::BCJ_X86 => Ok(Self::Bcj(BcjArch::X86)),
            method::BCJ_ARM => Ok(Self::Bcj(BcjArch::Arm)),
            method::BCJ_ARM_THUMB => Ok(Self::Bcj(BcjArch::ArmThumb)),
            method::BCJ_ARM64 => Ok(Self::Bcj(BcjArch::Arm64)),
            method::BCJ_PPC => Ok(Self::Bcj(BcjArch::Ppc)),
            method::BCJ_IA64 => Ok(Self::Bcj(BcjArch::Ia64)),
            method::BCJ_SPARC => Ok(Self::Bcj(BcjArch::Sparc)),
            method::BCJ2 => Ok(Self::Bcj2),
            method::DEFLATE => Ok(Self::Deflate),
            method::BZIP2 => Ok(Self::BZip2),
            method::AES => Ok(Self::Aes256),
            method::PPMD => Err(Error::unsupported_codec(id, Some("PPMd"))),
            other => Err(Error::unsupported_codec(other, None)),
        }
    }

    /// Human-readable codec name.
    pub fn name(self) -> &'static str {
        use filters::BcjArch;
        match self {
            Self::Copy => "Copy",
            Self::Delta => "Delta",
            Self::Lzma => "LZMA",
            Self::Lzma2 => "LZMA2",
            Self::Bcj(BcjArch::X86) => "BCJ (x86)",
            Self::Bcj(BcjArch::Arm) => "BCJ (ARM)",
            Self::Bcj(BcjArch::ArmThumb) => "BCJ (ARM Thumb)",
            Self::Bcj(BcjArch::Arm64) => "BCJ (ARM64)",
            Self::Bcj(BcjArch::Ppc) => "BCJ (PowerPC)",
            Self::Bcj(BcjArch::Sparc) => "BCJ (SPARC)",
            Self::Bcj(BcjArch::Ia64) => "BCJ (IA64)",
            Self::Bcj2 => "BCJ2",
            Self::Deflate => "Deflate",
            Self::BZip2 => "BZip2",
            Self::Aes256 => "AES-256",
        }
    }

    /// Whether the codec can run as a stage of a streaming pipeline.
    ///
    /// Everything here streams except BCJ2, which is multi-input and must
    /// see all of its streams.
    pub fn is_streamable(self) -> bool {
        !matches!(self, Self::Bcj2)
    }
}

/// Builds a single-input decoder stage.
///
/// `unpack_size` is the declared output size of this coder; codecs whose
/// streams do not self-terminate (Copy, LZMA) rely on it. BCJ2 is
/// rejected here because it is not a single-input stage.
pub(crate) fn build_reader<R: Read + Send + 'static>(
    codec: Codec,
    input: R,
    properties: &[u8],
    unpack_size: u64,
    password: Option<&Password>,
) -> Result<Box<dyn Read + Send>> {
    match codec {
        Codec::Copy => Ok(Box::new(CopyReader::new(input, unpack_size))),
        Codec::Delta => Ok(Box::new(filters::DeltaDecoder::new(input, properties))),
        Codec::Lzma => Ok(Box::new(lzma::LzmaReader::new(
            input,
            properties,
            unpack_size,
        )?)),
        Codec::Lzma2 => Ok(Box::new(lzma::Lzma2Reader::new(input, properties)?)),
        Codec::Bcj(arch) => Ok(Box::new(filters::BcjDecoder::new(input, arch))),
        Codec::Deflate => Ok(Box::new(deflate::DeflateReader::new(input))),
        Codec::BZip2 => Ok(Box::new(bzip2::Bzip2Reader::new(input))),
        Codec::Aes256 => {
            let password = password.ok_or(Error::PasswordRequired)?;
            Ok(Box::new(crate::crypto::Aes256Reader::new(
                input, properties, password,
            )?))
        }
        Codec::Bcj2 => Err(Error::corrupt_header(
            0,
            "BCJ2 coder in a single-input position",
        )),
    }
}

/// Builds the full decoder pipeline of a linear folder.
///
/// The chain runs from the coder fed by pack data to the coder producing
/// the final output; the result is additionally bounded to the folder's
/// final unpack size so codecs with trailing slack (AES block padding)
/// stop exactly on the declared length.
pub(crate) fn build_linear_reader<R: Read + Send + 'static>(
    input: R,
    folder: &Folder,
    password: Option<&Password>,
) -> Result<Box<dyn Read + Send>> {
    let chain = folder.ordered_chain()?;
    let final_size = folder.final_unpack_size()?;

    let mut reader: Box<dyn Read + Send> = Box::new(input);
    for &coder_idx in &chain {
        let coder = &folder.coders[coder_idx];
        let codec = Codec::from_method_id(&coder.method_id)?;
        // For 1-in/1-out coders the global output index equals the coder
        // index.
        let out_size = folder
            .unpack_sizes
            .get(coder_idx)
            .copied()
            .ok_or_else(|| Error::corrupt_header(0, "coder without an unpack size"))?;
        reader = build_reader(codec, reader, coder.properties(), out_size, password)?;
    }

    Ok(Box::new(reader.take(final_size)))
}

/// Whether a folder contains an AES coder.
pub(crate) fn folder_uses_aes(folder: &Folder) -> bool {
    folder
        .coders
        .iter()
        .any(|coder| coder.method_id.as_slice() == method::AES)
}

/// Whether every stage of a folder can stream.
///
/// True only for linear folders whose codecs are all supported and
/// streamable; BCJ2 folders and folders with unknown codecs take the
/// buffered path (where unknown codecs then fail with a precise error).
pub(crate) fn folder_is_streamable(folder: &Folder) -> bool {
    folder.is_linear()
        && folder.coders.iter().all(|coder| {
            Codec::from_method_id(&coder.method_id)
                .map(Codec::is_streamable)
                .unwrap_or(false)
        })
}
