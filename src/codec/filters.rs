//! Delta and BCJ branch filters, backed by `lzma-rust2`.
//!
//! Branch filters undo an architecture-specific absolute-to-relative
//! rewrite of call/jump targets that the encoder applied to make
//! executable code compress better. All of them are streamable: each
//! buffers at most one instruction slot across chunk boundaries.

use std::io::{self, Read};

use lzma_rust2::filter::bcj::BcjReader;
use lzma_rust2::filter::delta::DeltaReader;

/// Delta filter decoder.
///
/// The single property byte stores `distance - 1`; output byte `i` is
/// `input[i] + output[i - distance]` modulo 256 with an implicit zero
/// pre-history.
pub struct DeltaDecoder<R> {
    inner: DeltaReader<R>,
}

impl<R> std::fmt::Debug for DeltaDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaDecoder").finish_non_exhaustive()
    }
}

impl<R: Read> DeltaDecoder<R> {
    /// Creates a delta decoder from the coder properties blob.
    pub fn new(input: R, properties: &[u8]) -> Self {
        let distance = properties.first().map(|&b| b as usize + 1).unwrap_or(1);
        Self {
            inner: DeltaReader::new(input, distance),
        }
    }
}

impl<R: Read> Read for DeltaDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Target architecture of a BCJ branch filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcjArch {
    /// x86 / x86-64 (E8/E9 rewriting with a sliding false-positive mask).
    X86,
    /// ARM (32-bit, BL opcode `0xEB`).
    Arm,
    /// ARM Thumb (16-bit BL pairs).
    ArmThumb,
    /// AArch64.
    Arm64,
    /// PowerPC.
    Ppc,
    /// SPARC.
    Sparc,
    /// IA-64 / Itanium.
    Ia64,
}

/// A BCJ branch-filter decoder for any supported architecture.
pub struct BcjDecoder<R> {
    inner: BcjReader<R>,
}

impl<R> std::fmt::Debug for BcjDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BcjDecoder").finish_non_exhaustive()
    }
}

impl<R: Read> BcjDecoder<R> {
    /// Creates a decoder for the given architecture.
    ///
    /// 7z always filters from stream position zero, so no start offset is
    /// taken.
    pub fn new(input: R, arch: BcjArch) -> Self {
        let inner = match arch {
            BcjArch::X86 => BcjReader::new_x86(input, 0),
            BcjArch::Arm => BcjReader::new_arm(input, 0),
            BcjArch::ArmThumb => BcjReader::new_arm_thumb(input, 0),
            BcjArch::Arm64 => BcjReader::new_arm64(input, 0),
            BcjArch::Ppc => BcjReader::new_ppc(input, 0),
            BcjArch::Sparc => BcjReader::new_sparc(input, 0),
            BcjArch::Ia64 => BcjReader::new_ia64(input, 0),
        };
        Self { inner }
    }
}

impl<R: Read> Read for BcjDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
