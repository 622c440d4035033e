//! BCJ2: the four-stream x86 branch filter.
//!
//! BCJ2 splits x86 code into four streams:
//!
//! - *main*: code bytes with branch opcodes left in place
//! - *call*: absolute CALL (`E8`) targets, big-endian
//! - *jump*: absolute JMP (`E9`) and Jcc (`0F 8x`) targets, big-endian
//! - *range coder*: one arithmetically-coded bit per marker saying whether
//!   that marker's target was moved out
//!
//! The decoder walks the main stream; at every marker position it asks the
//! range decoder (context-modelled on the marker kind and previous byte)
//! whether to splice in a target. A spliced target is converted from the
//! absolute big-endian form back to the little-endian relative form
//! `absolute - (instruction_end)`.
//!
//! Because every output byte can depend on targets interleaved from two
//! other streams under range-coder control, BCJ2 cannot run as a linear
//! pipeline stage; the folder engine drives it over fully-buffered inputs.

use std::io::{self, BufReader, Read};

use crate::{Error, Result};

/// Number of adaptive probability slots: 256 previous-byte contexts for
/// CALL, one for JMP, one for Jcc.
const NUM_CONTEXTS: usize = 258;

const JMP_CONTEXT: usize = 256;
const JCC_CONTEXT: usize = 257;

/// Probability model width in bits.
const MODEL_TOTAL_BITS: u32 = 11;
const MODEL_TOTAL: u32 = 1 << MODEL_TOTAL_BITS;
/// Adaptation shift.
const MOVE_BITS: u32 = 5;
/// Renormalisation threshold.
const TOP_VALUE: u32 = 1 << 24;

/// Returns `true` if `curr` at this position is a branch marker.
#[inline]
fn is_marker(prev: u8, curr: u8) -> bool {
    (curr & 0xFE) == 0xE8 || is_jcc(prev, curr)
}

/// Returns `true` for the two-byte Jcc form `0F 8x`.
#[inline]
fn is_jcc(prev: u8, curr: u8) -> bool {
    prev == 0x0F && (curr & 0xF0) == 0x80
}

/// Probability-slot index for a marker.
#[inline]
fn context_index(prev: u8, curr: u8) -> usize {
    match curr {
        0xE8 => prev as usize,
        0xE9 => JMP_CONTEXT,
        _ => JCC_CONTEXT,
    }
}

/// Binary range decoder over the selector stream.
#[derive(Debug)]
pub struct RangeDecoder<R> {
    reader: R,
    range: u32,
    code: u32,
}

impl<R: Read> RangeDecoder<R> {
    /// Initialises the decoder, consuming the five priming bytes.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut code = 0u32;
        for _ in 0..5 {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte).map_err(|_| {
                Error::DecompressionFailed("BCJ2 selector stream shorter than 5 bytes".into())
            })?;
            code = (code << 8) | byte[0] as u32;
        }
        Ok(Self {
            reader,
            range: u32::MAX,
            code,
        })
    }

    /// Decodes one bit against the adaptive probability in `prob`,
    /// updating it in place.
    fn decode_bit(&mut self, prob: &mut u32) -> io::Result<bool> {
        let bound = (self.range >> MODEL_TOTAL_BITS) * *prob;

        let bit = if self.code < bound {
            self.range = bound;
            *prob += (MODEL_TOTAL - *prob) >> MOVE_BITS;
            false
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            true
        };

        if self.range < TOP_VALUE {
            // Past the end of the selector stream the finale is all-zero
            // padding.
            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(e),
            }
            self.code = (self.code << 8) | byte[0] as u32;
            self.range <<= 8;
        }

        Ok(bit)
    }
}

/// Merges the four BCJ2 streams back into the original byte stream.
pub struct Bcj2Decoder<R> {
    main: BufReader<R>,
    call: R,
    jump: R,
    selector: RangeDecoder<R>,
    probs: [u32; NUM_CONTEXTS],
    prev_byte: u8,
    /// Output position, used for relative-address reconstruction.
    position: u32,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl<R: Read> Bcj2Decoder<R> {
    /// Creates a decoder over the four input streams.
    pub fn new(main: R, call: R, jump: R, selector: R) -> Result<Self> {
        Ok(Self {
            main: BufReader::new(main),
            call,
            jump,
            selector: RangeDecoder::new(selector)?,
            probs: [MODEL_TOTAL / 2; NUM_CONTEXTS],
            prev_byte: 0,
            position: 0,
            buffer: Vec::with_capacity(64 * 1024),
            buffer_pos: 0,
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.buffer_pos = 0;

        while self.buffer.len() < 32 * 1024 {
            let mut byte = [0u8; 1];
            if self.main.read(&mut byte)? == 0 {
                return Ok(());
            }
            let b = byte[0];

            self.buffer.push(b);
            self.position = self.position.wrapping_add(1);

            if !is_marker(self.prev_byte, b) {
                self.prev_byte = b;
                continue;
            }

            let ctx = context_index(self.prev_byte, b);
            let mut prob = self.probs[ctx];
            let spliced = self.selector.decode_bit(&mut prob)?;
            self.probs[ctx] = prob;

            if !spliced {
                self.prev_byte = b;
                continue;
            }

            // Pull the absolute target from the call or jump stream and
            // rewrite it relative to the end of the instruction.
            let stream: &mut dyn Read = if b == 0xE8 {
                &mut self.call
            } else {
                &mut self.jump
            };
            let mut target = [0u8; 4];
            stream.read_exact(&mut target).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    Error::DecompressionFailed("BCJ2 target stream exhausted".into()).into_io()
                } else {
                    e
                }
            })?;

            let absolute = u32::from_be_bytes(target);
            let relative = absolute.wrapping_sub(self.position.wrapping_add(4));
            self.buffer.extend_from_slice(&relative.to_le_bytes());
            self.position = self.position.wrapping_add(4);
            self.prev_byte = (relative >> 24) as u8;
        }

        Ok(())
    }
}

impl<R: Read> Read for Bcj2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer_pos >= self.buffer.len() {
            self.refill()?;
            if self.buffer.is_empty() {
                return Ok(0);
            }
        }

        let available = &self.buffer[self.buffer_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.buffer_pos += n;
        Ok(n)
    }
}
