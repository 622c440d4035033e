//! AES-256-CBC decryption for encrypted 7z content and headers.
//!
//! 7z derives the AES key from the password with an iterated SHA-256
//! scheme of its own and encrypts in CBC mode without padding (the coder's
//! declared output size trims the final block). The same construction is
//! used for encrypted folders and for encrypted metadata headers.

mod password;
mod properties;

pub use password::Password;
pub use properties::AesProperties;

use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use std::io::{self, Read};

use crate::{Error, Result};

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes.
const BLOCK_SIZE: usize = 16;

/// Maximum accepted key-derivation exponent (2^24 iterations).
///
/// The 7-Zip default is 19; values beyond this bound would stall the
/// process for minutes on a hostile archive. The sentinel `0x3F` is exempt
/// because it performs no hashing at all.
pub const MAX_CYCLES_POWER: u8 = 24;

/// The `num_cycles_power` sentinel selecting the unhashed key.
const PLAIN_KEY_SENTINEL: u8 = 0x3F;

/// Derives the 32-byte AES key for a password.
///
/// With `num_cycles_power == 0x3F` the key is `salt || password_utf16le`,
/// truncated or zero-padded to 32 bytes. Otherwise the key is the SHA-256
/// digest of `2^num_cycles_power` rounds of
/// `salt || password_utf16le || round_counter_u64_le`.
pub fn derive_key(password: &Password, salt: &[u8], num_cycles_power: u8) -> Result<[u8; 32]> {
    let password_bytes = password.as_utf16_le();

    if num_cycles_power == PLAIN_KEY_SENTINEL {
        let mut key = [0u8; 32];
        for (slot, byte) in key
            .iter_mut()
            .zip(salt.iter().chain(password_bytes.iter()))
        {
            *slot = *byte;
        }
        return Ok(key);
    }

    if num_cycles_power > MAX_CYCLES_POWER {
        return Err(Error::ResourceLimitExceeded(format!(
            "key derivation exponent {num_cycles_power} exceeds maximum {MAX_CYCLES_POWER}"
        )));
    }

    let mut sha = Sha256::new();
    for round in 0..1u64 << num_cycles_power {
        sha.update(salt);
        sha.update(&password_bytes[..]);
        sha.update(round.to_le_bytes());
    }
    Ok(sha.finalize().into())
}

/// Streaming AES-256-CBC decryptor.
///
/// Decrypts in block-aligned chunks; `setAutoPadding` semantics are off,
/// matching 7z (trailing padding is trimmed by the coder's declared
/// output size, not by PKCS#7).
pub struct Aes256Reader<R> {
    inner: R,
    key: [u8; 32],
    iv: [u8; 16],
    buffer: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R> std::fmt::Debug for Aes256Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256Reader").finish_non_exhaustive()
    }
}

impl<R: Read> Aes256Reader<R> {
    /// Creates a decryptor from the AES coder properties and a password.
    pub fn new(input: R, properties: &[u8], password: &Password) -> Result<Self> {
        let props = AesProperties::parse(properties)?;
        let key = derive_key(password, &props.salt, props.num_cycles_power)?;
        Ok(Self {
            inner: input,
            key,
            iv: props.iv,
            buffer: Vec::new(),
            pos: 0,
            finished: false,
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut encrypted = vec![0u8; 4096];
        let mut filled = 0;

        // Gather at least one whole block; CBC cannot decrypt a partial
        // one.
        while filled < encrypted.len() {
            let n = self.inner.read(&mut encrypted[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled % BLOCK_SIZE == 0 && filled >= BLOCK_SIZE {
                break;
            }
        }

        if filled == 0 {
            self.finished = true;
            return Ok(());
        }
        if filled % BLOCK_SIZE != 0 {
            return Err(Error::DecompressionFailed(format!(
                "encrypted stream not block-aligned ({filled} trailing bytes)"
            ))
            .into_io());
        }
        encrypted.truncate(filled);

        // CBC chains on the last ciphertext block.
        let next_iv: [u8; 16] = encrypted[filled - BLOCK_SIZE..].try_into().unwrap();

        let decryptor = Aes256CbcDec::new(&self.key.into(), &self.iv.into());
        let decrypted = decryptor
            .decrypt_padded_mut::<NoPadding>(&mut encrypted)
            .map_err(|e| Error::DecompressionFailed(format!("AES: {e}")).into_io())?;

        self.iv = next_iv;
        self.buffer = decrypted.to_vec();
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for Aes256Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buffer.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
            if self.pos >= self.buffer.len() {
                return Ok(0);
            }
        }

        let available = &self.buffer[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}
