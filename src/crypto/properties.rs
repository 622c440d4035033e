//! AES coder property parsing.

use crate::{Error, Result};

/// Parsed AES-256-CBC coder properties.
///
/// Layout:
/// - byte 0: `salt_flag << 7 | iv_flag << 6 | num_cycles_power`
/// - byte 1: `salt_size_extra << 4 | iv_size_extra` (present when either
///   flag is set)
/// - then `salt_size` salt bytes followed by `iv_size` IV bytes, where
///   each size is `flag + extra`, allowing 0..=16
#[derive(Debug, Clone)]
pub struct AesProperties {
    /// Key-derivation iteration exponent; `0x3F` selects the plain
    /// no-hash key.
    pub num_cycles_power: u8,
    /// Key-derivation salt (0..=16 bytes).
    pub salt: Vec<u8>,
    /// Initialisation vector, right-padded with zeros to 16 bytes.
    pub iv: [u8; 16],
}

impl AesProperties {
    /// Parses the coder properties blob.
    pub fn parse(properties: &[u8]) -> Result<Self> {
        let first = *properties
            .first()
            .ok_or_else(|| Error::corrupt_header(0, "empty AES properties"))?;

        let num_cycles_power = first & 0x3F;
        let salt_flag = (first >> 7) & 1;
        let iv_flag = (first >> 6) & 1;

        let (salt_size, iv_size, data_start) = if salt_flag == 0 && iv_flag == 0 {
            (0usize, 0usize, 1usize)
        } else {
            let second = *properties
                .get(1)
                .ok_or_else(|| Error::corrupt_header(0, "AES properties missing size byte"))?;
            (
                (salt_flag + (second >> 4)) as usize,
                (iv_flag + (second & 0x0F)) as usize,
                2usize,
            )
        };

        let needed = data_start + salt_size + iv_size;
        if properties.len() < needed {
            return Err(Error::corrupt_header(
                0,
                format!(
                    "AES properties need {needed} bytes, have {}",
                    properties.len()
                ),
            ));
        }

        let salt = properties[data_start..data_start + salt_size].to_vec();

        let mut iv = [0u8; 16];
        let iv_bytes = &properties[data_start + salt_size..needed];
        iv[..iv_bytes.len().min(16)].copy_from_slice(&iv_bytes[..iv_bytes.len().min(16)]);

        Ok(Self {
            num_cycles_power,
            salt,
            iv,
        })
    }
}
