//! Password handling for encrypted archives.

use zeroize::Zeroizing;

/// A password for archive decryption.
///
/// Stored zeroized-on-drop; converted to UTF-16LE on demand, which is the
/// encoding 7z key derivation consumes.
#[derive(Clone)]
pub struct Password {
    inner: Zeroizing<String>,
}

impl Password {
    /// Creates a password from a string.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            inner: Zeroizing::new(password.into()),
        }
    }

    /// Returns the password as UTF-16LE bytes.
    pub fn as_utf16_le(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            self.inner
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
        )
    }

    /// Returns `true` for the empty password.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
