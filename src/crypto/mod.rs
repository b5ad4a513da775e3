//! Content transform for cryptmirror
//!
//! The filesystem treats the cipher as an opaque stream primitive: one call
//! consumes a whole source stream and produces a whole destination stream in
//! a given [`Direction`] under a [`CipherKey`].

mod cipher;

pub use cipher::AesCtrTransform;

use crate::error::Result;
use std::fmt;
use std::io::{Read, Write};
use zeroize::Zeroizing;

/// Size of the AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the CTR initial counter block in bytes
pub const IV_SIZE: usize = 16;

/// Which way a transform invocation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
    /// Copy bytes unchanged
    Passthrough,
}

/// Opaque key material as supplied at startup
///
/// No length or format is imposed; only the transform interprets the bytes.
#[derive(Clone)]
pub struct CipherKey(Zeroizing<Vec<u8>>);

impl CipherKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        CipherKey(Zeroizing::new(bytes.into()))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<String> for CipherKey {
    fn from(s: String) -> Self {
        CipherKey::new(s.into_bytes())
    }
}

impl From<&str> for CipherKey {
    fn from(s: &str) -> Self {
        CipherKey::new(s.as_bytes())
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(<redacted>)")
    }
}

/// Keyed stream transform
///
/// Implementations read `source` to EOF and write the full result to
/// `destination` before returning. Returns the number of bytes written.
pub trait Transform: Send + Sync {
    fn apply(
        &self,
        source: &mut dyn Read,
        destination: &mut dyn Write,
        direction: Direction,
        key: &CipherKey,
    ) -> Result<u64>;
}
