//! Encryption marker store
//!
//! Whether a file's stored bytes are ciphertext is recorded out of band in a
//! `user.*` extended attribute on the real file, so no header bytes are
//! reserved inside the content and empty files carry the marker too.

use super::xattr::{self, SetMode};
use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::Path;
use tracing::warn;

/// Attribute holding the encryption state
pub const MARKER_ATTR: &str = "user.cryptmirror.encrypted";

/// Stored state of a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    Plaintext,
    Ciphertext,
}

impl EncryptionState {
    /// Attribute value written for this state
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            EncryptionState::Plaintext => b"false",
            EncryptionState::Ciphertext => b"true",
        }
    }

    /// Interpret a stored attribute value
    ///
    /// Only an explicit `false` means plaintext; any other present value
    /// marks the content as ciphertext.
    pub fn from_value(value: &[u8]) -> Self {
        if value == EncryptionState::Plaintext.as_bytes() {
            EncryptionState::Plaintext
        } else {
            EncryptionState::Ciphertext
        }
    }
}

/// Reads and writes the encryption marker
#[derive(Debug, Clone, Copy)]
pub struct MarkerStore {
    attr: &'static str,
}

impl Default for MarkerStore {
    fn default() -> Self {
        Self::with_attr(MARKER_ATTR)
    }
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the marker under a different attribute name
    pub fn with_attr(attr: &'static str) -> Self {
        MarkerStore { attr }
    }

    /// Attribute name holding the marker
    pub fn attr(&self) -> &'static str {
        self.attr
    }

    /// Get the encryption state of a real file
    ///
    /// Lookup failures of any kind read as plaintext.
    pub fn state(&self, path: &Path) -> EncryptionState {
        match xattr::get(path, OsStr::new(self.attr)) {
            Ok(value) => EncryptionState::from_value(&value),
            Err(e) => {
                match e.raw_os_error() {
                    Some(libc::ENODATA) | Some(libc::ENOENT) | Some(libc::ENOTSUP) => {}
                    _ => warn!("Marker lookup on {:?} failed, treating as plaintext: {}", path, e),
                }
                EncryptionState::Plaintext
            }
        }
    }

    /// Check if the file's content is ciphertext
    pub fn is_marked(&self, path: &Path) -> bool {
        self.state(path) == EncryptionState::Ciphertext
    }

    /// Mark a freshly created file as ciphertext
    ///
    /// Create-only: an existing marker fails with `EEXIST`.
    pub fn set_marked(&self, path: &Path) -> Result<()> {
        xattr::set(
            path,
            OsStr::new(self.attr),
            EncryptionState::Ciphertext.as_bytes(),
            SetMode::Create,
        )
        .map_err(|source| Error::Marker {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_state_values() {
        assert_eq!(EncryptionState::from_value(b"true"), EncryptionState::Ciphertext);
        assert_eq!(EncryptionState::from_value(b"false"), EncryptionState::Plaintext);
        assert_eq!(EncryptionState::from_value(b""), EncryptionState::Ciphertext);
        assert_eq!(EncryptionState::from_value(b"1"), EncryptionState::Ciphertext);
    }

    #[test]
    fn test_unmarked_file_is_plaintext() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"hello").unwrap();

        let store = MarkerStore::new();
        assert_eq!(store.state(&file), EncryptionState::Plaintext);
        assert!(!store.is_marked(&file));
    }

    #[test]
    fn test_missing_file_is_plaintext() {
        let dir = tempdir().unwrap();
        assert!(!MarkerStore::new().is_marked(&dir.path().join("missing")));
    }

    #[test]
    fn test_set_marked() {
        let dir = tempdir().unwrap();
        if !xattr::supported(dir.path()) {
            return;
        }
        let file = dir.path().join("secret");
        fs::write(&file, b"").unwrap();

        let store = MarkerStore::new();
        store.set_marked(&file).unwrap();
        assert!(store.is_marked(&file));
        assert!(store.is_marked(&file));
    }

    #[test]
    fn test_set_marked_twice_fails() {
        let dir = tempdir().unwrap();
        if !xattr::supported(dir.path()) {
            return;
        }
        let file = dir.path().join("secret");
        fs::write(&file, b"").unwrap();

        let store = MarkerStore::new();
        store.set_marked(&file).unwrap();
        let err = store.set_marked(&file).unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_explicit_plaintext_marker() {
        let dir = tempdir().unwrap();
        if !xattr::supported(dir.path()) {
            return;
        }
        let file = dir.path().join("f");
        fs::write(&file, b"").unwrap();
        xattr::set(&file, OsStr::new(MARKER_ATTR), b"false", SetMode::Any).unwrap();

        assert_eq!(MarkerStore::new().state(&file), EncryptionState::Plaintext);
    }
}
