//! Mount context and path resolution

use crate::crypto::CipherKey;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Process-wide state shared by every operation
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MountContext {
    /// Real directory being mirrored
    root: PathBuf,
    /// Key handed to the content transform
    key: CipherKey,
}

impl MountContext {
    pub fn new(root: impl Into<PathBuf>, key: CipherKey) -> Self {
        Self {
            root: root.into(),
            key,
        }
    }

    /// Get the mirrored root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key(&self) -> &CipherKey {
        &self.key
    }

    /// Resolve a virtual path to its real on-disk path
    ///
    /// Plain concatenation of the root and `path`; `path` is expected to
    /// start with `/`. Nothing is normalized.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let mut real = OsString::with_capacity(
            self.root.as_os_str().len() + path.as_os_str().len(),
        );
        real.push(self.root.as_os_str());
        real.push(path.as_os_str());
        PathBuf::from(real)
    }
}
