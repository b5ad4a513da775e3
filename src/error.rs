//! Error types for cryptmirror
//!
//! Every failure that reaches the FUSE layer is converted to a POSIX errno
//! with [`Error::to_errno`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cryptmirror
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying storage failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage failure reported through nix
    #[error("System error: {0}")]
    Nix(#[from] nix::errno::Errno),

    /// The content transform did not complete
    #[error("Transform failed: {0}")]
    Transform(String),

    /// The encryption marker could not be attached to a new file
    #[error("Failed to set encryption marker on {path:?}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Inode number unknown to the inode table
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration loaded but rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to the errno replied to the kernel
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Nix(errno) => *errno as i32,
            Error::Transform(_) => libc::EIO,
            Error::Marker { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Error::InvalidInode(_) => libc::ENOENT,
            Error::Config(_) | Error::InvalidConfig(_) => libc::EINVAL,
            Error::Internal(_) => libc::EIO,
        }
    }
}
