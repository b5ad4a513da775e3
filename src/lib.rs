//! cryptmirror - Encrypting mirror filesystem
//!
//! This library provides a FUSE filesystem that mirrors an existing
//! directory and transparently encrypts file contents at rest, recording
//! each file's encryption state in an extended attribute.

pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::{CipherKey, Direction, Transform};
    pub use crate::error::{Error, Result};
    pub use crate::fs::{CryptFs, MountContext, Operations};
}
