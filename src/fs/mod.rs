//! FUSE filesystem implementation
//!
//! Mirrors a real directory, encrypting regular file contents created
//! through the mount and passing everything else straight to storage.

mod context;
mod filesystem;
mod inode;
mod marker;
mod operations;
mod pipeline;
mod staging;
pub mod xattr;

pub use context::MountContext;
pub use filesystem::{CryptFs, DEFAULT_TTL};
pub use inode::{Attributes, FileKind, InodeTable, ROOT_INO};
pub use marker::{EncryptionState, MarkerStore, MARKER_ATTR};
pub use operations::{DirEntry, FsStats, Operations, SetTime};
pub use pipeline::CryptoPipeline;
pub use staging::{StagingBuffer, MAX_STAGED_LEN};
