//! Inode numbering and attribute conversion
//!
//! The kernel addresses nodes by inode number while the operation set works
//! on virtual paths. The table hands out stable numbers per virtual path.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Inode number of the mount root
pub const ROOT_INO: u64 = 1;

/// File type of a mirrored node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl From<std::fs::FileType> for FileKind {
    fn from(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::RegularFile
        }
    }
}

impl FileKind {
    pub fn to_fuser_type(self) -> fuser::FileType {
        match self {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::Symlink => fuser::FileType::Symlink,
            FileKind::BlockDevice => fuser::FileType::BlockDevice,
            FileKind::CharDevice => fuser::FileType::CharDevice,
            FileKind::Fifo => fuser::FileType::NamedPipe,
            FileKind::Socket => fuser::FileType::Socket,
        }
    }
}

fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// Attributes of a real node, as reported through the mount
#[derive(Debug, Clone)]
pub struct Attributes {
    pub kind: FileKind,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Attributes {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            kind: FileKind::from(meta.file_type()),
            size: meta.len(),
            blocks: meta.blocks(),
            atime: timestamp(meta.atime(), meta.atime_nsec()),
            mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
            ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
        }
    }

    /// Convert to fuser FileAttr under virtual inode `ino`
    pub fn to_fuser_attr(&self, ino: u64) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: self.size,
            blocks: self.blocks,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.ctime,
            kind: self.kind.to_fuser_type(),
            perm: self.perm,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            blksize: self.blksize,
            flags: 0,
        }
    }
}

/// Maps inode numbers to virtual paths and back
pub struct InodeTable {
    /// Next inode number to hand out
    next_ino: AtomicU64,
    /// ino -> virtual path
    paths: RwLock<HashMap<u64, PathBuf>>,
    /// virtual path -> ino
    inos: RwLock<HashMap<PathBuf, u64>>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            paths: RwLock::new(HashMap::new()),
            inos: RwLock::new(HashMap::new()),
        };

        table.paths.write().insert(ROOT_INO, PathBuf::from("/"));
        table.inos.write().insert(PathBuf::from("/"), ROOT_INO);

        table
    }

    /// Virtual path for an inode
    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.paths.read().get(&ino).cloned()
    }

    /// Get the inode for a path, allocating one on first sight
    pub fn ino_for(&self, path: &Path) -> u64 {
        if let Some(ino) = self.inos.read().get(path) {
            return *ino;
        }

        let mut inos = self.inos.write();
        // Raced with another allocation for the same path
        if let Some(ino) = inos.get(path) {
            return *ino;
        }

        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        inos.insert(path.to_path_buf(), ino);
        self.paths.write().insert(ino, path.to_path_buf());
        ino
    }

    /// Re-key `from` and everything below it to live under `to`
    pub fn rename(&self, from: &Path, to: &Path) {
        let mut inos = self.inos.write();
        let mut paths = self.paths.write();

        // Whatever `to` pointed at has been replaced
        let replaced: Vec<PathBuf> = inos
            .keys()
            .filter(|p| p.starts_with(to))
            .cloned()
            .collect();
        for path in replaced {
            if let Some(ino) = inos.remove(&path) {
                paths.remove(&ino);
            }
        }

        let moved: Vec<(PathBuf, u64)> = inos
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            inos.remove(&old);
            inos.insert(new.clone(), ino);
            paths.insert(ino, new);
        }
    }

    /// Forget a path and everything below it
    pub fn remove(&self, path: &Path) {
        let mut inos = self.inos.write();
        let mut paths = self.paths.write();

        let gone: Vec<PathBuf> = inos
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in gone {
            if let Some(ino) = inos.remove(&p) {
                paths.remove(&ino);
            }
        }
    }

    /// Number of known inodes
    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_root_preregistered() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO), Some(PathBuf::from("/")));
        assert_eq!(table.ino_for(Path::new("/")), ROOT_INO);
    }

    #[test]
    fn test_ino_for_is_stable() {
        let table = InodeTable::new();
        let a = table.ino_for(Path::new("/a"));
        let b = table.ino_for(Path::new("/b"));

        assert_ne!(a, b);
        assert_ne!(a, ROOT_INO);
        assert_eq!(table.ino_for(Path::new("/a")), a);
        assert_eq!(table.path(b), Some(PathBuf::from("/b")));
    }

    #[test]
    fn test_rename_moves_descendants() {
        let table = InodeTable::new();
        let dir = table.ino_for(Path::new("/dir"));
        let child = table.ino_for(Path::new("/dir/file"));
        let sibling = table.ino_for(Path::new("/dirty"));

        table.rename(Path::new("/dir"), Path::new("/moved"));

        assert_eq!(table.path(dir), Some(PathBuf::from("/moved")));
        assert_eq!(table.path(child), Some(PathBuf::from("/moved/file")));
        assert_eq!(table.path(sibling), Some(PathBuf::from("/dirty")));
        assert_eq!(table.ino_for(Path::new("/moved/file")), child);
    }

    #[test]
    fn test_rename_over_existing() {
        let table = InodeTable::new();
        let src = table.ino_for(Path::new("/src"));
        let dst = table.ino_for(Path::new("/dst"));

        table.rename(Path::new("/src"), Path::new("/dst"));

        assert_eq!(table.path(src), Some(PathBuf::from("/dst")));
        assert_eq!(table.path(dst), None);
    }

    #[test]
    fn test_remove_subtree() {
        let table = InodeTable::new();
        let dir = table.ino_for(Path::new("/dir"));
        let child = table.ino_for(Path::new("/dir/file"));

        table.remove(Path::new("/dir"));

        assert_eq!(table.path(dir), None);
        assert_eq!(table.path(child), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_attributes_from_metadata() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"hello").unwrap();

        let attrs = Attributes::from_metadata(&fs::symlink_metadata(&file).unwrap());
        assert_eq!(attrs.kind, FileKind::RegularFile);
        assert_eq!(attrs.size, 5);

        let attr = attrs.to_fuser_attr(42);
        assert_eq!(attr.ino, 42);
        assert_eq!(attr.kind, fuser::FileType::RegularFile);

        let dir_attrs = Attributes::from_metadata(&fs::symlink_metadata(dir.path()).unwrap());
        assert_eq!(dir_attrs.kind, FileKind::Directory);
    }
}
