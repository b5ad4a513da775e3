//! Path-addressed operation set
//!
//! Content operations go through the [`CryptoPipeline`]. Everything else is
//! a direct delegation to the storage primitive on the resolved real path,
//! with the storage error returned as is.

use super::context::MountContext;
use super::inode::{Attributes, FileKind};
use super::pipeline::CryptoPipeline;
use super::xattr::{self, SetMode};
use crate::crypto::{AesCtrTransform, Transform};
use crate::error::{Error, Result};
use nix::sys::stat::{Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use std::ffi::{OsStr, OsString};
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entry returned by [`Operations::readdir`]
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: FileKind,
}

/// Filesystem statistics returned by [`Operations::statfs`]
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_max: u32,
    pub fragment_size: u32,
}

/// Timestamp update for [`Operations::utimens`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    /// Leave unchanged
    Omit,
    Now,
    At(SystemTime),
}

impl SetTime {
    fn to_timespec(self) -> TimeSpec {
        match self {
            SetTime::Omit => TimeSpec::UTIME_OMIT,
            SetTime::Now => TimeSpec::UTIME_NOW,
            SetTime::At(t) => match t.duration_since(UNIX_EPOCH) {
                Ok(d) => TimeSpec::from_duration(d),
                Err(e) => -TimeSpec::from_duration(e.duration()),
            },
        }
    }
}

fn errno(code: i32) -> Error {
    Error::Io(std::io::Error::from_raw_os_error(code))
}

/// The full operation table of the mirror
pub struct Operations<T = AesCtrTransform> {
    ctx: MountContext,
    pipeline: CryptoPipeline<T>,
}

impl Operations<AesCtrTransform> {
    /// Create an operation set using the AES-CTR transform
    pub fn new(ctx: MountContext) -> Self {
        Self::with_transform(ctx, AesCtrTransform::new())
    }
}

impl<T: Transform> Operations<T> {
    pub fn with_transform(ctx: MountContext, transform: T) -> Self {
        Self {
            ctx,
            pipeline: CryptoPipeline::new(transform),
        }
    }

    pub fn context(&self) -> &MountContext {
        &self.ctx
    }

    /// Whether the file at a virtual path holds ciphertext
    pub fn is_encrypted(&self, path: &Path) -> bool {
        self.pipeline.markers().is_marked(&self.ctx.resolve(path))
    }

    /// Attributes of the node itself (symlinks are not followed)
    pub fn getattr(&self, path: &Path) -> Result<Attributes> {
        let meta = fs::symlink_metadata(self.ctx.resolve(path))?;
        Ok(Attributes::from_metadata(&meta))
    }

    /// Check access permissions for the calling process
    pub fn access(&self, path: &Path, mask: i32) -> Result<()> {
        nix::unistd::access(
            &self.ctx.resolve(path),
            AccessFlags::from_bits_truncate(mask),
        )?;
        Ok(())
    }

    pub fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Ok(fs::read_link(self.ctx.resolve(path))?)
    }

    /// List a directory, excluding `.` and `..`
    pub fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.ctx.resolve(path))? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name(),
                kind: FileKind::from(entry.file_type()?),
            });
        }
        Ok(entries)
    }

    /// Create a regular file, FIFO or device node
    ///
    /// Regular files made here carry no marker and are stored as plaintext.
    pub fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()> {
        let real = self.ctx.resolve(path);
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & 0o7777);

        if kind == SFlag::S_IFREG || kind.is_empty() {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode & 0o7777)
                .open(&real)?;
        } else if kind == SFlag::S_IFIFO {
            nix::unistd::mkfifo(&real, perm)?;
        } else {
            nix::sys::stat::mknod(&real, kind, perm, rdev as libc::dev_t)?;
        }
        Ok(())
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        DirBuilder::new()
            .mode(mode & 0o7777)
            .create(self.ctx.resolve(path))?;
        Ok(())
    }

    pub fn unlink(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.ctx.resolve(path))?;
        Ok(())
    }

    pub fn rmdir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(self.ctx.resolve(path))?;
        Ok(())
    }

    /// Create a symlink at `link` pointing to `target`
    ///
    /// The target is link content and is stored verbatim.
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, self.ctx.resolve(link))?;
        Ok(())
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.ctx.resolve(from), self.ctx.resolve(to))?;
        Ok(())
    }

    /// Create a hard link `to` for the existing `from`
    pub fn link(&self, from: &Path, to: &Path) -> Result<()> {
        fs::hard_link(self.ctx.resolve(from), self.ctx.resolve(to))?;
        Ok(())
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(self.ctx.resolve(path), Permissions::from_mode(mode & 0o7777))?;
        Ok(())
    }

    /// Change ownership without following symlinks
    pub fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        std::os::unix::fs::lchown(self.ctx.resolve(path), uid, gid)?;
        Ok(())
    }

    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        self.pipeline.truncate(&self.ctx, path, size)
    }

    /// Set access and modification times without following symlinks
    pub fn utimens(&self, path: &Path, atime: SetTime, mtime: SetTime) -> Result<()> {
        nix::sys::stat::utimensat(
            None,
            &self.ctx.resolve(path),
            &atime.to_timespec(),
            &mtime.to_timespec(),
            UtimensatFlags::NoFollowSymlink,
        )?;
        Ok(())
    }

    /// Check that the file can be opened with `flags`
    ///
    /// Nothing is kept open; content operations reopen the file themselves.
    pub fn open(&self, path: &Path, flags: i32) -> Result<()> {
        let accmode = flags & libc::O_ACCMODE;
        let passthrough =
            flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC);

        OpenOptions::new()
            .read(accmode == libc::O_RDONLY || accmode == libc::O_RDWR)
            .write(accmode == libc::O_WRONLY || accmode == libc::O_RDWR)
            .custom_flags(passthrough)
            .open(self.ctx.resolve(path))?;
        Ok(())
    }

    pub fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.pipeline.read(&self.ctx, path, offset, size)
    }

    pub fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<usize> {
        self.pipeline.write(&self.ctx, path, offset, data)
    }

    /// Create a new encrypted regular file
    pub fn create(&self, path: &Path, mode: u32) -> Result<()> {
        self.pipeline.create(&self.ctx, path, mode & 0o7777)
    }

    pub fn statfs(&self, path: &Path) -> Result<FsStats> {
        let st = nix::sys::statvfs::statvfs(&self.ctx.resolve(path))?;
        Ok(FsStats {
            blocks: st.blocks() as u64,
            blocks_free: st.blocks_free() as u64,
            blocks_available: st.blocks_available() as u64,
            files: st.files() as u64,
            files_free: st.files_free() as u64,
            block_size: st.block_size() as u32,
            name_max: st.name_max() as u32,
            fragment_size: st.fragment_size() as u32,
        })
    }

    /// No per-open state is held
    pub fn release(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Flush the real file to stable storage
    pub fn fsync(&self, path: &Path, datasync: bool) -> Result<()> {
        let file = fs::File::open(self.ctx.resolve(path))?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Whether `name` is the encryption marker, which clients never see
    fn is_marker(&self, name: &OsStr) -> bool {
        name == OsStr::new(self.pipeline.markers().attr())
    }

    /// Set an attribute; the encryption marker is read-only (`EPERM`)
    pub fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: i32) -> Result<()> {
        if self.is_marker(name) {
            return Err(errno(libc::EPERM));
        }
        xattr::set(&self.ctx.resolve(path), name, value, SetMode::from_flags(flags))?;
        Ok(())
    }

    pub fn getxattr(&self, path: &Path, name: &OsStr) -> Result<Vec<u8>> {
        if self.is_marker(name) {
            return Err(errno(libc::ENODATA));
        }
        Ok(xattr::get(&self.ctx.resolve(path), name)?)
    }

    /// Attribute names as a NUL-separated list, without the marker
    pub fn listxattr(&self, path: &Path) -> Result<Vec<u8>> {
        let names = xattr::list(&self.ctx.resolve(path))?;
        let marker = self.pipeline.markers().attr().as_bytes();
        Ok(names
            .split(|b| *b == 0)
            .filter(|name| !name.is_empty() && *name != marker)
            .flat_map(|name| name.iter().copied().chain(std::iter::once(0)))
            .collect())
    }

    pub fn removexattr(&self, path: &Path, name: &OsStr) -> Result<()> {
        if self.is_marker(name) {
            return Err(errno(libc::EPERM));
        }
        xattr::remove(&self.ctx.resolve(path), name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherKey;
    use crate::fs::marker::MARKER_ATTR;
    use tempfile::tempdir;

    fn ops(dir: &Path) -> Operations {
        Operations::new(MountContext::new(dir, CipherKey::from("hello")))
    }

    #[test]
    fn test_settime_timespec() {
        assert_eq!(SetTime::Omit.to_timespec(), TimeSpec::UTIME_OMIT);
        assert_eq!(SetTime::Now.to_timespec(), TimeSpec::UTIME_NOW);

        let t = UNIX_EPOCH + std::time::Duration::new(10, 5);
        let ts = SetTime::At(t).to_timespec();
        assert_eq!(ts.tv_sec(), 10);
        assert_eq!(ts.tv_nsec(), 5);

        let before = UNIX_EPOCH - std::time::Duration::new(1, 500_000_000);
        let ts = SetTime::At(before).to_timespec();
        assert_eq!(ts.tv_sec(), -2);
        assert_eq!(ts.tv_nsec(), 500_000_000);
    }

    #[test]
    fn test_utimens_pre_epoch_and_omit() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"").unwrap();
        let ops = ops(dir.path());
        let before = fs::metadata(dir.path().join("f")).unwrap().modified().unwrap();

        let old = UNIX_EPOCH - std::time::Duration::from_secs(86_400);
        ops.utimens(Path::new("/f"), SetTime::At(old), SetTime::Omit).unwrap();

        let meta = fs::metadata(dir.path().join("f")).unwrap();
        assert_eq!(meta.accessed().unwrap(), old);
        assert_eq!(meta.modified().unwrap(), before);
    }

    #[test]
    fn test_marker_attribute_is_protected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"").unwrap();
        let ops = ops(dir.path());
        let marker = OsStr::new(MARKER_ATTR);

        let err = ops.setxattr(Path::new("/f"), marker, b"false", 0).unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
        let err = ops.removexattr(Path::new("/f"), marker).unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
        let err = ops.getxattr(Path::new("/f"), marker).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENODATA);
    }

    #[test]
    fn test_marker_hidden_from_listxattr() {
        let dir = tempdir().unwrap();
        if !xattr::supported(dir.path()) {
            return;
        }
        let ops = ops(dir.path());
        let f = Path::new("/f");

        ops.create(f, 0o644).unwrap();
        ops.write(f, 0, b"secret").unwrap();
        ops.setxattr(f, OsStr::new("user.note"), b"x", 0).unwrap();

        assert_eq!(ops.listxattr(f).unwrap(), b"user.note\0");
        assert!(ops.is_encrypted(f));
        assert_eq!(ops.read(f, 0, 100).unwrap(), b"secret");
    }

    #[test]
    fn test_mknod_regular_is_unmarked() {
        let dir = tempdir().unwrap();
        let ops = ops(dir.path());

        ops.mknod(Path::new("/node"), libc::S_IFREG | 0o644, 0).unwrap();
        assert!(dir.path().join("node").is_file());
        assert!(!ops.is_encrypted(Path::new("/node")));

        let err = ops.mknod(Path::new("/node"), libc::S_IFREG | 0o644, 0).unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_mknod_fifo() {
        let dir = tempdir().unwrap();
        let ops = ops(dir.path());

        ops.mknod(Path::new("/pipe"), libc::S_IFIFO | 0o600, 0).unwrap();
        assert_eq!(ops.getattr(Path::new("/pipe")).unwrap().kind, FileKind::Fifo);
    }

    #[test]
    fn test_open_does_not_truncate() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"keep").unwrap();
        let ops = ops(dir.path());

        ops.open(Path::new("/f"), libc::O_WRONLY | libc::O_TRUNC).unwrap();
        assert_eq!(fs::read(dir.path().join("f")).unwrap(), b"keep");
    }

    #[test]
    fn test_open_missing() {
        let dir = tempdir().unwrap();
        let err = ops(dir.path()).open(Path::new("/nope"), libc::O_RDONLY).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_release_is_noop() {
        let dir = tempdir().unwrap();
        assert!(ops(dir.path()).release(Path::new("/anything")).is_ok());
    }
}
