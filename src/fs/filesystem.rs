//! FUSE filesystem implementation
//!
//! Translates fuser's inode-addressed callbacks into calls on the
//! path-addressed [`Operations`] table.

use fuser::{
    FileAttr, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use super::inode::{FileKind, InodeTable, ROOT_INO};
use super::operations::{Operations, SetTime};
use crate::crypto::{AesCtrTransform, Transform};
use crate::error::{Error, Result};

/// Default attribute/entry cache lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

fn set_time(t: Option<TimeOrNow>) -> SetTime {
    match t {
        None => SetTime::Omit,
        Some(TimeOrNow::Now) => SetTime::Now,
        Some(TimeOrNow::SpecificTime(at)) => SetTime::At(at),
    }
}

/// Encrypting mirror filesystem
pub struct CryptFs<T = AesCtrTransform> {
    /// Path-addressed operation table
    ops: Operations<T>,
    /// Virtual inode management
    inodes: InodeTable,
    /// Attribute cache lifetime handed to the kernel
    ttl: Duration,
}

impl<T: Transform> CryptFs<T> {
    pub fn new(ops: Operations<T>) -> Self {
        Self::with_ttl(ops, DEFAULT_TTL)
    }

    pub fn with_ttl(ops: Operations<T>, ttl: Duration) -> Self {
        Self {
            ops,
            inodes: InodeTable::new(),
            ttl,
        }
    }

    /// Virtual path for an inode
    fn path(&self, ino: u64) -> Result<PathBuf> {
        self.inodes.path(ino).ok_or(Error::InvalidInode(ino))
    }

    /// Virtual path of `name` inside directory `parent`
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<PathBuf> {
        Ok(self.path(parent)?.join(name))
    }

    /// Stat a virtual path and assign it an inode
    fn entry(&self, path: &Path) -> Result<FileAttr> {
        let attrs = self.ops.getattr(path)?;
        let ino = self.inodes.ino_for(path);
        Ok(attrs.to_fuser_attr(ino))
    }

    fn attr(&self, ino: u64) -> Result<FileAttr> {
        let path = self.path(ino)?;
        Ok(self.ops.getattr(&path)?.to_fuser_attr(ino))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr> {
        let path = self.path(ino)?;

        if let Some(mode) = mode {
            self.ops.chmod(&path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.ops.chown(&path, uid, gid)?;
        }
        if let Some(size) = size {
            self.ops.truncate(&path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            self.ops.utimens(&path, set_time(atime), set_time(mtime))?;
        }

        self.attr(ino)
    }

    fn reply_entry(&self, result: Result<FileAttr>, reply: ReplyEntry) {
        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn reply_empty(result: Result<()>, reply: ReplyEmpty) {
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Reply with xattr data honoring the kernel's size probe
    fn reply_xattr(result: Result<Vec<u8>>, size: u32, reply: ReplyXattr) {
        match result {
            Ok(data) if size == 0 => reply.size(data.len() as u32),
            Ok(data) if data.len() > size as usize => reply.error(libc::ERANGE),
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

impl<T: Transform> Filesystem for CryptFs<T> {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> std::result::Result<(), c_int> {
        info!("Mounted mirror of {:?}", self.ops.context().root());
        Ok(())
    }

    fn destroy(&mut self) {
        info!("Unmounted mirror of {:?}", self.ops.context().root());
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);

        let result = self.child_path(parent, name).and_then(|p| self.entry(&p));
        self.reply_entry(result, reply);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        match self.attr(ino) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, uid={:?}, gid={:?}, size={:?})",
            ino, mode, uid, gid, size
        );

        match self.apply_setattr(ino, mode, uid, gid, size, atime, mtime) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink(ino={})", ino);

        match self.path(ino).and_then(|p| self.ops.readlink(&p)) {
            Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod(parent={}, name={:?}, mode={:o}, rdev={})", parent, name, mode, rdev);

        let result = self.child_path(parent, name).and_then(|p| {
            self.ops.mknod(&p, mode & !umask, u64::from(rdev))?;
            self.entry(&p)
        });
        self.reply_entry(result, reply);
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:o})", parent, name, mode);

        let result = self.child_path(parent, name).and_then(|p| {
            self.ops.mkdir(&p, mode & !umask)?;
            self.entry(&p)
        });
        self.reply_entry(result, reply);
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent, name);

        let result = self.child_path(parent, name).and_then(|p| {
            self.ops.unlink(&p)?;
            self.inodes.remove(&p);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent, name);

        let result = self.child_path(parent, name).and_then(|p| {
            self.ops.rmdir(&p)?;
            self.inodes.remove(&p);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!("symlink(parent={}, name={:?}, target={:?})", parent, link_name, target);

        let result = self.child_path(parent, link_name).and_then(|p| {
            self.ops.symlink(target, &p)?;
            self.entry(&p)
        });
        self.reply_entry(result, reply);
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent, name, newparent, newname
        );

        // RENAME_NOREPLACE / RENAME_EXCHANGE have no plain rename(2) equivalent
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let result = self.child_path(parent, name).and_then(|from| {
            let to = self.child_path(newparent, newname)?;
            self.ops.rename(&from, &to)?;
            self.inodes.rename(&from, &to);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link(ino={}, newparent={}, newname={:?})", ino, newparent, newname);

        let result = self.path(ino).and_then(|from| {
            let to = self.child_path(newparent, newname)?;
            self.ops.link(&from, &to)?;
            self.entry(&to)
        });
        self.reply_entry(result, reply);
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#o})", ino, flags);

        match self.path(ino).and_then(|p| self.ops.open(&p, flags)) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.path(ino).and_then(|p| self.ops.read(&p, offset as u64, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, fh={}, offset={}, len={})", ino, fh, offset, data.len());

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.path(ino).and_then(|p| self.ops.write(&p, offset as u64, data)) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush(ino={}, fh={})", ino, fh);
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);

        let result = self.path(ino).and_then(|p| self.ops.release(&p));
        Self::reply_empty(result, reply);
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync(ino={}, fh={}, datasync={})", ino, fh, datasync);

        let result = self.path(ino).and_then(|p| self.ops.fsync(&p, datasync));
        Self::reply_empty(result, reply);
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir(ino={})", ino);

        match self.path(ino) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let listing = match self.ops.readdir(&path) {
            Ok(l) => l,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let parent_ino = path
            .parent()
            .map(|p| self.inodes.ino_for(p))
            .unwrap_or(ROOT_INO);

        let mut entries: Vec<(u64, FileKind, OsString)> = vec![
            (ino, FileKind::Directory, ".".into()),
            (parent_ino, FileKind::Directory, "..".into()),
        ];
        for entry in listing {
            let child_ino = self.inodes.ino_for(&path.join(&entry.name));
            entries.push((child_ino, entry.kind, entry.name));
        }

        for (i, (child_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            let buffer_full = reply.add(*child_ino, (i + 1) as i64, kind.to_fuser_type(), name);
            if buffer_full {
                break;
            }
        }

        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        debug!("releasedir(ino={})", ino);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        debug!("statfs(ino={})", ino);

        let path = self.path(ino).unwrap_or_else(|_| PathBuf::from("/"));
        match self.ops.statfs(&path) {
            Ok(st) => reply.statfs(
                st.blocks,
                st.blocks_free,
                st.blocks_available,
                st.files,
                st.files_free,
                st.block_size,
                st.name_max,
                st.fragment_size,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        debug!("setxattr(ino={}, name={:?}, len={})", ino, name, value.len());

        let result = self
            .path(ino)
            .and_then(|p| self.ops.setxattr(&p, name, value, flags));
        Self::reply_empty(result, reply);
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!("getxattr(ino={}, name={:?}, size={})", ino, name, size);

        let result = self.path(ino).and_then(|p| self.ops.getxattr(&p, name));
        Self::reply_xattr(result, size, reply);
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr(ino={}, size={})", ino, size);

        let result = self.path(ino).and_then(|p| self.ops.listxattr(&p));
        Self::reply_xattr(result, size, reply);
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("removexattr(ino={}, name={:?})", ino, name);

        let result = self.path(ino).and_then(|p| self.ops.removexattr(&p, name));
        Self::reply_empty(result, reply);
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={})", ino, mask);

        let result = self.path(ino).and_then(|p| self.ops.access(&p, mask));
        Self::reply_empty(result, reply);
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, mode={:o}, flags={:#o})", parent, name, mode, flags);

        let result = self.child_path(parent, name).and_then(|p| {
            self.ops.create(&p, mode & !umask)?;
            self.entry(&p)
        });

        match result {
            Ok(attr) => reply.created(&self.ttl, &attr, 0, 0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
