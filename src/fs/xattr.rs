//! Extended attribute primitives
//!
//! Thin wrappers over the `l*xattr` family. They never follow symlinks, so a
//! link's own attributes are addressed rather than its target's.

use std::ffi::{CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Create-or-replace policy for [`set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Create or replace
    Any,
    /// Fail with `EEXIST` if present
    Create,
    /// Fail with `ENODATA` if absent
    Replace,
}

impl SetMode {
    fn flags(self) -> libc::c_int {
        match self {
            SetMode::Any => 0,
            SetMode::Create => libc::XATTR_CREATE,
            SetMode::Replace => libc::XATTR_REPLACE,
        }
    }

    /// Map raw `setxattr` flags as passed by the kernel
    pub fn from_flags(flags: i32) -> Self {
        if flags & libc::XATTR_CREATE != 0 {
            SetMode::Create
        } else if flags & libc::XATTR_REPLACE != 0 {
            SetMode::Replace
        } else {
            SetMode::Any
        }
    }
}

fn c_string(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Read an attribute value
pub fn get(path: &Path, name: &OsStr) -> io::Result<Vec<u8>> {
    let c_path = c_string(path.as_os_str())?;
    let c_name = c_string(name)?;

    loop {
        let size = unsafe {
            libc::lgetxattr(c_path.as_ptr(), c_name.as_ptr(), std::ptr::null_mut(), 0)
        };
        if size < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut buf = vec![0u8; size as usize];
        let read = unsafe {
            libc::lgetxattr(
                c_path.as_ptr(),
                c_name.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if read < 0 {
            let err = io::Error::last_os_error();
            // Value grew between the two calls
            if err.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return Err(err);
        }

        buf.truncate(read as usize);
        return Ok(buf);
    }
}

/// Write an attribute value
pub fn set(path: &Path, name: &OsStr, value: &[u8], mode: SetMode) -> io::Result<()> {
    let c_path = c_string(path.as_os_str())?;
    let c_name = c_string(name)?;

    let res = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            mode.flags(),
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// List attribute names as the raw NUL-separated buffer
pub fn list(path: &Path) -> io::Result<Vec<u8>> {
    let c_path = c_string(path.as_os_str())?;

    loop {
        let size = unsafe { libc::llistxattr(c_path.as_ptr(), std::ptr::null_mut(), 0) };
        if size < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut buf = vec![0u8; size as usize];
        let read = unsafe {
            libc::llistxattr(
                c_path.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        };
        if read < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return Err(err);
        }

        buf.truncate(read as usize);
        return Ok(buf);
    }
}

/// Remove an attribute
pub fn remove(path: &Path, name: &OsStr) -> io::Result<()> {
    let c_path = c_string(path.as_os_str())?;
    let c_name = c_string(name)?;

    let res = unsafe { libc::lremovexattr(c_path.as_ptr(), c_name.as_ptr()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Check whether `dir`'s filesystem accepts `user.*` attributes
pub fn supported(dir: &Path) -> bool {
    let scratch = dir.join(".cryptmirror-xattr-scratch");
    if std::fs::write(&scratch, b"").is_err() {
        return false;
    }
    let ok = set(&scratch, OsStr::new("user.cryptmirror.scratch"), b"1", SetMode::Any).is_ok();
    let _ = std::fs::remove_file(&scratch);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_set_get_list_remove() {
        let dir = tempdir().unwrap();
        if !supported(dir.path()) {
            return;
        }
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        let name = OsStr::new("user.test.attr");

        set(&file, name, b"value", SetMode::Any).unwrap();
        assert_eq!(get(&file, name).unwrap(), b"value");

        let names = list(&file).unwrap();
        assert!(names
            .split(|b| *b == 0)
            .any(|n| n == b"user.test.attr"));

        remove(&file, name).unwrap();
        assert_eq!(get(&file, name).unwrap_err().raw_os_error(), Some(libc::ENODATA));
    }

    #[test]
    fn test_create_mode_rejects_existing() {
        let dir = tempdir().unwrap();
        if !supported(dir.path()) {
            return;
        }
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        let name = OsStr::new("user.test.once");

        set(&file, name, b"1", SetMode::Create).unwrap();
        let err = set(&file, name, b"2", SetMode::Create).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));
    }

    #[test]
    fn test_replace_mode_requires_existing() {
        let dir = tempdir().unwrap();
        if !supported(dir.path()) {
            return;
        }
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();

        let err = set(&file, OsStr::new("user.test.none"), b"1", SetMode::Replace).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENODATA));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = get(&dir.path().join("nope"), OsStr::new("user.x")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(SetMode::from_flags(0), SetMode::Any);
        assert_eq!(SetMode::from_flags(libc::XATTR_CREATE), SetMode::Create);
        assert_eq!(SetMode::from_flags(libc::XATTR_REPLACE), SetMode::Replace);
    }
}
