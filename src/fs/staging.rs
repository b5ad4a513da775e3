//! In-memory staging buffer
//!
//! Sits between the caller's fixed buffer (or the real file) and the stream
//! transform. One buffer per call; its contents are wiped when dropped.
//!
//! Growth is fallible: lengths above [`MAX_STAGED_LEN`] fail with `EFBIG`
//! and a failed allocation fails with `ENOMEM`, so an oversized request
//! errors out instead of aborting the process.

use std::io::{self, Read, Seek, SeekFrom, Write};
use zeroize::Zeroize;

/// Largest content held in memory for one call (4 GiB)
pub const MAX_STAGED_LEN: u64 = 4 << 30;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Growable byte buffer with a stream cursor
#[derive(Default)]
pub struct StagingBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer holding a copy of `bytes`, cursor at the start
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            pos: 0,
        }
    }

    /// Current length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Move the cursor back to the start
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copy out up to `size` bytes starting at `offset`
    ///
    /// Returns an empty vector when `offset` is at or past the end.
    pub fn slice(&self, offset: u64, size: usize) -> Vec<u8> {
        let len = self.data.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(size).min(len);
        self.data[start..end].to_vec()
    }

    /// Grow to at least `len` bytes, zero-filled
    fn grow_to(&mut self, len: usize) -> io::Result<()> {
        if len <= self.data.len() {
            return Ok(());
        }
        if len as u64 > MAX_STAGED_LEN {
            return Err(errno(libc::EFBIG));
        }
        self.data
            .try_reserve_exact(len - self.data.len())
            .map_err(|_| errno(libc::ENOMEM))?;
        self.data.resize(len, 0);
        Ok(())
    }

    /// Overwrite bytes at `offset`, growing as needed
    ///
    /// A gap between the current end and `offset` is zero-filled.
    pub fn splice(&mut self, offset: usize, bytes: &[u8]) -> io::Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| errno(libc::EFBIG))?;
        self.grow_to(end)?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Resize to exactly `len` bytes, zero-filling on growth
    pub fn resize(&mut self, len: usize) -> io::Result<()> {
        if len < self.data.len() {
            self.data[len..].zeroize();
            self.data.truncate(len);
        } else {
            self.grow_to(len)?;
        }
        self.pos = self.pos.min(len);
        Ok(())
    }
}

impl Read for StagingBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for StagingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.splice(self.pos, buf)?;
        self.pos += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for StagingBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => (self.data.len() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => (self.pos as u64).checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of buffer")
        })?;
        self.pos = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;
        Ok(target)
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        // Staged bytes are usually plaintext
        self.data.zeroize();
    }
}
