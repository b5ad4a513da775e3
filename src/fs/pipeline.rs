//! Encrypted content pipeline
//!
//! Content operations on marked files open the real file, stage the whole
//! plaintext in memory, run the transform and drop the file and staging
//! buffer before returning. Unmarked files are read and written in place at
//! the caller's offset, so they keep native sparse-file semantics.

use super::context::MountContext;
use super::marker::{EncryptionState, MarkerStore};
use super::staging::StagingBuffer;
use crate::crypto::{Direction, Transform};
use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use tracing::{debug, warn};

fn too_large() -> Error {
    Error::Io(std::io::Error::from_raw_os_error(libc::EFBIG))
}

/// Orchestrates marker lookups, staging and the transform
pub struct CryptoPipeline<T> {
    markers: MarkerStore,
    transform: T,
}

impl<T: Transform> CryptoPipeline<T> {
    pub fn new(transform: T) -> Self {
        Self::with_markers(transform, MarkerStore::new())
    }

    pub fn with_markers(transform: T, markers: MarkerStore) -> Self {
        Self { markers, transform }
    }

    /// Marker store used by this pipeline
    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Decrypt the whole file into a fresh staging buffer
    fn stage_file(&self, ctx: &MountContext, file: &mut File) -> Result<StagingBuffer> {
        let mut staging = StagingBuffer::new();
        self.transform
            .apply(file, &mut staging, Direction::Decrypt, ctx.key())?;
        staging.rewind();
        Ok(staging)
    }

    /// Replace the file's content with the encrypted staging buffer
    fn store(&self, ctx: &MountContext, file: &mut File, staging: &mut StagingBuffer) -> Result<()> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        staging.rewind();

        let written = self
            .transform
            .apply(staging, file, Direction::Encrypt, ctx.key())?;
        if written != staging.len() as u64 {
            return Err(Error::Transform(format!(
                "stored {} bytes, expected {}",
                written,
                staging.len()
            )));
        }
        Ok(())
    }

    /// Read up to `size` bytes of content starting at `offset`
    pub fn read(
        &self,
        ctx: &MountContext,
        path: &Path,
        offset: u64,
        size: u32,
    ) -> Result<Vec<u8>> {
        let real = ctx.resolve(path);
        let mut file = File::open(&real)?;

        if self.markers.state(&real) == EncryptionState::Plaintext {
            let mut data = Vec::new();
            file.seek(SeekFrom::Start(offset))?;
            file.take(u64::from(size)).read_to_end(&mut data)?;
            return Ok(data);
        }

        let staging = self.stage_file(ctx, &mut file)?;
        debug!(
            "read {:?}: content={} bytes, offset={}, size={}",
            path,
            staging.len(),
            offset,
            size
        );

        Ok(staging.slice(offset, size as usize))
    }

    /// Write `data` at `offset`, returning the number of caller bytes written
    pub fn write(
        &self,
        ctx: &MountContext,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<usize> {
        let real = ctx.resolve(path);
        let mut file = OpenOptions::new().read(true).write(true).open(&real)?;

        if self.markers.state(&real) == EncryptionState::Plaintext {
            file.write_all_at(data, offset)?;
            return Ok(data.len());
        }

        let start = usize::try_from(offset).map_err(|_| too_large())?;
        let current_len = file.metadata()?.len();
        let replaces_all = offset == 0 && data.len() as u64 >= current_len;

        let mut staging = if replaces_all {
            StagingBuffer::new()
        } else {
            self.stage_file(ctx, &mut file)?
        };
        staging.splice(start, data)?;

        debug!(
            "write {:?}: offset={}, len={}, content={} bytes",
            path,
            offset,
            data.len(),
            staging.len()
        );

        self.store(ctx, &mut file, &mut staging)?;
        Ok(data.len())
    }

    /// Create an empty file and mark it as ciphertext
    ///
    /// If the marker cannot be set the new file is removed again.
    pub fn create(&self, ctx: &MountContext, path: &Path, mode: u32) -> Result<()> {
        let real = ctx.resolve(path);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&real)?;

        if let Err(e) = self.markers.set_marked(&real) {
            if let Err(cleanup) = fs::remove_file(&real) {
                warn!("Failed to remove unmarked file {:?}: {}", real, cleanup);
            }
            return Err(e);
        }

        debug!("create {:?}: mode={:o}, marked", path, mode);
        Ok(())
    }

    /// Truncate or extend content to `size` bytes
    pub fn truncate(&self, ctx: &MountContext, path: &Path, size: u64) -> Result<()> {
        let real = ctx.resolve(path);

        if self.markers.state(&real) == EncryptionState::Plaintext {
            let file = OpenOptions::new().write(true).open(&real)?;
            file.set_len(size)?;
            return Ok(());
        }

        let size = usize::try_from(size).map_err(|_| too_large())?;
        let mut file = OpenOptions::new().read(true).write(true).open(&real)?;
        let mut staging = self.stage_file(ctx, &mut file)?;
        staging.resize(size)?;
        self.store(ctx, &mut file, &mut staging)
    }
}
