//! Positioned file I/O, fsync, and single-writer file locking.
//!
//! True positioned I/O (no shared file cursor), extended with advisory locking via `fs2` so a
//! single process holds the read-write role, per spec §4.1.

use crate::errors::WaxError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// A single regular file opened for either read-write or read-only access, with positioned
/// I/O helpers. No sidecar files are ever opened through this handle.
pub struct FileHandle {
    file: File,
    writable: bool,
}

impl FileHandle {
    /// Opens `path` for read-write access, creating it if `create` is true, and takes an
    /// advisory exclusive lock so only one process may hold the writer role at a time.
    pub fn open_read_write(path: &Path, create: bool) -> Result<Self, WaxError> {
        let file = OpenOptions::new().read(true).write(true).create(create).open(path)?;
        file.try_lock_exclusive().map_err(|e| {
            WaxError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!("could not acquire exclusive lock on {}: {e}", path.display()),
            ))
        })?;
        Ok(Self { file, writable: true })
    }

    /// Opens `path` for read-only access with a shared advisory lock.
    pub fn open_read_only(path: &Path) -> Result<Self, WaxError> {
        let file = OpenOptions::new().read(true).open(path)?;
        file.try_lock_shared().map_err(|e| {
            WaxError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!("could not acquire shared lock on {}: {e}", path.display()),
            ))
        })?;
        Ok(Self { file, writable: false })
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Reads exactly `len` bytes starting at `offset`, without moving any shared cursor.
    pub fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, WaxError> {
        let mut buf = vec![0u8; len];
        read_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    /// Writes `bytes` at `offset`. Requires the handle to have been opened read-write.
    pub fn write_all_at(&self, offset: u64, bytes: &[u8]) -> Result<(), WaxError> {
        if !self.writable {
            return Err(WaxError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "file handle is read-only",
            )));
        }
        write_at(&self.file, bytes, offset)?;
        Ok(())
    }

    pub fn fsync(&self) -> Result<(), WaxError> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn file_size(&self) -> Result<u64, WaxError> {
        Ok(self.file.metadata()?.len())
    }

    pub fn truncate(&self, len: u64) -> Result<(), WaxError> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Extends the file with zero bytes so `file_size() >= len`, without touching existing
    /// content. Used when the payload region or WAL ring must grow past the current end.
    pub fn ensure_len(&self, len: u64) -> Result<(), WaxError> {
        if self.file_size()? < len {
            self.truncate(len)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt as UnixFileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt as UnixFileExt;
    file.write_all_at(buf, offset)
}

#[cfg(not(unix))]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)
}

#[cfg(not(unix))]
fn write_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(buf)
}
