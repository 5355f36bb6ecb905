//! Payload store: appends opaque immutable bytes and returns `(offset, length, encoding)`.
//!
//! A linear offset/length store with no segment sealing concept — the payload region simply
//! grows, with a per-commit fsync boundary per spec §4.3.

use crate::container::fileio::FileHandle;
use crate::errors::WaxError;
use crate::types::{Codec, PayloadDescriptor};
use std::sync::Arc;

pub struct PayloadStore {
    file: Arc<FileHandle>,
    region_offset: u64,
    next_free_offset: u64,
}

impl PayloadStore {
    #[must_use]
    pub fn new(file: Arc<FileHandle>, region_offset: u64, next_free_offset: u64) -> Self {
        Self { file, region_offset, next_free_offset }
    }

    #[must_use]
    pub fn next_free_offset(&self) -> u64 {
        self.next_free_offset
    }

    /// Appends `bytes` as-is (codec = `Plain`). The payload store never runs a compression
    /// algorithm itself; `encoding` merely tags what's already been encoded by the caller.
    pub fn append(&mut self, bytes: &[u8], encoding: Codec) -> Result<PayloadDescriptor, WaxError> {
        let offset = self.next_free_offset;
        self.file.ensure_len(offset + bytes.len() as u64)?;
        self.file.write_all_at(offset, bytes)?;
        self.next_free_offset = offset + bytes.len() as u64;
        Ok(PayloadDescriptor { offset, length: bytes.len() as u64, encoding })
    }

    /// Reads the raw bytes described by `descriptor`, independent of the WAL.
    pub fn read(&self, descriptor: PayloadDescriptor) -> Result<Vec<u8>, WaxError> {
        self.file.read_exact_at(descriptor.offset, descriptor.length as usize)
    }

    #[must_use]
    pub fn region_offset(&self) -> u64 {
        self.region_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn append_then_read_roundtrips() {
        let tmp = NamedTempFile::new().unwrap();
        let handle = Arc::new(FileHandle::open_read_write(tmp.path(), false).unwrap());
        let mut store = PayloadStore::new(handle, 0, 0);
        let d1 = store.append(b"hello world", Codec::Plain).unwrap();
        let d2 = store.append(b"second frame", Codec::Plain).unwrap();
        assert_eq!(d1.offset, 0);
        assert_eq!(d2.offset, 11);
        assert_eq!(store.read(d1).unwrap(), b"hello world");
        assert_eq!(store.read(d2).unwrap(), b"second frame");
    }
}
