//! The single-file container: dual-header atomic root, WAL ring, and payload region.
//!
//! Grounded on `src/wasp.rs`'s `WaspFile` (double-buffered manifest pages) and `TinyWal`,
//! split into the four focused submodules spec §4 calls out.

pub mod fileio;
pub mod payload;
pub mod root;
pub mod wal;

use crate::config::{PAGE_SIZE, StoreOptions};
use crate::errors::WaxError;
use fileio::FileHandle;
use root::RootPage;
use std::path::Path;
use std::sync::Arc;

/// Owns the open file handle and the currently-active root page, and knows how to compute
/// and durably install the next root (the commit coordinator drives this; see `crate::commit`).
pub struct Container {
    pub file: Arc<FileHandle>,
    pub active_root: RootPage,
    pub active_slot: usize,
}

impl Container {
    /// Creates a brand-new container file: both root pages written identically, with an
    /// empty catalog and empty WAL.
    pub fn create(path: &Path, options: &StoreOptions) -> Result<Self, WaxError> {
        let file = Arc::new(FileHandle::open_read_write(path, true)?);
        let wal_offset = (PAGE_SIZE * 2) as u64;
        let payload_region_offset = wal_offset + options.wal_capacity;
        let created_at_ms = now_ms();
        let page = RootPage::fresh(created_at_ms, wal_offset, options.wal_capacity, payload_region_offset);
        file.ensure_len(payload_region_offset)?;
        write_slot(&file, 0, &page)?;
        write_slot(&file, 1, &page)?;
        file.fsync()?;
        Ok(Self { file, active_root: page, active_slot: 0 })
    }

    /// Opens an existing container file and selects the active root: the valid page
    /// (correct magic, supported version, correct CRC) with the higher epoch.
    pub fn open(path: &Path, writable: bool) -> Result<Self, WaxError> {
        let file = Arc::new(if writable {
            FileHandle::open_read_write(path, false)?
        } else {
            FileHandle::open_read_only(path)?
        });
        let slot_a = read_slot(&file, 0);
        let slot_b = read_slot(&file, 1);
        let (active_root, active_slot) = root::select_active(slot_a, slot_b)?;
        Ok(Self { file, active_root, active_slot })
    }

    /// Writes `next` to the inactive slot (the one with the lower valid epoch) and fsyncs.
    /// Readers always select the valid root with the highest epoch on their next open, so no
    /// distinct pointer flip is required.
    pub fn install_root(&mut self, next: RootPage) -> Result<(), WaxError> {
        let target_slot = 1 - self.active_slot;
        write_slot(&self.file, target_slot, &next)?;
        self.file.fsync()?;
        self.active_root = next;
        self.active_slot = target_slot;
        Ok(())
    }
}

fn slot_offset(slot: usize) -> u64 {
    (slot * PAGE_SIZE) as u64
}

fn write_slot(file: &FileHandle, slot: usize, page: &RootPage) -> Result<(), WaxError> {
    file.write_all_at(slot_offset(slot), &page.encode())
}

fn read_slot(file: &FileHandle, slot: usize) -> Option<RootPage> {
    let bytes = file.read_exact_at(slot_offset(slot), PAGE_SIZE).ok()?;
    RootPage::decode(&bytes)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
