//! The dual root header page: a fixed-size, CRC-protected structure written alternately to
//! offsets `0` and `PAGE_SIZE`. The valid root with the higher epoch wins; ties are
//! impossible because the epoch is strictly monotonic.
//!
//! CRC32 computed with `crc32fast` over header-plus-data, double-buffered slots selected by
//! highest valid epoch. The layout is pinned to the bit-exact fields of spec §6 instead of
//! bincode-derived framing, since the root page is read before any schema
//! negotiation can happen.

use crate::config::PAGE_SIZE;
use crate::errors::WaxError;
use crc32fast::Hasher;

pub const MAGIC: &[u8; 16] = b"WAXSTOREV1ROOT\0\0";
pub const FORMAT_VERSION: u16 = 1;

/// The root header page. All integers are little-endian on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootPage {
    pub flags: u16,
    pub epoch: u64,
    pub created_at_ms: u64,
    pub wal_offset: u64,
    pub wal_capacity: u64,
    pub wal_head_sequence: u64,
    pub wal_tail_sequence: u64,
    /// Ring-relative physical cursor paired with `wal_tail_sequence`: where a reopened session
    /// should resume scanning the WAL from, since the ring may have wrapped past physical
    /// offset 0 since the last checkpoint.
    pub wal_tail_physical_cursor: u64,
    pub wal_last_committed_sequence: u64,
    pub payload_region_offset: u64,
    pub payload_next_free_offset: u64,
    pub catalog_head_offset: u64,
    pub index_manifest_table_offset: u64,
    pub state_snapshot_offset: u64,
    /// Byte length of the snapshot blob at `state_snapshot_offset`; zero means no snapshot has
    /// been written yet (a fresh store, always at epoch 1).
    pub state_snapshot_length: u64,
}

/// Byte offset of the trailing CRC32C field within the fixed-size page buffer.
const CRC_OFFSET: usize = PAGE_SIZE - 4;

impl RootPage {
    #[must_use]
    pub fn fresh(created_at_ms: u64, wal_offset: u64, wal_capacity: u64, payload_region_offset: u64) -> Self {
        Self {
            flags: 0,
            epoch: 1,
            created_at_ms,
            wal_offset,
            wal_capacity,
            wal_head_sequence: 0,
            wal_tail_sequence: 0,
            wal_tail_physical_cursor: 0,
            wal_last_committed_sequence: 0,
            payload_region_offset,
            payload_next_free_offset: payload_region_offset,
            catalog_head_offset: 0,
            index_manifest_table_offset: 0,
            state_snapshot_offset: 0,
            state_snapshot_length: 0,
        }
    }

    #[must_use]
    pub fn next_epoch(&self) -> Self {
        let mut next = *self;
        next.epoch += 1;
        next
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.created_at_ms.to_le_bytes());
        buf.extend_from_slice(&self.wal_offset.to_le_bytes());
        buf.extend_from_slice(&self.wal_capacity.to_le_bytes());
        buf.extend_from_slice(&self.wal_head_sequence.to_le_bytes());
        buf.extend_from_slice(&self.wal_tail_sequence.to_le_bytes());
        buf.extend_from_slice(&self.wal_tail_physical_cursor.to_le_bytes());
        buf.extend_from_slice(&self.wal_last_committed_sequence.to_le_bytes());
        buf.extend_from_slice(&self.payload_region_offset.to_le_bytes());
        buf.extend_from_slice(&self.payload_next_free_offset.to_le_bytes());
        buf.extend_from_slice(&self.catalog_head_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_manifest_table_offset.to_le_bytes());
        buf.extend_from_slice(&self.state_snapshot_offset.to_le_bytes());
        buf.extend_from_slice(&self.state_snapshot_length.to_le_bytes());
        buf.resize(CRC_OFFSET, 0);
        let crc = crc32_over(&buf[..CRC_OFFSET]);
        buf.extend_from_slice(&crc.to_le_bytes());
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        buf
    }

    /// Parses and validates a page buffer of exactly `PAGE_SIZE` bytes. Returns `None` if
    /// the magic doesn't match, the version is unsupported, or the CRC fails — the caller
    /// falls back to the other root slot in any of those cases.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != PAGE_SIZE || &buf[0..16] != MAGIC {
            return None;
        }
        let version = u16::from_le_bytes(buf[16..18].try_into().ok()?);
        if version != FORMAT_VERSION {
            return None;
        }
        let stored_crc = u32::from_le_bytes(buf[CRC_OFFSET..CRC_OFFSET + 4].try_into().ok()?);
        if crc32_over(&buf[..CRC_OFFSET]) != stored_crc {
            return None;
        }
        let mut r = Reader { buf, pos: 18 };
        Some(Self {
            flags: r.u16(),
            epoch: r.u64(),
            created_at_ms: r.u64(),
            wal_offset: r.u64(),
            wal_capacity: r.u64(),
            wal_head_sequence: r.u64(),
            wal_tail_sequence: r.u64(),
            wal_tail_physical_cursor: r.u64(),
            wal_last_committed_sequence: r.u64(),
            payload_region_offset: r.u64(),
            payload_next_free_offset: r.u64(),
            catalog_head_offset: r.u64(),
            index_manifest_table_offset: r.u64(),
            state_snapshot_offset: r.u64(),
            state_snapshot_length: r.u64(),
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }
    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }
}

fn crc32_over(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Chooses the active root among the two slots: the valid page (matching magic, supported
/// version, correct CRC) with the higher epoch. Fails with `FormatError::NoValidRoot`-style
/// error if neither slot is valid.
pub fn select_active(slot_a: Option<RootPage>, slot_b: Option<RootPage>) -> Result<(RootPage, usize), WaxError> {
    match (slot_a, slot_b) {
        (Some(a), Some(b)) => {
            if a.epoch >= b.epoch { Ok((a, 0)) } else { Ok((b, 1)) }
        }
        (Some(a), None) => Ok((a, 0)),
        (None, Some(b)) => Ok((b, 1)),
        (None, None) => Err(WaxError::FormatError("no valid root page found in either slot".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_encode_decode() {
        let page = RootPage::fresh(1000, PAGE_SIZE as u64 * 2, 4096, PAGE_SIZE as u64 * 2 + 4096);
        let bytes = page.encode();
        assert_eq!(bytes.len(), PAGE_SIZE);
        let decoded = RootPage::decode(&bytes).expect("valid page");
        assert_eq!(decoded, page);
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let page = RootPage::fresh(1, 0, 0, 0);
        let mut bytes = page.encode();
        bytes[CRC_OFFSET] ^= 0xFF;
        assert!(RootPage::decode(&bytes).is_none());
    }

    #[test]
    fn select_active_prefers_higher_epoch() {
        let a = RootPage::fresh(1, 0, 0, 0);
        let b = a.next_epoch();
        let (chosen, slot) = select_active(Some(a), Some(b)).unwrap();
        assert_eq!(chosen.epoch, b.epoch);
        assert_eq!(slot, 1);
    }

    #[test]
    fn select_active_falls_back_to_surviving_slot() {
        let a = RootPage::fresh(1, 0, 0, 0);
        let (chosen, slot) = select_active(Some(a), None).unwrap();
        assert_eq!(chosen.epoch, a.epoch);
        assert_eq!(slot, 0);
    }

    #[test]
    fn select_active_fails_when_both_invalid() {
        assert!(select_active(None, None).is_err());
    }
}
