//! WAL ring: a sequenced, checksummed, length-framed log with wrap-around and checkpointing.
//!
//! Length-prefixed bincode records, appended and replayed to the last committed marker, built
//! into the fixed ring with wrap-sentinel and frontier-cut replay described in spec §4.2.

use crate::container::fileio::FileHandle;
use crate::errors::WaxError;
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Record header size: length_with_header(4) + crc32c(4) + sequence(8) + kind(1) + flags(1)
/// + reserved(2), before 8-byte alignment padding.
const RECORD_HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalRecordKind {
    AppendPayload = 0,
    CatalogPut = 1,
    Supersede = 2,
    Delete = 3,
    EmbeddingPut = 4,
    StageLexIndex = 5,
    StageVecIndex = 6,
    StageKvIndex = 7,
    CheckpointSentinel = 8,
    WrapSentinel = 9,
    CommitMarker = 10,
}

impl WalRecordKind {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::AppendPayload,
            1 => Self::CatalogPut,
            2 => Self::Supersede,
            3 => Self::Delete,
            4 => Self::EmbeddingPut,
            5 => Self::StageLexIndex,
            6 => Self::StageVecIndex,
            7 => Self::StageKvIndex,
            8 => Self::CheckpointSentinel,
            9 => Self::WrapSentinel,
            10 => Self::CommitMarker,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub sequence: u64,
    pub kind: WalRecordKind,
    pub payload: Vec<u8>,
}

fn aligned_len(raw: usize) -> usize {
    raw.div_ceil(8) * 8
}

fn encode_record(sequence: u64, kind: WalRecordKind, payload: &[u8]) -> Vec<u8> {
    let unaligned = RECORD_HEADER_LEN + payload.len();
    let total = aligned_len(unaligned);
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u32).to_le_bytes());
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.push(kind as u8);
    buf.push(0); // flags
    buf.extend_from_slice(&0u16.to_le_bytes()); // reserved
    buf.extend_from_slice(payload);
    buf.resize(total, 0);
    buf
}

fn decode_record(buf: &[u8]) -> Option<(WalRecord, usize)> {
    if buf.len() < RECORD_HEADER_LEN {
        return None;
    }
    let total = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;
    if total < RECORD_HEADER_LEN || total > buf.len() {
        return None;
    }
    let crc = u32::from_le_bytes(buf[4..8].try_into().ok()?);
    let sequence = u64::from_le_bytes(buf[8..16].try_into().ok()?);
    let kind = WalRecordKind::from_u8(buf[16])?;
    let payload_len = total - RECORD_HEADER_LEN;
    let payload = buf[RECORD_HEADER_LEN..RECORD_HEADER_LEN + payload_len].to_vec();
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != crc {
        return None;
    }
    Some((WalRecord { sequence, kind, payload }, total))
}

/// Counters tracked by the ring for pressure and diagnostics (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct WalStats {
    pub pending_bytes: u64,
    pub wrap_count: u64,
    pub auto_commit_count: u64,
    pub sentinel_write_count: u64,
    pub checkpoint_count: u64,
}

/// A fixed-capacity ring of WAL records, backed by a slice of the container file starting at
/// `ring_offset` with `capacity` bytes.
pub struct WalRing {
    file: Arc<FileHandle>,
    ring_offset: u64,
    capacity: u64,
    head_sequence: u64,
    tail_sequence: u64,
    /// Ring-relative physical offset of the first byte belonging to `tail_sequence + 1`, i.e.
    /// where a replay resuming from the tail should start scanning. Persisted in the root page
    /// alongside `tail_sequence` since the two must always travel together.
    tail_physical_cursor: u64,
    last_committed_sequence: u64,
    write_cursor: u64,
    stats: WalStats,
}

impl WalRing {
    #[must_use]
    pub fn new(file: Arc<FileHandle>, ring_offset: u64, capacity: u64) -> Self {
        Self {
            file,
            ring_offset,
            capacity,
            head_sequence: 0,
            tail_sequence: 0,
            tail_physical_cursor: 0,
            last_committed_sequence: 0,
            write_cursor: 0,
            stats: WalStats::default(),
        }
    }

    /// Rehydrates ring bookkeeping from a previously committed root page.
    #[allow(clippy::too_many_arguments)]
    pub fn resume(
        file: Arc<FileHandle>,
        ring_offset: u64,
        capacity: u64,
        head_sequence: u64,
        tail_sequence: u64,
        tail_physical_cursor: u64,
        last_committed_sequence: u64,
        write_cursor: u64,
    ) -> Self {
        Self {
            file,
            ring_offset,
            capacity,
            head_sequence,
            tail_sequence,
            tail_physical_cursor,
            last_committed_sequence,
            write_cursor,
            stats: WalStats::default(),
        }
    }

    #[must_use]
    pub fn head_sequence(&self) -> u64 {
        self.head_sequence
    }
    #[must_use]
    pub fn tail_sequence(&self) -> u64 {
        self.tail_sequence
    }
    #[must_use]
    pub fn tail_physical_cursor(&self) -> u64 {
        self.tail_physical_cursor
    }
    #[must_use]
    pub fn last_committed_sequence(&self) -> u64 {
        self.last_committed_sequence
    }
    #[must_use]
    pub fn write_cursor(&self) -> u64 {
        self.write_cursor
    }
    #[must_use]
    pub fn stats(&self) -> WalStats {
        self.stats.clone()
    }

    fn physical_offset(&self, ring_relative: u64) -> u64 {
        self.ring_offset + (ring_relative % self.capacity)
    }

    /// Appends a record at the current head, wrapping with a wrap-sentinel if the record
    /// would otherwise cross the physical end of the ring. Returns the assigned sequence.
    pub fn append(&mut self, kind: WalRecordKind, payload: &[u8]) -> Result<u64, WaxError> {
        let sequence = self.head_sequence + 1;
        let record = encode_record(sequence, kind, payload);
        let remaining = self.capacity - (self.write_cursor % self.capacity);
        if (record.len() as u64) > remaining {
            self.write_wrap_sentinel(remaining)?;
            self.write_cursor += remaining;
            self.stats.wrap_count += 1;
        }
        let offset = self.physical_offset(self.write_cursor);
        self.file.write_all_at(offset, &record)?;
        self.write_cursor += record.len() as u64;
        self.head_sequence = sequence;
        self.stats.pending_bytes += record.len() as u64;
        Ok(sequence)
    }

    fn write_wrap_sentinel(&mut self, filler_len: u64) -> Result<(), WaxError> {
        if filler_len == 0 {
            return Ok(());
        }
        // When the remaining space is too small to hold a well-formed record header, the
        // filler is just zero bytes; replay's `total == 0` guard treats that as the durable
        // frontier at this physical position.
        let bytes = if (filler_len as usize) >= RECORD_HEADER_LEN {
            let filler_payload_len = filler_len as usize - RECORD_HEADER_LEN;
            encode_record(self.head_sequence, WalRecordKind::WrapSentinel, &vec![0u8; filler_payload_len])
        } else {
            vec![0u8; filler_len as usize]
        };
        let offset = self.physical_offset(self.write_cursor);
        self.file.write_all_at(offset, &bytes)?;
        self.stats.sentinel_write_count += 1;
        Ok(())
    }

    /// Writes a commit-marker record, delimiting what is atomically durable.
    pub fn write_commit_marker(&mut self) -> Result<u64, WaxError> {
        let seq = self.append(WalRecordKind::CommitMarker, &[])?;
        self.last_committed_sequence = seq;
        self.stats.pending_bytes = 0;
        Ok(seq)
    }

    pub fn fsync(&self) -> Result<(), WaxError> {
        self.file.fsync()
    }

    /// Replays the ring from `from_sequence` (exclusive) forward, stopping at the first
    /// record that fails CRC or whose sequence isn't `prior + 1`. That point is the durable
    /// WAL frontier; everything past it is discarded. Always scans from the physical start of
    /// the ring; only valid while `from_sequence` is still reachable from physical offset 0
    /// (a ring that has never checkpointed past it).
    pub fn replay(&self, from_sequence: u64) -> Result<Vec<WalRecord>, WaxError> {
        Ok(self.scan_from(from_sequence)?.0)
    }

    /// Like [`replay`], but also returns the physical ring cursor immediately past the last
    /// valid record scanned — the position a resumed writer should start appending at. Scans
    /// from physical offset 0; callers resuming from a checkpointed tail must use
    /// [`scan_from_cursor`] instead, since after a checkpoint the record carrying
    /// `from_sequence + 1` is no longer necessarily at offset 0.
    pub fn scan_from(&self, from_sequence: u64) -> Result<(Vec<WalRecord>, u64), WaxError> {
        self.scan_from_cursor(from_sequence, 0)
    }

    /// Scans forward from an explicit ring-relative physical `start_cursor`, expecting the
    /// record located there to carry sequence `from_sequence + 1`. Used by `Session::rehydrate`
    /// and `Session::verify` with the tail sequence/cursor pair recorded in the active root
    /// page, so replay resumes at the position a prior checkpoint actually advanced to rather
    /// than assuming the ring has never wrapped.
    pub fn scan_from_cursor(&self, from_sequence: u64, start_cursor: u64) -> Result<(Vec<WalRecord>, u64), WaxError> {
        let mut out = Vec::new();
        let mut cursor = start_cursor;
        let mut expected = from_sequence + 1;
        loop {
            if cursor - start_cursor >= self.capacity {
                break;
            }
            let remaining = (self.capacity - (cursor % self.capacity)) as usize;
            let probe_len = remaining.min(8);
            if probe_len < 4 {
                break;
            }
            let offset = self.physical_offset(cursor);
            let Ok(len_bytes) = self.file.read_exact_at(offset, 4) else { break };
            let total = u32::from_le_bytes(len_bytes.clone().try_into().unwrap()) as usize;
            if total == 0 || total > remaining {
                break;
            }
            let Ok(buf) = self.file.read_exact_at(offset, total) else { break };
            let Some((record, _)) = decode_record(&buf) else { break };
            match record.kind {
                WalRecordKind::WrapSentinel => {
                    cursor += total as u64;
                    continue;
                }
                _ => {
                    if record.sequence != expected {
                        break;
                    }
                    expected += 1;
                    cursor += total as u64;
                    out.push(record);
                }
            }
        }
        Ok((out, cursor))
    }

    /// Advances the tail past records subsumed by a checkpoint, freeing ring space for the
    /// writer to reclaim on a future wrap. `new_tail_physical_cursor` must be the physical
    /// cursor immediately past the record carrying `new_tail_sequence` (normally the ring's
    /// current `write_cursor`, since nothing is appended between the commit marker and the
    /// checkpoint call). Never triggered mid-put.
    pub fn checkpoint(&mut self, new_tail_sequence: u64, new_tail_physical_cursor: u64) {
        self.tail_sequence = new_tail_sequence;
        self.tail_physical_cursor = new_tail_physical_cursor;
        self.stats.checkpoint_count += 1;
    }

    pub fn note_auto_commit(&mut self) {
        self.stats.auto_commit_count += 1;
    }
}

/// Serializes a catalog/index payload with bincode for storage inside a WAL record.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, WaxError> {
    Ok(encode_to_vec(value, standard())?)
}

/// Deserializes a WAL record payload previously written with [`encode_payload`].
pub fn decode_payload<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, WaxError> {
    let (value, _) = decode_from_slice(bytes, standard())?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn ring(capacity: u64) -> (WalRing, Arc<FileHandle>) {
        let tmp = NamedTempFile::new().unwrap();
        let handle = Arc::new(FileHandle::open_read_write(tmp.path(), false).unwrap());
        handle.ensure_len(capacity).unwrap();
        (WalRing::new(handle.clone(), 0, capacity), handle)
    }

    #[test]
    fn append_then_replay_recovers_records() {
        let (mut wal, _h) = ring(4096);
        wal.append(WalRecordKind::CatalogPut, b"one").unwrap();
        wal.append(WalRecordKind::CatalogPut, b"two").unwrap();
        let seq = wal.write_commit_marker().unwrap();
        assert_eq!(seq, 3);
        let records = wal.replay(0).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, b"one");
        assert_eq!(records[1].payload, b"two");
        assert_eq!(records[2].kind, WalRecordKind::CommitMarker);
    }

    #[test]
    fn replay_stops_at_corrupted_record() {
        let (mut wal, handle) = ring(4096);
        wal.append(WalRecordKind::CatalogPut, b"good").unwrap();
        wal.append(WalRecordKind::CatalogPut, b"bad").unwrap();
        // Corrupt the CRC of the second record by flipping a payload byte on disk.
        let second_offset = aligned_len(RECORD_HEADER_LEN + 4) as u64;
        let mut byte = handle.read_exact_at(second_offset + RECORD_HEADER_LEN as u64, 1).unwrap();
        byte[0] ^= 0xFF;
        handle.write_all_at(second_offset + RECORD_HEADER_LEN as u64, &byte).unwrap();
        let records = wal.replay(0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"good");
    }

    #[test]
    fn wraps_around_when_record_would_cross_ring_end() {
        // Capacity fits the first two records plus a deliberately tight remainder so the
        // third record's append must emit a wrap-sentinel and land back at the ring start.
        let (mut wal, _h) = ring(80);
        wal.append(WalRecordKind::CatalogPut, b"payload-0").unwrap();
        wal.append(WalRecordKind::CatalogPut, b"payload-1").unwrap();
        assert_eq!(wal.stats().wrap_count, 0);
        wal.append(WalRecordKind::CatalogPut, b"payload-2").unwrap();
        assert_eq!(wal.stats().wrap_count, 1);
    }
}
