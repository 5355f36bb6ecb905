//! Commit coordinator: drains the WAL to durable storage, publishes a new root page, and
//! moves the session's pending view into the committed view.
//!
//! Grounded on `src/wasp.rs`'s `CowTree::group_commit` (drain log → fsync → write new
//! manifest page → fsync → checkpoint), narrowed to the single-writer, single-file sequence
//! spec §4.6 specifies. Catalog and index-manifest state are rebuilt from WAL replay on open
//! (see `Container::open` + `crate::session`), so the root page's `index_manifest_table_offset`
//! / `state_snapshot_offset` fields point at an optional best-effort snapshot blob used only
//! to skip a full WAL replay on reopen; see the Open Questions resolution in `DESIGN.md`.

use crate::catalog::FrameCatalog;
use crate::container::wal::{encode_payload, WalRing};
use crate::container::{payload::PayloadStore, Container};
use crate::errors::WaxError;
use crate::index::manifest::{IndexKind, IndexManifestTable};
use log::{debug, info};
use std::collections::HashMap;

/// Per-commit context describing whether this session has embeddings pending without a
/// matching staged vector index, per spec §4.5's commit refusal rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitGuard {
    pub has_pending_embeddings: bool,
    pub vec_index_staged_this_session: bool,
}

impl CommitGuard {
    fn check(&self) -> Result<(), WaxError> {
        if self.has_pending_embeddings && !self.vec_index_staged_this_session {
            return Err(WaxError::InvalidArgument(
                "vector index must be staged before committing embeddings".into(),
            ));
        }
        Ok(())
    }
}

/// Runs one commit: validates the embedding/staging invariant, forces the WAL durable,
/// snapshots the index manifest table, publishes a new root page, and moves the catalog's
/// pending mutations into its committed view. On success the previous pending state is gone;
/// on failure nothing durable has changed and the session's pending state is left untouched.
pub fn commit(
    guard: CommitGuard,
    container: &mut Container,
    wal: &mut WalRing,
    payload: &mut PayloadStore,
    catalog: &mut FrameCatalog,
    index_table: &IndexManifestTable,
    index_blobs: &HashMap<IndexKind, Vec<u8>>,
) -> Result<(), WaxError> {
    guard.check()?;

    let marker_sequence = wal.write_commit_marker()?;
    wal.fsync()?;
    debug!("commit: wal durable up to sequence {marker_sequence}");

    let snapshot_descriptor = snapshot_state(payload, catalog, index_table, index_blobs)?;

    // Everything up to and including the commit marker is now captured by the snapshot just
    // written, so the WAL tail can advance past it: a future reopen loads the snapshot instead
    // of replaying these records, and the ring is free to reclaim their physical space on wrap.
    let tail_physical_cursor = wal.write_cursor();
    wal.checkpoint(marker_sequence, tail_physical_cursor);

    let mut next = container.active_root.next_epoch();
    next.wal_head_sequence = wal.head_sequence();
    next.wal_tail_sequence = wal.tail_sequence();
    next.wal_tail_physical_cursor = wal.tail_physical_cursor();
    next.wal_last_committed_sequence = wal.last_committed_sequence();
    next.payload_next_free_offset = payload.next_free_offset();
    next.state_snapshot_offset = snapshot_descriptor.offset;
    next.state_snapshot_length = snapshot_descriptor.length;

    container.install_root(next)?;
    catalog.commit_pending();

    info!("commit: installed root epoch {} (slot {})", container.active_root.epoch, container.active_slot);
    Ok(())
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Snapshot {
    frames: Vec<crate::catalog::frame::Frame>,
    index_table: IndexManifestTable,
    index_blobs: HashMap<IndexKind, Vec<u8>>,
}

/// Snapshot of the committed catalog, index manifest table, and serialized index engine blobs,
/// written as a single bincode blob appended to the payload region. Read back by
/// `Session::rehydrate` as the base state a reopen seeds from, so the WAL only needs to carry
/// (and the ring only needs to retain) records written after the snapshot's commit.
fn snapshot_state(
    payload: &mut PayloadStore,
    catalog: &FrameCatalog,
    index_table: &IndexManifestTable,
    index_blobs: &HashMap<IndexKind, Vec<u8>>,
) -> Result<crate::types::PayloadDescriptor, WaxError> {
    let snapshot = Snapshot { frames: catalog.frame_metas(), index_table: index_table.clone(), index_blobs: index_blobs.clone() };
    let bytes = encode_payload(&snapshot)?;
    payload.append(&bytes, crate::types::Codec::Plain)
}

/// Decodes a snapshot previously written by [`snapshot_state`]. `Session::rehydrate` loads this
/// as its base committed view, then replays only the WAL records after the root's recorded
/// tail sequence on top of it.
#[allow(clippy::type_complexity)]
pub fn load_snapshot(
    payload: &PayloadStore,
    descriptor: crate::types::PayloadDescriptor,
) -> Result<(Vec<crate::catalog::frame::Frame>, IndexManifestTable, HashMap<IndexKind, Vec<u8>>), WaxError> {
    let bytes = payload.read(descriptor)?;
    let snapshot: Snapshot = crate::container::wal::decode_payload(&bytes)?;
    Ok((snapshot.frames, snapshot.index_table, snapshot.index_blobs))
}
