//! The frame catalog: assigns monotonic frame ids, tracks supersession/deletion, and
//! resolves reads against a committed view overlaid with the current session's pending
//! mutations.
//!
//! Grounded on `src/collection/core.rs` (`Collection` holding records behind a lock with a
//! cache in front) and `src/engine.rs` (collection registry), narrowed to the single
//! append-only catalog of spec §4.4. `frame_id` density/monotonicity and supersession/delete
//! semantics are exactly as specified; nothing here performs file or WAL I/O — `Session`
//! orchestrates that and calls into this catalog for bookkeeping only.

use crate::catalog::frame::Frame;
use crate::errors::WaxError;
use crate::types::{EmbeddingDescriptor, FrameId, FrameMetadata, FrameStatus, PayloadDescriptor, PutOptions, Role};
use std::collections::BTreeMap;

#[derive(Default)]
pub struct FrameCatalog {
    committed: BTreeMap<FrameId, Frame>,
    pending: BTreeMap<FrameId, Frame>,
    next_id: u64,
}

impl FrameCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self { committed: BTreeMap::new(), pending: BTreeMap::new(), next_id: 0 }
    }

    #[must_use]
    pub fn next_frame_id(&self) -> FrameId {
        FrameId(self.next_id)
    }

    fn exists(&self, id: FrameId) -> bool {
        self.pending.contains_key(&id) || self.committed.contains_key(&id)
    }

    /// Validates and records one frame's bookkeeping. The caller (`Session`) is responsible
    /// for having already written the payload and the catalog-put WAL record before invoking
    /// this; on success the assigned id becomes visible via `frame_meta`/pending lookups.
    pub fn put(
        &mut self,
        options: &PutOptions,
        payload: PayloadDescriptor,
        timestamp_override: Option<i64>,
        default_timestamp_ms: u64,
    ) -> Result<FrameId, WaxError> {
        if let Some(parent) = options.parent_id
            && !self.exists(parent)
        {
            return Err(WaxError::InvalidArgument(format!("parent_id {parent} does not refer to an existing frame")));
        }
        if let (Some(idx), Some(count)) = (options.chunk_index, options.chunk_count)
            && idx >= count
        {
            return Err(WaxError::InvalidArgument(format!("chunk_index {idx} must be < chunk_count {count}")));
        }
        let timestamp_ms = match timestamp_override {
            Some(t) if t < 0 => {
                return Err(WaxError::InvalidArgument("timestamp_override must be a non-negative integer".into()));
            }
            Some(t) => t as u64,
            None => default_timestamp_ms,
        };
        let id = FrameId(self.next_id);
        self.next_id += 1;
        let frame = Frame {
            frame_id: id,
            kind: options.kind.clone(),
            role: options.role.unwrap_or(Role::Document),
            parent_id: options.parent_id,
            timestamp_ms,
            chunk_index: options.chunk_index,
            chunk_count: options.chunk_count,
            payload,
            metadata: options.metadata.clone(),
            embedding: None,
            status: FrameStatus::Active,
            superseded_by: None,
        };
        self.pending.insert(id, frame);
        Ok(id)
    }

    /// Pre-validates an entire batch against the constraints `put` enforces, without
    /// mutating any state or requiring the caller to have written payload bytes yet. A
    /// later item's `parent_id` may reference an earlier item in the same batch (the ids
    /// that batch item will receive are predictable from the current `next_id` counter).
    /// Used by `Session::put_batch` to make the batch all-or-nothing at WAL boundaries:
    /// nothing is appended to the WAL until every item in the batch is known to be valid
    /// (spec §4.4, §8).
    pub fn validate_batch(&self, items: &[(&PutOptions, Option<i64>)]) -> Result<(), WaxError> {
        let mut would_exist: std::collections::BTreeSet<FrameId> = std::collections::BTreeSet::new();
        let mut next = self.next_id;
        for (options, timestamp_override) in items {
            if let Some(parent) = options.parent_id
                && !self.exists(parent)
                && !would_exist.contains(&parent)
            {
                return Err(WaxError::InvalidArgument(format!(
                    "parent_id {parent} does not refer to an existing frame"
                )));
            }
            if let (Some(idx), Some(count)) = (options.chunk_index, options.chunk_count)
                && idx >= count
            {
                return Err(WaxError::InvalidArgument(format!("chunk_index {idx} must be < chunk_count {count}")));
            }
            if let Some(t) = timestamp_override
                && *t < 0
            {
                return Err(WaxError::InvalidArgument("timestamp_override must be a non-negative integer".into()));
            }
            would_exist.insert(FrameId(next));
            next += 1;
        }
        Ok(())
    }

    /// Attaches an embedding descriptor to a pending or committed frame. Used by the
    /// embedding pipeline (`put_embedding`).
    pub fn attach_embedding(&mut self, id: FrameId, descriptor: EmbeddingDescriptor) -> Result<(), WaxError> {
        if let Some(f) = self.pending.get_mut(&id) {
            f.embedding = Some(descriptor);
            return Ok(());
        }
        if self.committed.contains_key(&id) {
            // Mutating a committed frame in place would violate immutability of the
            // committed view; stage an overlay copy instead.
            let mut copy = self.committed[&id].clone();
            copy.embedding = Some(descriptor);
            self.pending.insert(id, copy);
            return Ok(());
        }
        Err(WaxError::NotFound(format!("frame {id} not found")))
    }

    /// Marks `old_id` as superseded by `new_id`. A no-op if `old_id` is already superseded by
    /// a later id (concurrent pending supersede idempotency, spec §5).
    pub fn supersede(&mut self, old_id: FrameId, new_id: FrameId) -> Result<(), WaxError> {
        if !self.exists(new_id) {
            return Err(WaxError::InvalidArgument(format!("supersede target {new_id} does not exist")));
        }
        let new_is_superseded = self.frame_meta(new_id).is_some_and(|f| matches!(f.status, FrameStatus::Superseded));
        if new_is_superseded {
            return Err(WaxError::InvalidArgument(format!("supersede target {new_id} is itself superseded")));
        }
        let mut frame = match self.frame_meta(old_id) {
            Some(f) => f.clone(),
            None => return Err(WaxError::InvalidArgument(format!("supersede source {old_id} does not exist"))),
        };
        if matches!(frame.status, FrameStatus::Superseded) && frame.superseded_by.is_some_and(|b| b != new_id) {
            // Already superseded by a (later) id; concurrent duplicate supersede is a no-op.
            return Ok(());
        }
        frame.status = FrameStatus::Superseded;
        frame.superseded_by = Some(new_id);
        self.pending.insert(old_id, frame);
        Ok(())
    }

    pub fn delete(&mut self, id: FrameId) -> Result<(), WaxError> {
        let mut frame = match self.frame_meta(id) {
            Some(f) => f.clone(),
            None => return Err(WaxError::NotFound(format!("frame {id} not found"))),
        };
        frame.status = FrameStatus::Deleted;
        self.pending.insert(id, frame);
        Ok(())
    }

    /// Deletes every active frame whose metadata carries `asset_id` under the given field.
    pub fn delete_by_metadata(&mut self, field: &str, value: &str) -> Result<Vec<FrameId>, WaxError> {
        let ids: Vec<FrameId> = self
            .frame_metas()
            .into_iter()
            .filter(|f| f.metadata.fields.get(field).is_some_and(|v| v == value))
            .map(|f| f.frame_id)
            .collect();
        for id in &ids {
            self.delete(*id)?;
        }
        Ok(ids.clone())
    }

    /// Inserts a frame exactly as recorded by a WAL catalog-put record, bypassing the
    /// constraint checks `put` performs (the log is trusted: those checks already ran when
    /// the record was first written). Used only by WAL replay during session open.
    pub fn replay_put(&mut self, frame: Frame) {
        self.next_id = self.next_id.max(frame.frame_id.0 + 1);
        self.pending.insert(frame.frame_id, frame);
    }

    /// Applies a recorded supersede without re-validating its targets; see [`replay_put`].
    pub fn replay_supersede(&mut self, old_id: FrameId, new_id: FrameId) {
        if let Some(existing) = self.frame_meta(old_id) {
            let mut frame = existing.clone();
            frame.status = FrameStatus::Superseded;
            frame.superseded_by = Some(new_id);
            self.pending.insert(old_id, frame);
        }
    }

    /// Applies a recorded delete without re-validating its target; see [`replay_put`].
    pub fn replay_delete(&mut self, id: FrameId) {
        if let Some(existing) = self.frame_meta(id) {
            let mut frame = existing.clone();
            frame.status = FrameStatus::Deleted;
            self.pending.insert(id, frame);
        }
    }

    #[must_use]
    pub fn frame_meta(&self, id: FrameId) -> Option<&Frame> {
        self.pending.get(&id).or_else(|| self.committed.get(&id))
    }

    #[must_use]
    pub fn frame_metas_including_pending(&self, ids: &[FrameId]) -> Vec<Frame> {
        ids.iter().filter_map(|id| self.frame_meta(*id).cloned()).collect()
    }

    /// All frames visible to this session: committed frames overlaid with pending mutations.
    #[must_use]
    pub fn frame_metas(&self) -> Vec<Frame> {
        let mut merged: BTreeMap<FrameId, Frame> = self.committed.clone();
        for (id, frame) in &self.pending {
            merged.insert(*id, frame.clone());
        }
        merged.into_values().collect()
    }

    /// Frames that pass default search visibility: active status only.
    #[must_use]
    pub fn searchable_frames(&self) -> Vec<Frame> {
        self.frame_metas().into_iter().filter(Frame::is_queryable_by_default).collect()
    }

    /// Moves all pending mutations into the committed view. Called by the commit
    /// coordinator after the WAL has been durably fsynced and the new root installed.
    pub fn commit_pending(&mut self) {
        for (id, frame) in self.pending.drain() {
            self.committed.insert(id, frame);
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    /// Rehydrates the committed view directly (used when opening a file whose WAL has
    /// already been replayed into concrete frames by the commit coordinator).
    pub fn load_committed(&mut self, frames: Vec<Frame>, next_id: u64) {
        self.committed = frames.into_iter().map(|f| (f.frame_id, f)).collect();
        self.next_id = next_id.max(self.next_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Codec;

    fn descriptor() -> PayloadDescriptor {
        PayloadDescriptor { offset: 0, length: 0, encoding: Codec::Plain }
    }

    #[test]
    fn put_assigns_dense_monotonic_ids() {
        let mut cat = FrameCatalog::new();
        for i in 0..5 {
            let id = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
            assert_eq!(id.0, i);
        }
    }

    #[test]
    fn validate_batch_allows_parent_reference_to_earlier_item_in_same_batch() {
        let cat = FrameCatalog::new();
        let first = PutOptions::default();
        let second = PutOptions { parent_id: Some(FrameId(0)), ..Default::default() };
        assert!(cat.validate_batch(&[(&first, None), (&second, None)]).is_ok());
    }

    #[test]
    fn validate_batch_rejects_if_any_item_is_invalid() {
        let cat = FrameCatalog::new();
        let ok = PutOptions::default();
        let bad = PutOptions { chunk_index: Some(2), chunk_count: Some(2), ..Default::default() };
        assert!(matches!(
            cat.validate_batch(&[(&ok, None), (&bad, None)]),
            Err(WaxError::InvalidArgument(_))
        ));
    }

    #[test]
    fn put_rejects_missing_parent() {
        let mut cat = FrameCatalog::new();
        let opts = PutOptions { parent_id: Some(FrameId(99)), ..Default::default() };
        assert!(matches!(cat.put(&opts, descriptor(), None, 0), Err(WaxError::InvalidArgument(_))));
    }

    #[test]
    fn put_rejects_bad_chunk_index() {
        let mut cat = FrameCatalog::new();
        let opts = PutOptions { chunk_index: Some(3), chunk_count: Some(3), ..Default::default() };
        assert!(matches!(cat.put(&opts, descriptor(), None, 0), Err(WaxError::InvalidArgument(_))));
    }

    #[test]
    fn put_rejects_negative_timestamp() {
        let mut cat = FrameCatalog::new();
        assert!(matches!(cat.put(&PutOptions::default(), descriptor(), Some(-1), 0), Err(WaxError::InvalidArgument(_))));
    }

    #[test]
    fn supersede_excludes_old_from_default_search_keeps_content() {
        let mut cat = FrameCatalog::new();
        let a = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        let b = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        cat.supersede(a, b).unwrap();
        assert!(!cat.searchable_frames().iter().any(|f| f.frame_id == a));
        assert!(cat.searchable_frames().iter().any(|f| f.frame_id == b));
        assert_eq!(cat.frame_meta(a).unwrap().superseded_by, Some(b));
        // Content remains queryable by explicit id lookup.
        assert!(cat.frame_meta(a).is_some());
    }

    #[test]
    fn supersede_fails_when_target_missing() {
        let mut cat = FrameCatalog::new();
        let a = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        assert!(cat.supersede(a, FrameId(42)).is_err());
    }

    #[test]
    fn duplicate_supersede_by_later_id_is_noop() {
        let mut cat = FrameCatalog::new();
        let a = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        let b = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        let c = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        cat.supersede(a, b).unwrap();
        cat.supersede(a, c).unwrap();
        // First supersede wins; the later duplicate call does not overwrite it.
        assert_eq!(cat.frame_meta(a).unwrap().superseded_by, Some(b));
    }

    #[test]
    fn delete_removes_from_default_search() {
        let mut cat = FrameCatalog::new();
        let a = cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        cat.delete(a).unwrap();
        assert!(!cat.searchable_frames().iter().any(|f| f.frame_id == a));
        assert!(cat.frame_meta(a).is_some());
    }

    #[test]
    fn replay_put_bumps_next_id_past_the_recorded_frame() {
        let mut cat = FrameCatalog::new();
        let frame = Frame {
            frame_id: FrameId(7),
            kind: "doc".into(),
            role: Role::Document,
            parent_id: None,
            timestamp_ms: 0,
            chunk_index: None,
            chunk_count: None,
            payload: descriptor(),
            metadata: Default::default(),
            embedding: None,
            status: FrameStatus::Active,
            superseded_by: None,
        };
        cat.replay_put(frame);
        assert_eq!(cat.next_frame_id(), FrameId(8));
        assert!(cat.frame_meta(FrameId(7)).is_some());
    }

    #[test]
    fn commit_pending_moves_frames_into_committed_view() {
        let mut cat = FrameCatalog::new();
        cat.put(&PutOptions::default(), descriptor(), None, 0).unwrap();
        assert!(cat.has_pending());
        cat.commit_pending();
        assert!(!cat.has_pending());
        assert_eq!(cat.committed_count(), 1);
    }
}
