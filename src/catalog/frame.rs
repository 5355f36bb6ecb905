//! The frame: the catalog unit. Grounded on `src/document/core.rs` (id-addressed record with
//! status/metadata), transformed from a mutable BSON document to the immutable-payload model
//! of spec §3/§4.4 — relationships (`parent_id`, `superseded_by`) are stored as ids, never as
//! owning pointers, per spec §9's arena-indexed-references note.

use crate::types::{EmbeddingDescriptor, FrameId, FrameMetadata, FrameStatus, PayloadDescriptor, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: FrameId,
    pub kind: String,
    pub role: Role,
    pub parent_id: Option<FrameId>,
    pub timestamp_ms: u64,
    pub chunk_index: Option<u32>,
    pub chunk_count: Option<u32>,
    pub payload: PayloadDescriptor,
    pub metadata: FrameMetadata,
    pub embedding: Option<EmbeddingDescriptor>,
    pub status: FrameStatus,
    pub superseded_by: Option<FrameId>,
}

impl Frame {
    #[must_use]
    pub fn is_queryable_by_default(&self) -> bool {
        matches!(self.status, FrameStatus::Active)
    }
}
