//! Shared domain types used across the container, catalog, index, and search layers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A 64-bit monotonic frame identifier, dense and assigned in strict insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FrameId {
    fn from(v: u64) -> Self {
        FrameId(v)
    }
}

/// The role a frame plays in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Document,
    Chunk,
    Blob,
    System,
    Surrogate,
    Segment,
    Root,
}

/// Lifecycle status of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameStatus {
    Active,
    Superseded,
    Deleted,
}

/// Canonical encoding of the bytes a payload was stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    Plain,
    CompressedLzfseLike,
}

/// A (offset, length, encoding) descriptor for a payload region slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    pub offset: u64,
    pub length: u64,
    pub encoding: Codec,
}

/// Dimension + vector-index reference for a frame's embedding, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingDescriptor {
    pub dimension: u32,
    /// Monotonically increasing sequence number assigned when the embedding was buffered.
    pub sequence: u64,
}

/// String->string attached metadata, plus tag pairs, label set, and an optional search-text
/// mirror used by the text lane without re-decoding the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub fields: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub labels: Vec<String>,
    pub search_text: Option<String>,
}

impl FrameMetadata {
    #[must_use]
    pub fn matches_required(&self, required: &[(String, String)], tags: &[String], labels: &[String]) -> bool {
        required.iter().all(|(k, v)| self.fields.get(k).is_some_and(|existing| existing == v))
            && tags.iter().all(|t| self.tags.iter().any(|x| x == t))
            && labels.iter().all(|l| self.labels.iter().any(|x| x == l))
    }
}

/// Options accepted by `put`/`put_batch`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub kind: String,
    pub role: Option<Role>,
    pub parent_id: Option<FrameId>,
    pub chunk_index: Option<u32>,
    pub chunk_count: Option<u32>,
    pub metadata: FrameMetadata,
}

/// Allow-list / predicate filter applied to hybrid search lanes before fusion.
#[derive(Debug, Clone, Default)]
pub struct FrameFilter {
    pub allow_ids: Option<std::collections::BTreeSet<FrameId>>,
    pub required_tags: Vec<String>,
    pub required_labels: Vec<String>,
    pub required_metadata: Vec<(String, String)>,
}

impl FrameFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allow_ids.is_none()
            && self.required_tags.is_empty()
            && self.required_labels.is_empty()
            && self.required_metadata.is_empty()
    }

    #[must_use]
    pub fn matches(&self, id: FrameId, metadata: &FrameMetadata) -> bool {
        if let Some(allow) = &self.allow_ids
            && !allow.contains(&id)
        {
            return false;
        }
        metadata.matches_required(&self.required_metadata, &self.required_tags, &self.required_labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_filter_empty_matches_everything() {
        let f = FrameFilter::default();
        assert!(f.is_empty());
        assert!(f.matches(FrameId(5), &FrameMetadata::default()));
    }

    #[test]
    fn frame_filter_allow_list_excludes_others() {
        let mut allow = std::collections::BTreeSet::new();
        allow.insert(FrameId(1));
        let f = FrameFilter { allow_ids: Some(allow), ..Default::default() };
        assert!(f.matches(FrameId(1), &FrameMetadata::default()));
        assert!(!f.matches(FrameId(2), &FrameMetadata::default()));
    }

    #[test]
    fn frame_filter_required_metadata_must_all_match() {
        let mut meta = FrameMetadata::default();
        meta.fields.insert("asset".into(), "photo-1".into());
        let f = FrameFilter {
            required_metadata: vec![("asset".into(), "photo-1".into())],
            ..Default::default()
        };
        assert!(f.matches(FrameId(1), &meta));
        let f2 = FrameFilter {
            required_metadata: vec![("asset".into(), "photo-2".into())],
            ..Default::default()
        };
        assert!(!f2.matches(FrameId(1), &meta));
    }
}
