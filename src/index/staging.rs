//! Staging: serializes an engine's in-memory state to an opaque blob and fingerprints it so
//! `commit` can decide whether the manifest stamp advances.
//!
//! Grounded on `src/database/index.rs`'s rebuild-then-checksum pattern (an index's on-disk
//! representation is only replaced when the rebuilt form actually differs), adapted to
//! spec §4.5's requirement that a redundant stage with identical content must not bump the
//! stamp, and that dimension mismatch against pending embeddings must be caught before any
//! bytes are written.

use crate::errors::WaxError;
use crate::index::manifest::{IndexKind, IndexManifest, Metric};
use crc32fast::Hasher;

/// The result of staging one engine's blob: the bytes to be written through the WAL plus the
/// manifest entry that should replace the current one, and whether the stamp actually moved.
#[derive(Debug, Clone)]
pub struct StagedIndex {
    pub kind: IndexKind,
    pub blob: Vec<u8>,
    pub stamp: u64,
    pub stamp_advanced: bool,
    pub doc_count: Option<u64>,
    pub vector_count: Option<u64>,
    pub dimension: Option<u32>,
    pub metric: Option<Metric>,
}

#[must_use]
fn fingerprint(blob: &[u8]) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(blob);
    // Mix the length into the high bits so a truncated-but-CRC-colliding blob is still
    // distinguishable; collisions here only cost an unnecessary stamp bump, never correctness.
    (u64::from(hasher.finalize()) << 32) | (blob.len() as u64 & 0xFFFF_FFFF)
}

/// Stages a lex engine blob against the previous manifest (if any). Does not itself decide
/// whether the previous blob bytes are available for comparison beyond the stamp: the stamp
/// is a fingerprint of content, so a stamp match is treated as "did not change".
pub fn stage_lex(blob: Vec<u8>, doc_count: u64, previous: Option<&IndexManifest>) -> StagedIndex {
    let stamp = fingerprint(&blob);
    let stamp_advanced = previous.map(|m| m.stamp != stamp).unwrap_or(true);
    StagedIndex {
        kind: IndexKind::Lex,
        blob,
        stamp,
        stamp_advanced,
        doc_count: Some(doc_count),
        vector_count: None,
        dimension: None,
        metric: None,
    }
}

/// Stages a vec engine blob. `pending_embedding_dimension` is the dimension of any embeddings
/// still buffered in the current session (not yet covered by a committed manifest); if it
/// disagrees with `dimension`, staging fails before the blob is accepted.
pub fn stage_vec(
    blob: Vec<u8>,
    vector_count: u64,
    dimension: u32,
    metric: Metric,
    pending_embedding_dimension: Option<u32>,
    previous: Option<&IndexManifest>,
) -> Result<StagedIndex, WaxError> {
    if let Some(pending_dim) = pending_embedding_dimension
        && pending_dim != dimension
    {
        return Err(WaxError::InvalidArgument(format!(
            "staged vec index dimension {dimension} does not match pending embedding dimension {pending_dim}"
        )));
    }
    let stamp = fingerprint(&blob);
    let stamp_advanced = previous.map(|m| m.stamp != stamp).unwrap_or(true);
    Ok(StagedIndex {
        kind: IndexKind::Vec,
        blob,
        stamp,
        stamp_advanced,
        doc_count: None,
        vector_count: Some(vector_count),
        dimension: Some(dimension),
        metric: Some(metric),
    })
}

/// Stages a kv engine blob (schema-opaque to the core; see spec §4.5).
pub fn stage_kv(blob: Vec<u8>, previous: Option<&IndexManifest>) -> StagedIndex {
    let stamp = fingerprint(&blob);
    let stamp_advanced = previous.map(|m| m.stamp != stamp).unwrap_or(true);
    StagedIndex {
        kind: IndexKind::Kv,
        blob,
        stamp,
        stamp_advanced,
        doc_count: None,
        vector_count: None,
        dimension: None,
        metric: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restaging_identical_blob_does_not_advance_stamp() {
        let first = stage_lex(b"blob-a".to_vec(), 3, None);
        assert!(first.stamp_advanced);
        let manifest = IndexManifest { stamp: first.stamp, ..IndexManifest::empty(IndexKind::Lex) };
        let second = stage_lex(b"blob-a".to_vec(), 3, Some(&manifest));
        assert!(!second.stamp_advanced);
        assert_eq!(first.stamp, second.stamp);
    }

    #[test]
    fn restaging_different_blob_advances_stamp() {
        let first = stage_lex(b"blob-a".to_vec(), 3, None);
        let manifest = IndexManifest { stamp: first.stamp, ..IndexManifest::empty(IndexKind::Lex) };
        let second = stage_lex(b"blob-b".to_vec(), 3, Some(&manifest));
        assert!(second.stamp_advanced);
        assert_ne!(first.stamp, second.stamp);
    }

    #[test]
    fn stage_vec_rejects_dimension_mismatch_before_accepting_blob() {
        let result = stage_vec(b"vec-blob".to_vec(), 1, 4, Metric::Cosine, Some(8), None);
        assert!(matches!(result, Err(WaxError::InvalidArgument(_))));
    }

    #[test]
    fn stage_vec_accepts_matching_dimension() {
        let result = stage_vec(b"vec-blob".to_vec(), 1, 4, Metric::Cosine, Some(4), None).unwrap();
        assert!(result.stamp_advanced);
        assert_eq!(result.dimension, Some(4));
    }
}
