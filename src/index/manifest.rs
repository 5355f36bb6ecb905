//! Index manifest: one slot per registered secondary index (lex, vec, kv).
//!
//! Grounded on `src/database/index.rs`'s `IndexDescriptor`/`INDEX_METADATA_VERSION`
//! (schema-versioned descriptor persisted alongside the data), extended with the blob
//! location and stamp fields spec §3/§6 requires for embedding a manifest inside the
//! container file instead of a sidecar JSON file.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Lex,
    Vec,
    Kv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Cosine,
    Dot,
    Euclidean,
}

/// One registered index's durable manifest entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexManifest {
    pub kind: IndexKind,
    pub schema_version: u16,
    pub blob_offset: u64,
    pub blob_length: u64,
    pub stamp: u64,
    pub doc_count: Option<u64>,
    pub vector_count: Option<u64>,
    pub dimension: Option<u32>,
    pub metric: Option<Metric>,
}

impl IndexManifest {
    #[must_use]
    pub fn empty(kind: IndexKind) -> Self {
        Self {
            kind,
            schema_version: 1,
            blob_offset: 0,
            blob_length: 0,
            stamp: 0,
            doc_count: None,
            vector_count: None,
            dimension: None,
            metric: None,
        }
    }
}

/// The full manifest table: at most one slot per `IndexKind`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexManifestTable {
    pub lex: Option<IndexManifest>,
    pub vec: Option<IndexManifest>,
    pub kv: Option<IndexManifest>,
}

impl IndexManifestTable {
    #[must_use]
    pub fn get(&self, kind: IndexKind) -> Option<&IndexManifest> {
        match kind {
            IndexKind::Lex => self.lex.as_ref(),
            IndexKind::Vec => self.vec.as_ref(),
            IndexKind::Kv => self.kv.as_ref(),
        }
    }

    pub fn set(&mut self, manifest: IndexManifest) {
        match manifest.kind {
            IndexKind::Lex => self.lex = Some(manifest),
            IndexKind::Vec => self.vec = Some(manifest),
            IndexKind::Kv => self.kv = Some(manifest),
        }
    }
}
