//! Secondary index manifest, staging protocol, and capability traits for external engines
//! (spec §4.5).

pub mod engine;
pub mod manifest;
pub mod staging;

pub use engine::{
    BruteForceVecEngine, GpuBufferGuard, GpuBufferPool, GpuBruteForceVecEngine, InvertedIndexLexEngine, KvEngine,
    LexEngine, LexHit, VecEngine, VecHit,
};
pub use manifest::{IndexKind, IndexManifest, IndexManifestTable, Metric};
pub use staging::{stage_kv, stage_lex, stage_vec, StagedIndex};
