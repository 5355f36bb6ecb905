#![forbid(unsafe_code)]

//! Wax: an embedded single-file append-log storage engine for RAG workloads, combining a
//! WAL-backed frame catalog with pluggable text/vector/KV secondary indexes and a
//! reciprocal-rank-fusion hybrid search layer.
//!
//! `Store`/`Session` play the role of a thin facade over the underlying engine, narrowed to
//! the single-file, single-writer model spec §4/§5 describes. See `DESIGN.md` for the full
//! grounding ledger.

pub mod catalog;
pub mod commit;
pub mod config;
pub mod container;
pub mod errors;
pub mod index;
pub mod logger;
pub mod search;
pub mod session;
pub mod stats;
pub mod types;

pub use catalog::{Frame, FrameCatalog};
pub use commit::CommitGuard;
pub use config::{SessionWaitPolicy, StoreOptions, VectorEnginePreference};
pub use errors::{WaxError, WaxResult};
pub use index::{
    stage_kv, stage_lex, stage_vec, BruteForceVecEngine, GpuBufferGuard, GpuBufferPool, GpuBruteForceVecEngine,
    IndexKind, IndexManifest, IndexManifestTable, InvertedIndexLexEngine, KvEngine, LexEngine, LexHit, Metric,
    StagedIndex, VecEngine, VecHit,
};
pub use search::{
    build_context, ContextItem, ContextMode, ItemKind, Lane, LaneContribution, RagBuilderConfig, RagContext,
    SearchHit, SearchMode, SurrogateLookup, TieBreakReason, TokenCounter,
};
pub use session::{SearchRequest, Session, Store, VectorIndexOptions};
pub use stats::StoreStats;
pub use types::{
    Codec, EmbeddingDescriptor, FrameFilter, FrameId, FrameMetadata, FrameStatus, PayloadDescriptor, PutOptions, Role,
};

/// Initializes file-backed logging for diagnostics. Optional; callers that skip this get the
/// default `log` no-op logger.
///
/// # Errors
/// Returns an error if a logger has already been installed for this process, or if the log
/// file cannot be created.
pub fn init_logging(store_path: &std::path::Path, level: log::LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    logger::init_for_store(store_path, level)
}
