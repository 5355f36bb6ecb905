//! Hybrid text/vector search (spec §4.7) and the RAG context builder on top of it (spec §4.8).

pub mod hybrid;
pub mod rag;

pub use hybrid::{fuse, Lane, LaneContribution, SearchHit, SearchMode, TieBreakReason};
pub use rag::{build_context, ContextItem, ContextMode, ItemKind, RagBuilderConfig, RagContext, SurrogateLookup, TokenCounter};
