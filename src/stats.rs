//! Store-level observability surface: aggregates WAL pressure counters with catalog and
//! index-manifest sizes into one snapshot for `Session::stats`/`wal_stats` (spec §4.2, §6).

use crate::container::wal::WalStats;
use crate::index::manifest::IndexManifestTable;

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub wal: WalStats,
    pub committed_frame_count: usize,
    pub pending_frame_count: usize,
    pub lex_doc_count: Option<u64>,
    pub vec_vector_count: Option<u64>,
}

impl StoreStats {
    #[must_use]
    pub fn collect(
        wal: WalStats,
        committed_frame_count: usize,
        pending_frame_count: usize,
        index_table: &IndexManifestTable,
    ) -> Self {
        Self {
            wal,
            committed_frame_count,
            pending_frame_count,
            lex_doc_count: index_table.lex.as_ref().and_then(|m| m.doc_count),
            vec_vector_count: index_table.vec.as_ref().and_then(|m| m.vector_count),
        }
    }
}
