//! Hybrid search: runs text and vector lanes, filters, fuses with weighted RRF, and produces
//! a deterministic, tie-broken ordering plus optional diagnostics.
//!
//! Grounded on `src/query/planner.rs`'s multi-source merge-then-rank pipeline (gather
//! candidates from each index, score, then stable-sort), replacing its single-source scoring
//! with the weighted reciprocal-rank-fusion formula of spec §4.7.

use crate::catalog::Frame;
use crate::index::engine::{LexHit, VecHit};
use crate::types::{FrameFilter, FrameId, FrameStatus};
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    TextOnly,
    VectorOnly,
    Hybrid { alpha: f64 },
}

impl SearchMode {
    /// Returns `(w_text, w_vec)` per spec §4.7.
    #[must_use]
    pub fn weights(self) -> (f64, f64) {
        match self {
            SearchMode::TextOnly => (1.0, 0.0),
            SearchMode::VectorOnly => (0.0, 1.0),
            SearchMode::Hybrid { alpha } => (alpha, 1.0 - alpha),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Text,
    Vector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakReason {
    UniqueScore,
    LaneRank,
    FrameId,
}

#[derive(Debug, Clone)]
pub struct LaneContribution {
    pub lane: Lane,
    pub weight: f64,
    pub rank: usize,
    pub rrf_score: f64,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub frame_id: FrameId,
    pub fused_score: f64,
    pub best_lane_rank: usize,
    pub preview: Option<String>,
    pub lane_contributions: Vec<LaneContribution>,
    pub tie_break_reason: TieBreakReason,
}

/// A single lane's raw ranked results before fusion, already filtered to active/queryable
/// frames and any caller-supplied `FrameFilter`.
fn filter_lex(hits: Vec<LexHit>, filter: &FrameFilter, frames: &BTreeMap<FrameId, Frame>) -> Vec<LexHit> {
    hits.into_iter()
        .filter(|h| passes_filter(h.frame_id, filter, frames))
        .collect()
}

fn filter_vec(hits: Vec<VecHit>, filter: &FrameFilter, frames: &BTreeMap<FrameId, Frame>) -> Vec<VecHit> {
    hits.into_iter()
        .filter(|h| passes_filter(h.frame_id, filter, frames))
        .collect()
}

fn passes_filter(id: FrameId, filter: &FrameFilter, frames: &BTreeMap<FrameId, Frame>) -> bool {
    let Some(frame) = frames.get(&id) else { return false };
    if matches!(frame.status, FrameStatus::Superseded | FrameStatus::Deleted) {
        return false;
    }
    filter.is_empty() || filter.matches(id, &frame.metadata)
}

/// Runs weighted RRF fusion over already-filtered lane results. `rrf_k` is the caller's
/// effective K (already clamped via `StoreOptions::effective_rrf_k`).
pub fn fuse(
    lex_hits: Vec<LexHit>,
    vec_hits: Vec<VecHit>,
    mode: SearchMode,
    rrf_k: f64,
    top_k: usize,
    preview_max_bytes: usize,
    filter: &FrameFilter,
    frames: &BTreeMap<FrameId, Frame>,
    read_preview: impl Fn(FrameId, usize) -> Option<String>,
) -> Vec<SearchHit> {
    let (w_text, w_vec) = mode.weights();
    let lex_hits = filter_lex(lex_hits, filter, frames);
    let vec_hits = filter_vec(vec_hits, filter, frames);

    let mut contributions: BTreeMap<FrameId, Vec<LaneContribution>> = BTreeMap::new();
    if w_text > 0.0 {
        for (idx, hit) in lex_hits.iter().enumerate() {
            let rank = idx + 1;
            let rrf = w_text / (rrf_k + rank as f64);
            contributions.entry(hit.frame_id).or_default().push(LaneContribution {
                lane: Lane::Text,
                weight: w_text,
                rank,
                rrf_score: rrf,
            });
        }
    }
    if w_vec > 0.0 {
        for (idx, hit) in vec_hits.iter().enumerate() {
            let rank = idx + 1;
            let rrf = w_vec / (rrf_k + rank as f64);
            contributions.entry(hit.frame_id).or_default().push(LaneContribution {
                lane: Lane::Vector,
                weight: w_vec,
                rank,
                rrf_score: rrf,
            });
        }
    }

    let mut scored: Vec<(FrameId, f64, usize, Vec<LaneContribution>)> = contributions
        .into_iter()
        .map(|(id, contribs)| {
            let fused: f64 = contribs.iter().map(|c| c.rrf_score).sum();
            let best_rank = contribs.iter().map(|c| c.rank).min().unwrap_or(usize::MAX);
            (id, fused, best_rank, contribs)
        })
        .collect();

    // Deterministic ordering: fused score desc, best lane rank asc, frame id asc.
    scored.sort_by(|a, b| {
        OrderedFloat(b.1).cmp(&OrderedFloat(a.1)).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0))
    });

    let mut results = Vec::with_capacity(top_k.min(scored.len()));
    for (idx, (id, fused_score, best_lane_rank, lane_contributions)) in scored.into_iter().take(top_k).enumerate() {
        let tie_break_reason = classify_tie_break(idx, &results, fused_score, best_lane_rank);
        let preview = if preview_max_bytes > 0 { read_preview(id, preview_max_bytes) } else { None };
        results.push(SearchHit {
            frame_id: id,
            fused_score,
            best_lane_rank,
            preview,
            lane_contributions,
            tie_break_reason,
        });
    }
    results
}

fn classify_tie_break(idx: usize, so_far: &[SearchHit], fused_score: f64, best_lane_rank: usize) -> TieBreakReason {
    let Some(prev) = (idx > 0).then(|| &so_far[idx - 1]) else { return TieBreakReason::UniqueScore };
    if (prev.fused_score - fused_score).abs() > 1e-9 {
        TieBreakReason::UniqueScore
    } else if prev.best_lane_rank != best_lane_rank {
        TieBreakReason::LaneRank
    } else {
        TieBreakReason::FrameId
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Codec, FrameMetadata, PayloadDescriptor, Role};

    fn frame(id: u64, status: FrameStatus) -> Frame {
        Frame {
            frame_id: FrameId(id),
            kind: "doc".into(),
            role: Role::Document,
            parent_id: None,
            timestamp_ms: 0,
            chunk_index: None,
            chunk_count: None,
            payload: PayloadDescriptor { offset: 0, length: 0, encoding: Codec::Plain },
            metadata: FrameMetadata::default(),
            embedding: None,
            status,
            superseded_by: None,
        }
    }

    #[test]
    fn fuses_text_and_vector_lanes_by_weighted_rrf() {
        let mut frames = BTreeMap::new();
        frames.insert(FrameId(0), frame(0, FrameStatus::Active));
        frames.insert(FrameId(1), frame(1, FrameStatus::Active));
        let lex = vec![LexHit { frame_id: FrameId(1), score: 1.0, snippet: None }];
        let vec_hits = vec![VecHit { frame_id: FrameId(0), similarity: 0.9 }];
        let hits = fuse(
            lex,
            vec_hits,
            SearchMode::Hybrid { alpha: 0.5 },
            60.0,
            10,
            0,
            &FrameFilter::default(),
            &frames,
            |_, _| None,
        );
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn tie_break_orders_by_frame_id_ascending() {
        let mut frames = BTreeMap::new();
        frames.insert(FrameId(5), frame(5, FrameStatus::Active));
        frames.insert(FrameId(2), frame(2, FrameStatus::Active));
        let lex = vec![
            LexHit { frame_id: FrameId(5), score: 1.0, snippet: None },
            LexHit { frame_id: FrameId(2), score: 1.0, snippet: None },
        ];
        let hits = fuse(lex, vec![], SearchMode::TextOnly, 60.0, 10, 0, &FrameFilter::default(), &frames, |_, _| None);
        // Both ranked at distinct lane ranks (1 and 2), so first result keeps lane-rank order,
        // not frame id: rank 1 (frame 5) scores higher than rank 2 (frame 2).
        assert_eq!(hits[0].frame_id, FrameId(5));
    }

    #[test]
    fn excludes_superseded_and_deleted_frames() {
        let mut frames = BTreeMap::new();
        frames.insert(FrameId(0), frame(0, FrameStatus::Superseded));
        frames.insert(FrameId(1), frame(1, FrameStatus::Deleted));
        let lex = vec![
            LexHit { frame_id: FrameId(0), score: 1.0, snippet: None },
            LexHit { frame_id: FrameId(1), score: 1.0, snippet: None },
        ];
        let hits = fuse(lex, vec![], SearchMode::TextOnly, 60.0, 10, 0, &FrameFilter::default(), &frames, |_, _| None);
        assert!(hits.is_empty());
    }

    #[test]
    fn repeated_fusion_is_deterministic() {
        let mut frames = BTreeMap::new();
        frames.insert(FrameId(0), frame(0, FrameStatus::Active));
        frames.insert(FrameId(1), frame(1, FrameStatus::Active));
        let make_lex = || {
            vec![
                LexHit { frame_id: FrameId(0), score: 1.0, snippet: None },
                LexHit { frame_id: FrameId(1), score: 1.0, snippet: None },
            ]
        };
        let first = fuse(make_lex(), vec![], SearchMode::TextOnly, 60.0, 10, 0, &FrameFilter::default(), &frames, |_, _| None);
        let second = fuse(make_lex(), vec![], SearchMode::TextOnly, 60.0, 10, 0, &FrameFilter::default(), &frames, |_, _| None);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.frame_id, b.frame_id);
            assert!((a.fused_score - b.fused_score).abs() < 1e-9);
        }
    }
}
