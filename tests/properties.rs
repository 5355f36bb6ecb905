//! Property-based tests for the storage-core invariants: a `proptest!` block per invariant,
//! named `prop_*`.

use proptest::prelude::*;
use wax::{
    build_context, Codec, ContextMode, FrameFilter, FrameMetadata, ItemKind, Lane, LaneContribution, Metric,
    PutOptions, RagBuilderConfig, SearchHit, SearchMode, SearchRequest, Session, SessionWaitPolicy, Store,
    StoreOptions, TieBreakReason, TokenCounter, VectorIndexOptions,
};

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, .. ProptestConfig::default() })]

    /// For any sequence of `put` calls on a fresh store, `frame_id(P_i) = i`: dense, starting
    /// at zero, in strict insertion order (spec §8).
    #[test]
    fn prop_put_ids_are_dense_and_monotonic(bodies in proptest::collection::vec(".*", 1..30)) {
        rt().block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::create(dir.path().join("s.wax"), StoreOptions::default()).await.unwrap();
            let mut session = Session::read_write(&store, SessionWaitPolicy::TryOnce).await.unwrap();
            for (expected, body) in bodies.iter().enumerate() {
                let id = session.put(body.as_bytes(), PutOptions::default(), Codec::Plain, None).await.unwrap();
                prop_assert_eq!(id.0, expected as u64);
            }
            Ok(())
        })?;
    }

    /// Reopening a committed store yields a catalog whose committed frame count is unchanged
    /// and whose `frame_meta` is byte-identical to the pre-close value (spec §8).
    #[test]
    fn prop_reopen_preserves_committed_frame_metadata(bodies in proptest::collection::vec(".*", 1..15)) {
        rt().block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("s.wax");
            let store = Store::create(&path, StoreOptions::default()).await.unwrap();
            let mut session = Session::read_write(&store, SessionWaitPolicy::TryOnce).await.unwrap();
            for body in &bodies {
                session.put(body.as_bytes(), PutOptions::default(), Codec::Plain, None).await.unwrap();
            }
            session.commit().await.unwrap();
            let before: Vec<_> = session.frame_metas();
            session.close().await.unwrap();
            store.close().await.unwrap();

            let reopened = Store::open(&path, StoreOptions::default()).await.unwrap();
            let after_session = Session::read_only(&reopened).await.unwrap();
            let after: Vec<_> = after_session.frame_metas();
            prop_assert_eq!(before.len(), after.len());
            for b in &before {
                let a = after.iter().find(|f| f.frame_id == b.frame_id).unwrap();
                prop_assert_eq!(a.frame_id, b.frame_id);
                prop_assert_eq!(&a.kind, &b.kind);
                prop_assert_eq!(a.payload.offset, b.payload.offset);
                prop_assert_eq!(a.payload.length, b.payload.length);
            }
            Ok(())
        })?;
    }

    /// For `(supersede(a, b), search(q))` where both match `q`: `a` is absent from default
    /// search, `b` is present, and `frame_meta(a).superseded_by == b` (spec §8).
    #[test]
    fn prop_supersede_excludes_old_from_search(extra in 0usize..5) {
        rt().block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::create(dir.path().join("s.wax"), StoreOptions::default()).await.unwrap();
            let mut session = Session::read_write(&store, SessionWaitPolicy::TryOnce).await.unwrap();
            session.enable_text_search();
            let opts = || PutOptions {
                kind: "doc".into(),
                metadata: FrameMetadata { search_text: Some("shared query term".into()), ..Default::default() },
                ..Default::default()
            };
            let a = session.put(b"a", opts(), Codec::Plain, None).await.unwrap();
            let b = session.put(b"b", opts(), Codec::Plain, None).await.unwrap();
            // Noise frames sharing no searchable text, to vary the catalog's shape.
            for i in 0..extra {
                session.put(format!("noise-{i}").as_bytes(), PutOptions::default(), Codec::Plain, None).await.unwrap();
            }
            session.supersede(a, b).await.unwrap();
            session.stage_lex_index_from_engine().unwrap();
            session.commit().await.unwrap();

            let request = SearchRequest {
                query_text: Some("shared query term".into()),
                mode: SearchMode::TextOnly,
                top_k: 10,
                ..Default::default()
            };
            let hits = session.search(request).await.unwrap();
            prop_assert!(!hits.iter().any(|h| h.frame_id == a));
            prop_assert!(hits.iter().any(|h| h.frame_id == b));
            prop_assert_eq!(session.frame_meta(a).unwrap().superseded_by, Some(b));
            Ok(())
        })?;
    }

    /// Permuting the lane input order yields the same fused frame-id set with the same
    /// per-frame fused score within `1e-9` (spec §8's weighted-RRF permutation invariant).
    #[test]
    fn prop_rrf_fusion_is_order_invariant(mut ranks in proptest::collection::vec(1u64..1000, 2..10)) {
        use std::collections::BTreeMap;
        ranks.sort_unstable();
        ranks.dedup();
        prop_assume!(ranks.len() >= 2);
        let frame = |id: u64| wax::Frame {
            frame_id: id.into(),
            kind: "doc".into(),
            role: wax::Role::Document,
            parent_id: None,
            timestamp_ms: 0,
            chunk_index: None,
            chunk_count: None,
            payload: wax::PayloadDescriptor { offset: 0, length: 0, encoding: Codec::Plain },
            metadata: FrameMetadata::default(),
            embedding: None,
            status: wax::FrameStatus::Active,
            superseded_by: None,
        };
        let mut frames = BTreeMap::new();
        for id in &ranks {
            frames.insert((*id).into(), frame(*id));
        }
        let make_hits = |order: &[u64]| {
            order.iter().map(|id| wax::LexHit { frame_id: (*id).into(), score: 1.0, snippet: None }).collect::<Vec<_>>()
        };
        let forward = make_hits(&ranks);
        let mut reversed_order = ranks.clone();
        reversed_order.reverse();
        let backward = make_hits(&reversed_order);

        let fuse = |hits: Vec<wax::LexHit>| {
            wax::search::hybrid::fuse(hits, vec![], SearchMode::TextOnly, 60.0, ranks.len(), 0, &FrameFilter::default(), &frames, |_, _| None)
        };
        let a = fuse(forward);
        let b = fuse(backward);

        let mut a_scores: Vec<(u64, f64)> = a.iter().map(|h| (h.frame_id.0, h.fused_score)).collect();
        let mut b_scores: Vec<(u64, f64)> = b.iter().map(|h| (h.frame_id.0, h.fused_score)).collect();
        a_scores.sort_by_key(|(id, _)| *id);
        b_scores.sort_by_key(|(id, _)| *id);
        prop_assert_eq!(a_scores.len(), b_scores.len());
        for ((ida, sa), (idb, sb)) in a_scores.iter().zip(b_scores.iter()) {
            prop_assert_eq!(ida, idb);
            prop_assert!((sa - sb).abs() < 1e-9);
        }
    }

    /// Restaging identical blob content twice never advances the stamp, regardless of blob
    /// contents (spec §8).
    #[test]
    fn prop_restage_identical_blob_never_advances_stamp(blob in proptest::collection::vec(any::<u8>(), 0..256), doc_count in 0u64..500) {
        let first = wax::stage_lex(blob.clone(), doc_count, None);
        let manifest = wax::IndexManifest { stamp: first.stamp, ..wax::IndexManifest::empty(wax::IndexKind::Lex) };
        let second = wax::stage_lex(blob, doc_count, Some(&manifest));
        prop_assert!(!second.stamp_advanced);
        prop_assert_eq!(first.stamp, second.stamp);
    }

    /// Staging a vec blob with dimension `d1` while a pending embedding has a different
    /// dimension `d0` always fails, for any `d0 != d1` (spec §8).
    #[test]
    fn prop_vec_stage_dimension_mismatch_always_rejected(d0 in 1u32..64, delta in 1u32..64) {
        let d1 = d0.wrapping_add(delta).max(1);
        prop_assume!(d0 != d1);
        let result = wax::stage_vec(vec![1, 2, 3], 1, d1, Metric::Cosine, Some(d0), None);
        prop_assert!(result.is_err());
    }

    /// For any context produced by the RAG builder, the measured sum of item tokens equals
    /// `total_tokens` and never exceeds `max_context_tokens` (spec §8 token-budget invariant).
    #[test]
    fn prop_rag_context_token_sum_matches_total_and_respects_budget(
        lens in proptest::collection::vec(1usize..200, 1..12),
        budget in 1u32..400,
    ) {
        struct ByteCounter;
        impl TokenCounter for ByteCounter {
            fn count(&self, text: &str) -> u32 {
                text.len() as u32
            }
        }
        let hits: Vec<SearchHit> = lens
            .iter()
            .enumerate()
            .map(|(i, _)| SearchHit {
                frame_id: (i as u64).into(),
                fused_score: 1.0 / (i as f64 + 1.0),
                best_lane_rank: i + 1,
                preview: None,
                lane_contributions: vec![LaneContribution { lane: Lane::Text, weight: 1.0, rank: i + 1, rrf_score: 0.0 }],
                tie_break_reason: TieBreakReason::UniqueScore,
            })
            .collect();
        let lens_clone = lens.clone();
        let text_for = move |id: wax::FrameId| Some("x".repeat(lens_clone[id.0 as usize]));
        let config = RagBuilderConfig {
            mode: ContextMode::Fast,
            expansion_max_bytes: 10_000,
            expansion_max_tokens: budget,
            max_snippets: 8,
            snippet_max_tokens: budget,
            max_surrogates: 0,
            surrogate_max_tokens: budget,
            max_context_tokens: budget,
        };
        let ctx = build_context(&hits, text_for, &[], &config, &ByteCounter);
        let sum: u32 = ctx.items.iter().map(|i| i.token_count).sum();
        prop_assert_eq!(sum, ctx.total_tokens);
        prop_assert!(ctx.total_tokens <= budget);
        prop_assert!(ctx.items.iter().all(|i| matches!(i.kind, ItemKind::Expansion | ItemKind::Snippet)));
    }
}

/// No-sidecar invariant: after any sequence of operations followed by `close`, the directory
/// containing the file contains exactly one entry whose name begins with the base name
/// (spec §8). Not a `proptest!` block since it only needs one representative run per shape,
/// matching the surrounding mix of plain `#[test]`s alongside `proptest!` blocks in the same
/// file.
#[test]
fn prop_no_sidecar_files_after_close() {
    rt().block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.wax");
        let store = Store::create(&path, StoreOptions::default()).await.unwrap();
        let mut session = Session::read_write(&store, SessionWaitPolicy::TryOnce).await.unwrap();
        session.enable_text_search();
        session.enable_vector_search(VectorIndexOptions { dimension: 4, metric: Metric::Cosine, ..Default::default() });
        let id = session.put(b"hello", PutOptions::default(), Codec::Plain, None).await.unwrap();
        session.put_embedding(id, vec![1.0, 0.0, 0.0, 0.0]).await.unwrap();
        session.stage_lex_index_from_engine().unwrap();
        session.stage_vec_index_from_engine().unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();
        store.close().await.unwrap();

        let base_name = path.file_name().unwrap().to_str().unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_str().is_some_and(|n| n.starts_with(base_name)))
            .collect();
        assert_eq!(entries.len(), 1);
    });
}
