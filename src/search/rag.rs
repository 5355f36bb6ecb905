//! RAG context builder: deterministic ranking → expansion + snippets + surrogate packing
//! under a token budget.
//!
//! Grounded on `src/query/planner.rs`'s result-to-response assembly step, extended with the
//! two packing modes and per-kind token caps of spec §4.8. The token counter is an external
//! collaborator (`TokenCounter`); the core never estimates tokens itself.

use crate::catalog::Frame;
use crate::search::hybrid::SearchHit;
use crate::types::FrameId;

/// External collaborator: measures a text span's token count. Implementations wrap a
/// tokenizer/BPE cache; the core only depends on this narrow capability (spec §9).
pub trait TokenCounter {
    fn count(&self, text: &str) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Fast,
    DenseCached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Expansion,
    Surrogate,
    Snippet,
}

#[derive(Debug, Clone)]
pub struct ContextItem {
    pub kind: ItemKind,
    pub frame_id: FrameId,
    pub text: String,
    pub token_count: u32,
}

#[derive(Debug, Clone)]
pub struct RagContext {
    pub items: Vec<ContextItem>,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct RagBuilderConfig {
    pub mode: ContextMode,
    pub expansion_max_bytes: usize,
    pub expansion_max_tokens: u32,
    pub max_snippets: usize,
    pub snippet_max_tokens: u32,
    pub max_surrogates: usize,
    pub surrogate_max_tokens: u32,
    pub max_context_tokens: u32,
}

/// A surrogate frame: `kind = "surrogate"`, metadata links back to `source_frame_id` (spec
/// §4.8). Resolved by the caller from the committed catalog, since surrogate selection
/// requires scanning for frames whose `metadata.fields["source_frame_id"]` matches a hit.
pub struct SurrogateLookup<'a> {
    pub frame: &'a Frame,
    pub source_frame_id: FrameId,
}

/// Builds a deterministic RAG context from already-ranked hybrid search hits.
///
/// `hit_text` resolves a hit's full decoded payload (used for the expansion item and as the
/// snippet fallback); `surrogates` are pre-resolved surrogate frames available in commit order
/// so selection order (and thus packing order) is deterministic for identical inputs.
pub fn build_context(
    hits: &[SearchHit],
    hit_text: impl Fn(FrameId) -> Option<String>,
    surrogates: &[SurrogateLookup<'_>],
    config: &RagBuilderConfig,
    counter: &dyn TokenCounter,
) -> RagContext {
    let mut items = Vec::new();
    let mut excluded_from_snippets: std::collections::BTreeSet<FrameId> = std::collections::BTreeSet::new();

    if let Some(top) = hits.first()
        && let Some(text) = hit_text(top.frame_id)
        && text.len() <= config.expansion_max_bytes
    {
        let (text, token_count) = fit_to_cap(text, config.expansion_max_tokens, counter);
        items.push(ContextItem { kind: ItemKind::Expansion, frame_id: top.frame_id, text, token_count });
    }

    if config.mode == ContextMode::DenseCached {
        for surrogate in surrogates.iter().take(config.max_surrogates) {
            let Some(text) = hit_text_from_frame(surrogate.frame) else { continue };
            let (text, token_count) = fit_to_cap(text, config.surrogate_max_tokens, counter);
            items.push(ContextItem {
                kind: ItemKind::Surrogate,
                frame_id: surrogate.frame.frame_id,
                text,
                token_count,
            });
            excluded_from_snippets.insert(surrogate.source_frame_id);
        }
    }

    let expansion_id = items.iter().find(|i| i.kind == ItemKind::Expansion).map(|i| i.frame_id);
    for hit in hits.iter() {
        if items.iter().filter(|i| i.kind == ItemKind::Snippet).count() >= config.max_snippets {
            break;
        }
        if Some(hit.frame_id) == expansion_id || excluded_from_snippets.contains(&hit.frame_id) {
            continue;
        }
        let Some(text) = hit.preview.clone().or_else(|| hit_text(hit.frame_id)) else { continue };
        let (text, token_count) = fit_to_cap(text, config.snippet_max_tokens, counter);
        items.push(ContextItem { kind: ItemKind::Snippet, frame_id: hit.frame_id, text, token_count });
    }

    // Enforce the overall budget by dropping items from the tail (lowest packing priority
    // first: snippets, then surrogates, then the expansion) until the running sum fits.
    let mut total: u32 = items.iter().map(|i| i.token_count).sum();
    while total > config.max_context_tokens && !items.is_empty() {
        let drop_idx = items
            .iter()
            .rposition(|i| i.kind == ItemKind::Snippet)
            .or_else(|| items.iter().rposition(|i| i.kind == ItemKind::Surrogate))
            .or_else(|| items.iter().rposition(|i| i.kind == ItemKind::Expansion))
            .unwrap_or(items.len() - 1);
        total -= items[drop_idx].token_count;
        items.remove(drop_idx);
    }

    RagContext { items, total_tokens: total }
}

fn hit_text_from_frame(frame: &Frame) -> Option<String> {
    frame.metadata.search_text.clone()
}

/// Shrinks `text` to the longest prefix (on a `char` boundary) whose measured token count is
/// `<= cap`, returning that prefix alongside its true measured count. A per-kind cap bounds
/// what actually ships in the context, not just what gets reported as its cost — the caller
/// must never present an item whose real text exceeds the budget it claims to occupy.
fn fit_to_cap(text: String, cap: u32, counter: &dyn TokenCounter) -> (String, u32) {
    let full_count = counter.count(&text);
    if full_count <= cap {
        return (text, full_count);
    }
    if cap == 0 {
        return (String::new(), 0);
    }
    let splits: Vec<usize> = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let mut lo = 0usize; // splits[lo] is a known-fitting prefix length
    let mut hi = splits.len() - 1; // splits[hi] == text.len(), known not to fit
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if counter.count(&text[..splits[mid]]) <= cap {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let truncated = text[..splits[lo]].to_string();
    let count = counter.count(&truncated);
    (truncated, count)
}
