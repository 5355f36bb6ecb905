//! Engine capability traits: tagged variants over a capability set, per spec §9's
//! "class hierarchies for engines become tagged variants" design note.
//!
//! Grounded on `src/wasp.rs`'s `StorageEngine` trait (append/read_all/checkpoint capability
//! object) and `src/database/index.rs`'s `IndexImpl` enum (built-in Hash/BTree reference
//! indexes alongside a trait boundary for future engines). The core only ever touches an
//! engine's opaque serialized blob; the engine owns its internal structure, so the reference
//! implementations below (an inverted-index lex engine and a brute-force vector engine) live
//! in the same crate as examples of the capability set external collaborators implement.

use crate::errors::WaxError;
use crate::index::manifest::Metric;
use crate::types::FrameId;
use ordered_float::OrderedFloat;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A single scored hit returned by a lane before fusion.
#[derive(Debug, Clone)]
pub struct LexHit {
    pub frame_id: FrameId,
    pub score: f64,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct VecHit {
    pub frame_id: FrameId,
    pub similarity: f64,
}

/// Lexical (full-text) search capability. Implementations serialize to a self-describing
/// blob that detects and upgrades older schema versions on `deserialize`.
pub trait LexEngine: Send + Sync {
    fn index(&mut self, frame_id: FrameId, text: &str);
    fn index_batch(&mut self, items: &[(FrameId, String)]) {
        for (id, text) in items {
            self.index(*id, text);
        }
    }
    fn remove(&mut self, frame_id: FrameId);
    fn search(&self, query: &str, top_k: usize) -> Vec<LexHit>;
    fn serialize(&self) -> Result<Vec<u8>, WaxError>;
    fn doc_count(&self) -> u64;
}

/// Dense-vector search capability. Dimension and metric are fixed at construction.
pub trait VecEngine: Send + Sync {
    fn dimension(&self) -> u32;
    fn metric(&self) -> Metric;
    fn requires_normalized_input(&self) -> bool {
        matches!(self.metric(), Metric::Cosine)
    }
    fn add(&mut self, frame_id: FrameId, vector: &[f32]) -> Result<(), WaxError>;
    fn add_batch(&mut self, items: &[(FrameId, Vec<f32>)]) -> Result<(), WaxError> {
        for (id, v) in items {
            self.add(*id, v)?;
        }
        Ok(())
    }
    fn remove(&mut self, frame_id: FrameId);
    fn search(&self, query_vector: &[f32], top_k: usize) -> Vec<VecHit>;
    fn serialize(&self) -> Result<Vec<u8>, WaxError>;
    fn vector_count(&self) -> u64;
}

/// Structured entity/fact store. The core only ever ferries its opaque blob through a
/// commit; its query surface is outside this spec (spec §4.5).
pub trait KvEngine: Send + Sync {
    fn serialize(&self) -> Result<Vec<u8>, WaxError>;
}

// --- Reference lex engine: a simple inverted index with term-frequency scoring. ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvertedIndexLexEngine {
    schema_version: u16,
    postings: HashMap<String, Vec<FrameId>>,
    texts: HashMap<FrameId, String>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl InvertedIndexLexEngine {
    #[must_use]
    pub fn new() -> Self {
        Self { schema_version: 1, postings: HashMap::new(), texts: HashMap::new() }
    }

    /// Detects legacy schema blobs and upgrades them in place; the reference engine has
    /// only ever shipped schema version 1, so this is a no-op placeholder for the upgrade
    /// hook spec §4.5 requires external engines to own.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, WaxError> {
        let engine: Self = serde_json::from_slice(bytes)?;
        Ok(engine)
    }
}

impl LexEngine for InvertedIndexLexEngine {
    fn index(&mut self, frame_id: FrameId, text: &str) {
        self.remove(frame_id);
        self.texts.insert(frame_id, text.to_string());
        for term in tokenize(text) {
            let list = self.postings.entry(term).or_default();
            if !list.contains(&frame_id) {
                list.push(frame_id);
            }
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        if self.texts.remove(&frame_id).is_some() {
            for list in self.postings.values_mut() {
                list.retain(|id| *id != frame_id);
            }
        }
    }

    fn search(&self, query: &str, top_k: usize) -> Vec<LexHit> {
        let mut scores: HashMap<FrameId, f64> = HashMap::new();
        for term in tokenize(query) {
            if let Some(list) = self.postings.get(&term) {
                // Rarer terms score higher, an inverse-document-frequency-flavored weight.
                let weight = 1.0 / (list.len() as f64).max(1.0);
                for id in list {
                    *scores.entry(*id).or_insert(0.0) += weight;
                }
            }
        }
        let mut hits: Vec<LexHit> = scores
            .into_iter()
            .map(|(frame_id, score)| LexHit {
                frame_id,
                score,
                snippet: self.texts.get(&frame_id).map(|t| t.chars().take(160).collect()),
            })
            .collect();
        hits.sort_by(|a, b| OrderedFloat(b.score).cmp(&OrderedFloat(a.score)).then(a.frame_id.0.cmp(&b.frame_id.0)));
        hits.truncate(top_k);
        hits
    }

    fn serialize(&self) -> Result<Vec<u8>, WaxError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn doc_count(&self) -> u64 {
        self.texts.len() as u64
    }
}

// --- Reference vec engine: brute-force similarity over an in-memory vector list. ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceVecEngine {
    dimension: u32,
    metric: Metric,
    vectors: Vec<(FrameId, Vec<f32>)>,
}

impl BruteForceVecEngine {
    #[must_use]
    pub fn new(dimension: u32, metric: Metric) -> Self {
        Self { dimension, metric, vectors: Vec::new() }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, WaxError> {
        let engine: Self = serde_json::from_slice(bytes)?;
        Ok(engine)
    }

    #[must_use]
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        match self.metric {
            Metric::Dot => dot(a, b),
            Metric::Cosine => {
                let denom = (norm(a) * norm(b)).max(1e-12);
                dot(a, b) / denom
            }
            Metric::Euclidean => {
                let dist: f64 = a.iter().zip(b).map(|(x, y)| ((*x - *y) as f64).powi(2)).sum::<f64>().sqrt();
                -dist
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

fn norm(a: &[f32]) -> f64 {
    dot(a, a).sqrt()
}

/// Normalizes a vector to unit length; used when the core must hand a normalized query
/// vector to an engine that expects one (spec §4.7).
#[must_use]
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n <= 1e-12 {
        return v.to_vec();
    }
    v.iter().map(|x| (*x as f64 / n) as f32).collect()
}

impl VecEngine for BruteForceVecEngine {
    fn dimension(&self) -> u32 {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn add(&mut self, frame_id: FrameId, vector: &[f32]) -> Result<(), WaxError> {
        if vector.len() as u32 != self.dimension {
            return Err(WaxError::InvalidArgument(format!(
                "vector dimension {} does not match engine dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        self.remove(frame_id);
        let stored = if self.requires_normalized_input() { normalize(vector) } else { vector.to_vec() };
        self.vectors.push((frame_id, stored));
        Ok(())
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.vectors.retain(|(id, _)| *id != frame_id);
    }

    fn search(&self, query_vector: &[f32], top_k: usize) -> Vec<VecHit> {
        let mut hits: Vec<VecHit> = self
            .vectors
            .iter()
            .map(|(id, v)| VecHit { frame_id: *id, similarity: self.similarity(query_vector, v) })
            .collect();
        hits.sort_by(|a, b| {
            OrderedFloat(b.similarity).cmp(&OrderedFloat(a.similarity)).then(a.frame_id.0.cmp(&b.frame_id.0))
        });
        hits.truncate(top_k);
        hits
    }

    fn serialize(&self) -> Result<Vec<u8>, WaxError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn vector_count(&self) -> u64 {
        self.vectors.len() as u64
    }
}

// --- GPU-style brute-force vec engine: same math as the CPU engine, routed through a
// bounded transient buffer pool (spec §5's "transient GPU-buffer pool"). No actual GPU
// compute is available in this crate (out of scope per spec §1's non-goals on inference
// hardware); the pool exists to carry the allocation-count invariant faithfully. ---

/// A bounded pool of transient compute buffers shared across concurrent searches on one
/// `GpuBruteForceVecEngine` instance. `acquire` blocks the calling thread until a slot is
/// free rather than spinning; the allocation count held at any instant never exceeds
/// `capacity` (spec §5, tested invariant).
pub struct GpuBufferPool {
    capacity: usize,
    state: Mutex<usize>,
    available: Condvar,
}

impl GpuBufferPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), state: Mutex::new(0), available: Condvar::new() }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        *self.state.lock()
    }

    /// Blocks until a buffer slot is free, then reserves it. The returned guard releases the
    /// slot on drop.
    pub fn acquire(self: &Arc<Self>) -> GpuBufferGuard {
        let mut in_use = self.state.lock();
        while *in_use >= self.capacity {
            self.available.wait(&mut in_use);
        }
        *in_use += 1;
        GpuBufferGuard { pool: Arc::clone(self) }
    }
}

pub struct GpuBufferGuard {
    pool: Arc<GpuBufferPool>,
}

impl Drop for GpuBufferGuard {
    fn drop(&mut self) {
        let mut in_use = self.pool.state.lock();
        *in_use -= 1;
        self.pool.available.notify_one();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuBruteForceVecEngine {
    dimension: u32,
    metric: Metric,
    vectors: Vec<(FrameId, Vec<f32>)>,
    #[serde(skip, default = "default_gpu_pool")]
    pool: Arc<GpuBufferPool>,
}

fn default_gpu_pool() -> Arc<GpuBufferPool> {
    Arc::new(GpuBufferPool::new(4))
}

impl GpuBruteForceVecEngine {
    #[must_use]
    pub fn new(dimension: u32, metric: Metric, pool: Arc<GpuBufferPool>) -> Self {
        Self { dimension, metric, vectors: Vec::new(), pool }
    }

    pub fn deserialize(bytes: &[u8], pool: Arc<GpuBufferPool>) -> Result<Self, WaxError> {
        let mut engine: Self = serde_json::from_slice(bytes)?;
        engine.pool = pool;
        Ok(engine)
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<GpuBufferPool> {
        &self.pool
    }
}

impl VecEngine for GpuBruteForceVecEngine {
    fn dimension(&self) -> u32 {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn add(&mut self, frame_id: FrameId, vector: &[f32]) -> Result<(), WaxError> {
        if vector.len() as u32 != self.dimension {
            return Err(WaxError::InvalidArgument(format!(
                "vector dimension {} does not match engine dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        self.remove(frame_id);
        let stored = if self.requires_normalized_input() { normalize(vector) } else { vector.to_vec() };
        self.vectors.push((frame_id, stored));
        Ok(())
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.vectors.retain(|(id, _)| *id != frame_id);
    }

    fn search(&self, query_vector: &[f32], top_k: usize) -> Vec<VecHit> {
        let _buffer = self.pool.acquire();
        let mut hits: Vec<VecHit> = self
            .vectors
            .iter()
            .map(|(id, v)| VecHit { frame_id: *id, similarity: similarity_for(self.metric, query_vector, v) })
            .collect();
        hits.sort_by(|a, b| {
            OrderedFloat(b.similarity).cmp(&OrderedFloat(a.similarity)).then(a.frame_id.0.cmp(&b.frame_id.0))
        });
        hits.truncate(top_k);
        hits
    }

    fn serialize(&self) -> Result<Vec<u8>, WaxError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn vector_count(&self) -> u64 {
        self.vectors.len() as u64
    }
}

fn similarity_for(metric: Metric, a: &[f32], b: &[f32]) -> f64 {
    match metric {
        Metric::Dot => dot(a, b),
        Metric::Cosine => {
            let denom = (norm(a) * norm(b)).max(1e-12);
            dot(a, b) / denom
        }
        Metric::Euclidean => {
            let dist: f64 = a.iter().zip(b).map(|(x, y)| ((*x - *y) as f64).powi(2)).sum::<f64>().sqrt();
            -dist
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lex_engine_ranks_rarer_terms_higher() {
        let mut lex = InvertedIndexLexEngine::new();
        lex.index(FrameId(0), "Swift programming language");
        lex.index(FrameId(1), "Python programming language");
        let hits = lex.search("Swift", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].frame_id, FrameId(0));
        assert!(hits[0].snippet.is_some());
    }

    #[test]
    fn lex_engine_serialize_roundtrip() {
        let mut lex = InvertedIndexLexEngine::new();
        lex.index(FrameId(0), "hello world");
        let bytes = lex.serialize().unwrap();
        let restored = InvertedIndexLexEngine::deserialize(&bytes).unwrap();
        assert_eq!(restored.doc_count(), 1);
    }

    #[test]
    fn vec_engine_rejects_dimension_mismatch() {
        let mut vec_engine = BruteForceVecEngine::new(4, Metric::Cosine);
        assert!(vec_engine.add(FrameId(0), &[1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn vec_engine_cosine_orders_by_similarity() {
        let mut vec_engine = BruteForceVecEngine::new(4, Metric::Cosine);
        vec_engine.add(FrameId(0), &[1.0, 0.0, 0.0, 0.0]).unwrap();
        vec_engine.add(FrameId(1), &[0.0, 1.0, 0.0, 0.0]).unwrap();
        let hits = vec_engine.search(&[0.9, 0.1, 0.0, 0.0], 10);
        assert_eq!(hits[0].frame_id, FrameId(0));
    }

    #[test]
    fn vec_engine_serialize_roundtrip_preserves_vectors() {
        let mut vec_engine = BruteForceVecEngine::new(2, Metric::Dot);
        vec_engine.add(FrameId(0), &[1.0, 2.0]).unwrap();
        let bytes = vec_engine.serialize().unwrap();
        let restored = BruteForceVecEngine::deserialize(&bytes).unwrap();
        assert_eq!(restored.vector_count(), 1);
    }

    #[test]
    fn gpu_buffer_pool_never_exceeds_capacity_under_concurrent_searches() {
        use std::thread;

        let pool = Arc::new(GpuBufferPool::new(2));
        let mut engine = GpuBruteForceVecEngine::new(4, Metric::Cosine, Arc::clone(&pool));
        for i in 0..50u64 {
            engine.add(FrameId(i), &[1.0, 0.0, 0.0, 0.0]).unwrap();
        }
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let hits = engine.search(&[1.0, 0.0, 0.0, 0.0], 5);
                        assert!(pool.in_use() <= pool.capacity());
                        assert!(!hits.is_empty());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn gpu_engine_serialize_roundtrip_preserves_vectors_and_rebinds_pool() {
        let pool = Arc::new(GpuBufferPool::new(3));
        let mut engine = GpuBruteForceVecEngine::new(2, Metric::Dot, Arc::clone(&pool));
        engine.add(FrameId(0), &[1.0, 2.0]).unwrap();
        let bytes = engine.serialize().unwrap();
        let other_pool = Arc::new(GpuBufferPool::new(7));
        let restored = GpuBruteForceVecEngine::deserialize(&bytes, Arc::clone(&other_pool)).unwrap();
        assert_eq!(restored.vector_count(), 1);
        assert_eq!(restored.pool().capacity(), 7);
    }
}
