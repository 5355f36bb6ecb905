//! Public API surface: `Store` (file-level handle) and `Session` (read-only or read-write
//! view), wiring together the container, catalog, index, commit, and search layers.
//!
//! Grounded on `src/engine.rs` (`Engine` owning a storage handle plus collection registry,
//! `checkpoint_with_indexes`) and `lib.rs`'s top-level `Database` wrapper, restructured into
//! the read-only/read-write session split of spec §5/§6: a read-write session owns the
//! exclusive writer lock (enforced by `FileHandle::open_read_write`'s `fs2` lock) and the
//! in-memory pending view; read-only sessions only ever see the committed root.

use crate::catalog::{Frame, FrameCatalog};
use crate::commit::{self, CommitGuard};
use crate::config::{SessionWaitPolicy, StoreOptions, VectorEnginePreference};
use crate::container::payload::PayloadStore;
use crate::container::wal::{decode_payload, encode_payload, WalRecord, WalRecordKind, WalRing};
use crate::container::Container;
use crate::errors::{WaxError, WaxResult};
use crate::index::engine::{
    BruteForceVecEngine, GpuBufferPool, GpuBruteForceVecEngine, InvertedIndexLexEngine, KvEngine, LexEngine, VecEngine,
};
use crate::index::manifest::{IndexKind, IndexManifest, IndexManifestTable, Metric};
use crate::index::staging;
use crate::search::hybrid::{self, SearchMode};
use crate::stats::StoreStats;
use crate::types::{
    Codec, EmbeddingDescriptor, FrameFilter, FrameId, FrameMetadata, PayloadDescriptor, PutOptions, Role,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Transient GPU-style buffer pool capacity shared by the session's `GpuBruteForceVecEngine`
/// (spec §5). Fixed per process; external collaborators using their own `VecEngine` are
/// unaffected.
const GPU_BUFFER_POOL_CAPACITY: usize = 4;

/// A file-level handle: knows where the store lives and what options govern it. Holds no
/// open file descriptor itself — `Session::read_only`/`read_write` do that.
pub struct Store {
    path: PathBuf,
    options: StoreOptions,
}

impl Store {
    /// Creates a brand-new store file. Fails if a file already exists at `path`.
    pub async fn create(path: impl Into<PathBuf>, options: StoreOptions) -> WaxResult<Self> {
        let path = path.into();
        if path.exists() {
            return Err(WaxError::InvalidArgument(format!("{} already exists", path.display())));
        }
        tokio::task::yield_now().await;
        let container = Container::create(&path, &options)?;
        drop(container);
        info!("store created at {}", path.display());
        Ok(Self { path, options })
    }

    /// Opens an existing store, or creates one first if `options.create_if_missing` and the
    /// file does not exist.
    pub async fn open(path: impl Into<PathBuf>, options: StoreOptions) -> WaxResult<Self> {
        let path = path.into();
        tokio::task::yield_now().await;
        if !path.exists() {
            if !options.create_if_missing {
                return Err(WaxError::NotFound(format!("{} does not exist", path.display())));
            }
            let container = Container::create(&path, &options)?;
            drop(container);
        }
        Ok(Self { path, options })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// No persistent per-store resources to release; sessions own their own file handles.
    pub async fn close(self) -> WaxResult<()> {
        tokio::task::yield_now().await;
        Ok(())
    }
}

// --- WAL record payload shapes (internal wire format for catalog/index bookkeeping). ---

#[derive(Debug, Serialize, Deserialize)]
struct CatalogPutRecord {
    frame_id: FrameId,
    kind: String,
    role: Role,
    parent_id: Option<FrameId>,
    timestamp_ms: u64,
    chunk_index: Option<u32>,
    chunk_count: Option<u32>,
    payload: PayloadDescriptor,
    metadata: FrameMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct SupersedeRecord {
    old_id: FrameId,
    new_id: FrameId,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeleteRecord {
    frame_id: FrameId,
}

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingPutRecord {
    frame_id: FrameId,
    dimension: u32,
    sequence: u64,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StageIndexRecord {
    blob: Vec<u8>,
    stamp: u64,
    doc_count: Option<u64>,
    vector_count: Option<u64>,
    dimension: Option<u32>,
    metric: Option<Metric>,
}

fn record_kind_for(kind: IndexKind) -> WalRecordKind {
    match kind {
        IndexKind::Lex => WalRecordKind::StageLexIndex,
        IndexKind::Vec => WalRecordKind::StageVecIndex,
        IndexKind::Kv => WalRecordKind::StageKvIndex,
    }
}

/// Configuration accepted by `enable_vector_search`.
#[derive(Debug, Clone, Copy)]
pub struct VectorIndexOptions {
    pub dimension: u32,
    pub metric: Metric,
    /// Which concrete engine to prefer; defaults to `VectorEnginePreference::Auto`.
    pub preference: VectorEnginePreference,
}

impl Default for VectorIndexOptions {
    fn default() -> Self {
        Self { dimension: 0, metric: Metric::Cosine, preference: VectorEnginePreference::Auto }
    }
}

/// One search request (spec §4.7).
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query_text: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub mode: SearchMode,
    pub top_k: usize,
    pub frame_filter: FrameFilter,
    pub preview_max_bytes: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query_text: None,
            query_embedding: None,
            mode: SearchMode::TextOnly,
            top_k: 10,
            frame_filter: FrameFilter::default(),
            preview_max_bytes: 0,
        }
    }
}

/// A read-only or read-write view over one store file.
pub struct Session {
    options: StoreOptions,
    container: Container,
    wal: WalRing,
    payload: PayloadStore,
    catalog: FrameCatalog,
    index_table: IndexManifestTable,
    pending_index_table: IndexManifestTable,
    index_blobs: HashMap<IndexKind, Vec<u8>>,
    pending_index_blobs: HashMap<IndexKind, Vec<u8>>,
    lex_engine: Option<Box<dyn LexEngine>>,
    vec_engine: Option<Box<dyn VecEngine>>,
    kv_engine: Option<Box<dyn KvEngine>>,
    pending_embeddings: Vec<EmbeddingPutRecord>,
    embedding_sequence: u64,
    vec_index_staged_this_session: bool,
    gpu_buffer_pool: Arc<GpuBufferPool>,
    writable: bool,
}

impl Session {
    /// Opens a read-only session. Observes only the most recently committed root; any
    /// uncommitted tail left by a crashed writer is discarded.
    pub async fn read_only(store: &Store) -> WaxResult<Self> {
        tokio::task::yield_now().await;
        let container = Container::open(&store.path, false)?;
        Self::rehydrate(store.options.clone(), container, false)
    }

    /// Opens a read-write session. `wait_policy` governs what happens if another process
    /// already holds the writer lock.
    pub async fn read_write(store: &Store, wait_policy: SessionWaitPolicy) -> WaxResult<Self> {
        tokio::task::yield_now().await;
        let container = open_read_write_with_policy(&store.path, wait_policy).await?;
        Self::rehydrate(store.options.clone(), container, true)
    }

    fn rehydrate(options: StoreOptions, container: Container, writable: bool) -> WaxResult<Self> {
        let root = container.active_root;
        let ring = WalRing::new(container.file.clone(), root.wal_offset, root.wal_capacity);
        // Scan from the tail sequence/cursor the last checkpoint recorded, not physical offset
        // 0: once the ring has wrapped past its start, offset 0 no longer holds the record
        // carrying `tail_sequence + 1`. Everything up to the tail is instead seeded from the
        // snapshot below.
        let (tail_records, cursor) = ring.scan_from_cursor(root.wal_tail_sequence, root.wal_tail_physical_cursor)?;
        let wal = WalRing::resume(
            container.file.clone(),
            root.wal_offset,
            root.wal_capacity,
            root.wal_head_sequence,
            root.wal_tail_sequence,
            root.wal_tail_physical_cursor,
            root.wal_last_committed_sequence,
            cursor,
        );
        let payload = PayloadStore::new(container.file.clone(), root.payload_region_offset, root.payload_next_free_offset);

        let mut catalog = FrameCatalog::new();
        let mut index_table = IndexManifestTable::default();
        let mut index_blobs = HashMap::new();
        let mut pending_embeddings = Vec::new();
        let mut embedding_sequence = 0u64;

        if root.state_snapshot_length > 0 {
            let descriptor = PayloadDescriptor {
                offset: root.state_snapshot_offset,
                length: root.state_snapshot_length,
                encoding: Codec::Plain,
            };
            let (frames, snapshot_index_table, snapshot_index_blobs) = commit::load_snapshot(&payload, descriptor)?;
            let next_id = frames.iter().map(|f| f.frame_id.0 + 1).max().unwrap_or(0);
            embedding_sequence = frames.iter().filter_map(|f| f.embedding.map(|e| e.sequence + 1)).max().unwrap_or(0);
            catalog.load_committed(frames, next_id);
            index_table = snapshot_index_table;
            index_blobs = snapshot_index_blobs;
        }

        // Everything in `tail_records` was appended after the snapshot's commit marker, so it
        // is necessarily uncommitted: a committed commit marker would have advanced the tail
        // (and produced a fresher snapshot) past it.
        let mut pending_index_table = IndexManifestTable::default();
        let mut pending_index_blobs = HashMap::new();
        if writable {
            for record in &tail_records {
                apply_record(
                    &mut catalog,
                    &mut pending_index_table,
                    &mut pending_index_blobs,
                    &mut pending_embeddings,
                    &mut embedding_sequence,
                    record,
                )?;
            }
        }

        Ok(Self {
            options,
            container,
            wal,
            payload,
            catalog,
            index_table,
            pending_index_table,
            index_blobs,
            pending_index_blobs,
            lex_engine: None,
            vec_engine: None,
            kv_engine: None,
            pending_embeddings,
            embedding_sequence,
            vec_index_staged_this_session: false,
            gpu_buffer_pool: Arc::new(GpuBufferPool::new(GPU_BUFFER_POOL_CAPACITY)),
            writable,
        })
    }

    fn require_writable(&self) -> WaxResult<()> {
        if !self.writable {
            return Err(WaxError::InvalidArgument("session is read-only".into()));
        }
        Ok(())
    }

    // --- Index registration (spec §6). ---

    /// Enables text search. If a lex index was already committed (e.g. this is a reopened
    /// store), its blob is deserialized to restore the engine's state; otherwise a fresh
    /// engine is created.
    pub fn enable_text_search(&mut self) {
        if self.lex_engine.is_some() {
            return;
        }
        let engine: Box<dyn LexEngine> = match self.index_blobs.get(&IndexKind::Lex) {
            Some(bytes) => InvertedIndexLexEngine::deserialize(bytes)
                .map(|e| Box::new(e) as Box<dyn LexEngine>)
                .unwrap_or_else(|_| Box::new(InvertedIndexLexEngine::new())),
            None => Box::new(InvertedIndexLexEngine::new()),
        };
        self.lex_engine = Some(engine);
    }

    /// Enables vector search; see [`enable_text_search`] for the committed-blob restore
    /// behavior. `options` is only consulted when no committed vec index exists yet.
    ///
    /// `options.preference` picks the concrete engine: `CpuOnly` always uses the plain
    /// brute-force engine; `MetalPreferred`/`Auto` prefer the GPU-style engine backed by the
    /// session's bounded buffer pool, falling back to the CPU engine if a committed blob was
    /// written by a different engine and fails to deserialize (spec §4.7/§6).
    pub fn enable_vector_search(&mut self, options: VectorIndexOptions) {
        if self.vec_engine.is_some() {
            return;
        }
        let committed_bytes = self.index_blobs.get(&IndexKind::Vec);
        let engine: Box<dyn VecEngine> = match options.preference {
            VectorEnginePreference::CpuOnly => match committed_bytes {
                Some(bytes) => BruteForceVecEngine::deserialize(bytes)
                    .map(|e| Box::new(e) as Box<dyn VecEngine>)
                    .unwrap_or_else(|_| Box::new(BruteForceVecEngine::new(options.dimension, options.metric))),
                None => Box::new(BruteForceVecEngine::new(options.dimension, options.metric)),
            },
            VectorEnginePreference::MetalPreferred | VectorEnginePreference::Auto => match committed_bytes {
                Some(bytes) => GpuBruteForceVecEngine::deserialize(bytes, Arc::clone(&self.gpu_buffer_pool))
                    .map(|e| Box::new(e) as Box<dyn VecEngine>)
                    .or_else(|_| {
                        BruteForceVecEngine::deserialize(bytes).map(|e| Box::new(e) as Box<dyn VecEngine>)
                    })
                    .unwrap_or_else(|_| {
                        Box::new(GpuBruteForceVecEngine::new(
                            options.dimension,
                            options.metric,
                            Arc::clone(&self.gpu_buffer_pool),
                        ))
                    }),
                None => Box::new(GpuBruteForceVecEngine::new(
                    options.dimension,
                    options.metric,
                    Arc::clone(&self.gpu_buffer_pool),
                )),
            },
        };
        self.vec_engine = Some(engine);
    }

    pub fn enable_structured_memory(&mut self, engine: Box<dyn KvEngine>) {
        self.kv_engine = Some(engine);
    }

    // --- Catalog operations. ---

    pub async fn put(
        &mut self,
        bytes: &[u8],
        options: PutOptions,
        codec: Codec,
        timestamp_override: Option<i64>,
    ) -> WaxResult<FrameId> {
        self.require_writable()?;
        tokio::task::yield_now().await;
        let payload_descriptor = self.payload.append(bytes, codec)?;
        let next_id = self.catalog.next_frame_id();
        let default_timestamp_ms = now_ms();
        let frame_id =
            self.catalog.put(&options, payload_descriptor, timestamp_override, default_timestamp_ms)?;
        debug_assert_eq!(frame_id, next_id);
        if let Some(lex) = &mut self.lex_engine
            && let Some(text) = options.metadata.search_text.as_deref().or_else(|| std::str::from_utf8(bytes).ok())
        {
            lex.index(frame_id, text);
        }
        let record = CatalogPutRecord {
            frame_id,
            kind: options.kind,
            role: options.role.unwrap_or(Role::Document),
            parent_id: options.parent_id,
            timestamp_ms: timestamp_override.map(|t| t as u64).unwrap_or(default_timestamp_ms),
            chunk_index: options.chunk_index,
            chunk_count: options.chunk_count,
            payload: payload_descriptor,
            metadata: options.metadata,
        };
        self.wal.append(WalRecordKind::CatalogPut, &encode_payload(&record)?)?;
        self.maybe_auto_commit()?;
        Ok(frame_id)
    }

    /// All-or-nothing at WAL boundaries (spec §4.4, §8): every item's constraints (parent
    /// existence — including references to earlier items in the same batch —, chunk
    /// index/count, non-negative timestamp) are validated before any payload bytes or WAL
    /// records are written, so a failing item leaves no earlier item's bytes on disk.
    pub async fn put_batch(
        &mut self,
        items: Vec<(Vec<u8>, PutOptions)>,
        codec: Codec,
        timestamps: Option<Vec<Option<i64>>>,
    ) -> WaxResult<Vec<FrameId>> {
        self.require_writable()?;
        if let Some(ts) = &timestamps
            && ts.len() != items.len()
        {
            return Err(WaxError::InvalidArgument("timestamps length must match items length".into()));
        }
        let refs: Vec<(&PutOptions, Option<i64>)> = items
            .iter()
            .enumerate()
            .map(|(idx, (_, options))| (options, timestamps.as_ref().and_then(|t| t[idx])))
            .collect();
        self.catalog.validate_batch(&refs)?;

        let mut ids = Vec::with_capacity(items.len());
        for (idx, (bytes, options)) in items.into_iter().enumerate() {
            let ts = timestamps.as_ref().and_then(|t| t[idx]);
            ids.push(self.put(&bytes, options, codec, ts).await?);
        }
        Ok(ids)
    }

    pub async fn put_embedding(&mut self, frame_id: FrameId, vector: Vec<f32>) -> WaxResult<()> {
        self.require_writable()?;
        let Some(engine) = &self.vec_engine else {
            return Err(WaxError::InvalidArgument("put_embedding requires enable_vector_search first".into()));
        };
        tokio::task::yield_now().await;
        let dimension = engine.dimension();
        if vector.len() as u32 != dimension {
            return Err(WaxError::InvalidArgument(format!(
                "embedding dimension {} does not match vector index dimension {dimension}",
                vector.len()
            )));
        }
        let sequence = self.embedding_sequence;
        self.embedding_sequence += 1;
        self.catalog.attach_embedding(frame_id, EmbeddingDescriptor { dimension, sequence })?;
        let record = EmbeddingPutRecord { frame_id, dimension, sequence, vector: vector.clone() };
        self.wal.append(WalRecordKind::EmbeddingPut, &encode_payload(&record)?)?;
        self.pending_embeddings.push(record);
        if let Some(engine) = &mut self.vec_engine {
            engine.add(frame_id, &vector)?;
        }
        self.vec_index_staged_this_session = false;
        self.maybe_auto_commit()?;
        Ok(())
    }

    pub async fn supersede(&mut self, old_id: FrameId, new_id: FrameId) -> WaxResult<()> {
        self.require_writable()?;
        tokio::task::yield_now().await;
        self.catalog.supersede(old_id, new_id)?;
        let record = SupersedeRecord { old_id, new_id };
        self.wal.append(WalRecordKind::Supersede, &encode_payload(&record)?)?;
        self.maybe_auto_commit()?;
        Ok(())
    }

    pub async fn delete(&mut self, id: FrameId) -> WaxResult<()> {
        self.require_writable()?;
        tokio::task::yield_now().await;
        self.catalog.delete(id)?;
        let record = DeleteRecord { frame_id: id };
        self.wal.append(WalRecordKind::Delete, &encode_payload(&record)?)?;
        if let Some(lex) = &mut self.lex_engine {
            lex.remove(id);
        }
        if let Some(vec_engine) = &mut self.vec_engine {
            vec_engine.remove(id);
        }
        self.maybe_auto_commit()?;
        Ok(())
    }

    pub async fn delete_by_metadata(&mut self, field: &str, value: &str) -> WaxResult<Vec<FrameId>> {
        self.require_writable()?;
        let ids = self.catalog.delete_by_metadata(field, value)?;
        for id in &ids {
            let record = DeleteRecord { frame_id: *id };
            self.wal.append(WalRecordKind::Delete, &encode_payload(&record)?)?;
            if let Some(lex) = &mut self.lex_engine {
                lex.remove(*id);
            }
            if let Some(vec_engine) = &mut self.vec_engine {
                vec_engine.remove(*id);
            }
        }
        self.maybe_auto_commit()?;
        Ok(ids)
    }

    #[must_use]
    pub fn frame_meta(&self, id: FrameId) -> Option<Frame> {
        self.catalog.frame_meta(id).cloned()
    }

    #[must_use]
    pub fn frame_metas(&self) -> Vec<Frame> {
        self.catalog.frame_metas()
    }

    #[must_use]
    pub fn frame_metas_including_pending(&self, ids: &[FrameId]) -> Vec<Frame> {
        self.catalog.frame_metas_including_pending(ids)
    }

    pub fn frame_content(&self, id: FrameId) -> WaxResult<Vec<u8>> {
        let frame = self.catalog.frame_meta(id).ok_or_else(|| WaxError::NotFound(format!("frame {id} not found")))?;
        self.payload.read(frame.payload)
    }

    #[must_use]
    pub fn frame_preview(&self, id: FrameId, max_bytes: usize) -> Option<String> {
        let frame = self.catalog.frame_meta(id)?;
        let bytes = self.payload.read(frame.payload).ok()?;
        let truncated = &bytes[..bytes.len().min(max_bytes)];
        std::str::from_utf8(truncated).ok().map(str::to_string)
    }

    #[must_use]
    pub fn frame_previews(&self, ids: &[FrameId], max_bytes: usize) -> Vec<Option<String>> {
        ids.iter().map(|id| self.frame_preview(*id, max_bytes)).collect()
    }

    // --- Index staging (spec §4.5). ---

    pub fn stage_lex_index_for_next_commit(&mut self, bytes: Vec<u8>, doc_count: u64) -> WaxResult<()> {
        self.require_writable()?;
        let previous = self.committed_or_pending_manifest(IndexKind::Lex);
        let staged = staging::stage_lex(bytes, doc_count, previous.as_ref());
        self.commit_stage(IndexKind::Lex, staged)
    }

    pub fn stage_vec_index_for_next_commit(
        &mut self,
        bytes: Vec<u8>,
        vector_count: u64,
        dimension: u32,
        metric: Metric,
    ) -> WaxResult<()> {
        self.require_writable()?;
        let previous = self.committed_or_pending_manifest(IndexKind::Vec);
        let pending_embedding_dimension = self.pending_embeddings.first().map(|e| e.dimension);
        let staged =
            staging::stage_vec(bytes, vector_count, dimension, metric, pending_embedding_dimension, previous.as_ref())?;
        self.vec_index_staged_this_session = true;
        self.commit_stage(IndexKind::Vec, staged)
    }

    pub fn stage_kv_index_for_next_commit(&mut self, bytes: Vec<u8>) -> WaxResult<()> {
        self.require_writable()?;
        let previous = self.committed_or_pending_manifest(IndexKind::Kv);
        let staged = staging::stage_kv(bytes, previous.as_ref());
        self.commit_stage(IndexKind::Kv, staged)
    }

    /// Serializes the in-session text engine (if enabled via `enable_text_search`) and stages
    /// it for the next commit. A convenience wrapper over `stage_lex_index_for_next_commit`
    /// for callers using the built-in reference engine rather than an external collaborator.
    pub fn stage_lex_index_from_engine(&mut self) -> WaxResult<()> {
        let Some(engine) = &self.lex_engine else {
            return Err(WaxError::InvalidArgument("enable_text_search was not called".into()));
        };
        let blob = engine.serialize()?;
        let doc_count = engine.doc_count();
        self.stage_lex_index_for_next_commit(blob, doc_count)
    }

    /// Serializes the in-session vector engine (if enabled via `enable_vector_search`) and
    /// stages it for the next commit; see [`stage_lex_index_from_engine`].
    pub fn stage_vec_index_from_engine(&mut self) -> WaxResult<()> {
        let Some(engine) = &self.vec_engine else {
            return Err(WaxError::InvalidArgument("enable_vector_search was not called".into()));
        };
        let blob = engine.serialize()?;
        let vector_count = engine.vector_count();
        let dimension = engine.dimension();
        let metric = engine.metric();
        self.stage_vec_index_for_next_commit(blob, vector_count, dimension, metric)
    }

    /// Serializes the in-session structured-memory engine (if enabled via
    /// `enable_structured_memory`) and stages it for the next commit.
    pub fn stage_kv_index_from_engine(&mut self) -> WaxResult<()> {
        let Some(engine) = &self.kv_engine else {
            return Err(WaxError::InvalidArgument("enable_structured_memory was not called".into()));
        };
        let blob = engine.serialize()?;
        self.stage_kv_index_for_next_commit(blob)
    }

    fn committed_or_pending_manifest(&self, kind: IndexKind) -> Option<IndexManifest> {
        self.pending_index_table.get(kind).or_else(|| self.index_table.get(kind)).copied()
    }

    fn commit_stage(&mut self, kind: IndexKind, staged: staging::StagedIndex) -> WaxResult<()> {
        if staged.stamp_advanced {
            let record = StageIndexRecord {
                blob: staged.blob.clone(),
                stamp: staged.stamp,
                doc_count: staged.doc_count,
                vector_count: staged.vector_count,
                dimension: staged.dimension,
                metric: staged.metric,
            };
            self.wal.append(record_kind_for(kind), &encode_payload(&record)?)?;
            let manifest = IndexManifest {
                kind,
                schema_version: 1,
                blob_offset: 0,
                blob_length: staged.blob.len() as u64,
                stamp: staged.stamp,
                doc_count: staged.doc_count,
                vector_count: staged.vector_count,
                dimension: staged.dimension,
                metric: staged.metric,
            };
            self.pending_index_table.set(manifest);
            self.pending_index_blobs.insert(kind, staged.blob);
        }
        Ok(())
    }

    #[must_use]
    pub fn staged_lex_index_stamp(&self) -> Option<u64> {
        self.committed_or_pending_manifest(IndexKind::Lex).map(|m| m.stamp)
    }

    #[must_use]
    pub fn staged_vec_index_stamp(&self) -> Option<u64> {
        self.committed_or_pending_manifest(IndexKind::Vec).map(|m| m.stamp)
    }

    // --- Commit / search / observability. ---

    pub async fn commit(&mut self) -> WaxResult<()> {
        self.require_writable()?;
        tokio::task::yield_now().await;
        let guard = CommitGuard {
            has_pending_embeddings: !self.pending_embeddings.is_empty(),
            vec_index_staged_this_session: self.vec_index_staged_this_session,
        };
        // Compute the merged index table but don't publish it into `self.index_table` until
        // `commit::commit` actually succeeds — otherwise a guard failure (or a later I/O
        // failure inside the commit sequence) would leave the session's committed-view index
        // manifests reflecting a commit that never happened (spec §4.6's failure model).
        let mut merged_index_table = self.index_table.clone();
        let mut merged_index_blobs = self.index_blobs.clone();
        for kind in [IndexKind::Lex, IndexKind::Vec, IndexKind::Kv] {
            if let Some(manifest) = self.pending_index_table.get(kind).copied() {
                merged_index_table.set(manifest);
            }
            if let Some(blob) = self.pending_index_blobs.get(&kind) {
                merged_index_blobs.insert(kind, blob.clone());
            }
        }
        commit::commit(
            guard,
            &mut self.container,
            &mut self.wal,
            &mut self.payload,
            &mut self.catalog,
            &merged_index_table,
            &merged_index_blobs,
        )?;
        self.index_table = merged_index_table;
        for kind in [IndexKind::Lex, IndexKind::Vec, IndexKind::Kv] {
            if let Some(blob) = self.pending_index_blobs.remove(&kind) {
                self.index_blobs.insert(kind, blob);
            }
        }
        self.pending_embeddings.clear();
        self.vec_index_staged_this_session = false;
        self.pending_index_table = IndexManifestTable::default();
        Ok(())
    }

    pub async fn search(&self, request: SearchRequest) -> WaxResult<Vec<hybrid::SearchHit>> {
        tokio::task::yield_now().await;
        if matches!(request.mode, SearchMode::VectorOnly) && request.query_embedding.is_none() {
            return Err(WaxError::InvalidArgument("vector-only search requires a query embedding".into()));
        }
        let lex_hits = if !matches!(request.mode, SearchMode::VectorOnly) {
            match (&self.lex_engine, &request.query_text) {
                (Some(engine), Some(query)) => engine.search(query, request.top_k.max(50)),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let vec_hits = if !matches!(request.mode, SearchMode::TextOnly) {
            match (&self.vec_engine, &request.query_embedding) {
                (Some(engine), Some(query)) => {
                    let normalized = if engine.requires_normalized_input() {
                        crate::index::engine::normalize(query)
                    } else {
                        query.clone()
                    };
                    engine.search(&normalized, request.top_k.max(50))
                }
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let frames: std::collections::BTreeMap<FrameId, Frame> =
            self.catalog.frame_metas().into_iter().map(|f| (f.frame_id, f)).collect();
        let payload = &self.payload;
        let results = hybrid::fuse(
            lex_hits,
            vec_hits,
            request.mode,
            self.options.effective_rrf_k(),
            request.top_k,
            request.preview_max_bytes,
            &request.frame_filter,
            &frames,
            |id, max_bytes| {
                let frame = frames.get(&id)?;
                let bytes = payload.read(frame.payload).ok()?;
                let truncated = &bytes[..bytes.len().min(max_bytes)];
                std::str::from_utf8(truncated).ok().map(str::to_string)
            },
        );
        Ok(results)
    }

    #[must_use]
    pub fn wal_stats(&self) -> StoreStats {
        StoreStats::collect(
            self.wal.stats(),
            self.catalog.committed_count(),
            self.catalog.pending_count(),
            &self.index_table,
        )
    }

    /// Catalog-surface alias for [`Self::wal_stats`] (spec §6 lists `stats` alongside the
    /// other catalog operations; it is the same snapshot `wal_stats` returns under the
    /// observability surface).
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.wal_stats()
    }

    #[must_use]
    pub fn committed_vec_index_manifest(&self) -> Option<IndexManifest> {
        self.index_table.get(IndexKind::Vec).copied()
    }

    pub fn read_committed_vec_index_bytes(&self) -> WaxResult<Option<Vec<u8>>> {
        if self.index_table.get(IndexKind::Vec).is_none() {
            return Ok(None);
        }
        Ok(self.index_blobs.get(&IndexKind::Vec).cloned())
    }

    /// Deep or shallow consistency check (spec §6 `verify(deep)`). Shallow verify confirms
    /// the active root decodes and the WAL replays without a CRC failure before the stored
    /// frontier; deep verify additionally re-reads every committed frame's payload bytes.
    pub fn verify(&self, deep: bool) -> WaxResult<()> {
        let root = self.container.active_root;
        let ring = WalRing::new(self.container.file.clone(), root.wal_offset, root.wal_capacity);
        let (records, _) = ring.scan_from_cursor(root.wal_tail_sequence, root.wal_tail_physical_cursor)?;
        if records.iter().any(|r| r.sequence > root.wal_head_sequence) {
            return Err(WaxError::Corruption("WAL contains a sequence past the recorded head".into()));
        }
        if deep {
            for frame in self.catalog.frame_metas() {
                self.payload.read(frame.payload)?;
            }
        }
        Ok(())
    }

    pub async fn close(mut self) -> WaxResult<()> {
        if self.writable && self.has_pending_work() {
            warn!("closing a read-write session with pending mutations; auto-committing");
            self.commit().await?;
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Whether there is anything a close/auto-commit would need to flush: pending catalog
    /// mutations, or an index staged this session but not yet committed. A session that only
    /// calls `stage_*_index_from_engine` (no new `put`/`supersede`/`delete`) still has a WAL
    /// stage record written and must not be silently dropped on close.
    fn has_pending_work(&self) -> bool {
        self.catalog.has_pending()
            || self.pending_index_table.lex.is_some()
            || self.pending_index_table.vec.is_some()
            || self.pending_index_table.kv.is_some()
    }

    fn maybe_auto_commit(&mut self) -> WaxResult<()> {
        let stats = self.wal.stats();
        let threshold = (self.options.wal_capacity * self.options.auto_commit_threshold_percent as u64) / 100;
        if stats.pending_bytes >= threshold {
            self.wal.note_auto_commit();
            let guard = CommitGuard {
                has_pending_embeddings: !self.pending_embeddings.is_empty(),
                vec_index_staged_this_session: self.vec_index_staged_this_session,
            };
            if guard.has_pending_embeddings && !guard.vec_index_staged_this_session {
                // Cannot silently auto-commit embeddings without a staged vector index; the
                // caller will see this surfaced at their next explicit `commit`.
                return Ok(());
            }
            commit::commit(
                guard,
                &mut self.container,
                &mut self.wal,
                &mut self.payload,
                &mut self.catalog,
                &self.index_table,
                &self.index_blobs,
            )?;
            self.pending_embeddings.clear();
        }
        Ok(())
    }
}

fn apply_record(
    catalog: &mut FrameCatalog,
    index_table: &mut IndexManifestTable,
    index_blobs: &mut HashMap<IndexKind, Vec<u8>>,
    pending_embeddings: &mut Vec<EmbeddingPutRecord>,
    embedding_sequence: &mut u64,
    record: &WalRecord,
) -> WaxResult<()> {
    match record.kind {
        WalRecordKind::CatalogPut => {
            let r: CatalogPutRecord = decode_payload(&record.payload)?;
            catalog.replay_put(Frame {
                frame_id: r.frame_id,
                kind: r.kind,
                role: r.role,
                parent_id: r.parent_id,
                timestamp_ms: r.timestamp_ms,
                chunk_index: r.chunk_index,
                chunk_count: r.chunk_count,
                payload: r.payload,
                metadata: r.metadata,
                embedding: None,
                status: crate::types::FrameStatus::Active,
                superseded_by: None,
            });
        }
        WalRecordKind::Supersede => {
            let r: SupersedeRecord = decode_payload(&record.payload)?;
            catalog.replay_supersede(r.old_id, r.new_id);
        }
        WalRecordKind::Delete => {
            let r: DeleteRecord = decode_payload(&record.payload)?;
            catalog.replay_delete(r.frame_id);
        }
        WalRecordKind::EmbeddingPut => {
            let r: EmbeddingPutRecord = decode_payload(&record.payload)?;
            catalog.attach_embedding(r.frame_id, EmbeddingDescriptor { dimension: r.dimension, sequence: r.sequence })?;
            *embedding_sequence = (*embedding_sequence).max(r.sequence + 1);
            pending_embeddings.push(r);
        }
        WalRecordKind::StageLexIndex | WalRecordKind::StageVecIndex | WalRecordKind::StageKvIndex => {
            let r: StageIndexRecord = decode_payload(&record.payload)?;
            let kind = match record.kind {
                WalRecordKind::StageLexIndex => IndexKind::Lex,
                WalRecordKind::StageVecIndex => IndexKind::Vec,
                _ => IndexKind::Kv,
            };
            index_table.set(IndexManifest {
                kind,
                schema_version: 1,
                blob_offset: 0,
                blob_length: r.blob.len() as u64,
                stamp: r.stamp,
                doc_count: r.doc_count,
                vector_count: r.vector_count,
                dimension: r.dimension,
                metric: r.metric,
            });
            index_blobs.insert(kind, r.blob);
        }
        WalRecordKind::AppendPayload | WalRecordKind::CheckpointSentinel | WalRecordKind::WrapSentinel | WalRecordKind::CommitMarker => {
            // No catalog/index bookkeeping; these mark structural positions in the log only.
        }
    }
    Ok(())
}

/// Polls for the exclusive writer lock without blocking the executor thread: every retry
/// suspends on `tokio::time::sleep` rather than `std::thread::sleep`, matching the
/// cooperative-suspension contract spec §5 requires of `open` (a caller awaiting this call
/// can be canceled between polls instead of pinning a thread).
async fn open_read_write_with_policy(path: &Path, wait_policy: SessionWaitPolicy) -> WaxResult<Container> {
    match wait_policy {
        SessionWaitPolicy::TryOnce => Container::open(path, true),
        SessionWaitPolicy::Block => loop {
            match Container::open(path, true) {
                Ok(container) => return Ok(container),
                Err(WaxError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => return Err(e),
            }
        },
        SessionWaitPolicy::Timeout(timeout) => {
            let deadline = Instant::now() + timeout;
            loop {
                match Container::open(path, true) {
                    Ok(container) => return Ok(container),
                    Err(WaxError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        if Instant::now() >= deadline {
                            return Err(WaxError::Io(e));
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
