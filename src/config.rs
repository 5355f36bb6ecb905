//! Store-level configuration: a plain struct with defaults, covering durability and commit
//! thresholds.

use std::time::Duration;

/// Page size used for the two root header pages. Fixed at one OS page.
pub const PAGE_SIZE: usize = 4096;

/// Options accepted by `Store::create`/`Store::open`.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Initial WAL ring capacity in bytes, chosen at creation time and fixed thereafter.
    pub wal_capacity: u64,
    /// Fraction of WAL capacity that triggers an auto-commit during `put`.
    pub auto_commit_threshold_percent: u8,
    /// Whether `Store::open` should create the file if it does not exist.
    pub create_if_missing: bool,
    /// RRF constant `K`. Values `<= 0` are clamped to 1 per spec.
    pub rrf_k: f64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            wal_capacity: 16 * 1024 * 1024,
            auto_commit_threshold_percent: 80,
            create_if_missing: true,
            rrf_k: 60.0,
        }
    }
}

impl StoreOptions {
    #[must_use]
    pub fn effective_rrf_k(&self) -> f64 {
        if self.rrf_k <= 0.0 { 1.0 } else { self.rrf_k }
    }
}

/// Which concrete `VecEngine` implementation a session should prefer when more than one is
/// available for a committed or fresh vector index (spec §4.7/§6). The reference
/// implementation ships a CPU brute-force engine and a "GPU-style" brute-force engine backed
/// by a bounded transient buffer pool (spec §5); external collaborators may register further
/// engines and interpret this the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorEnginePreference {
    CpuOnly,
    MetalPreferred,
    #[default]
    Auto,
}

/// How a read-write session should behave when another writer already holds the file lock.
#[derive(Debug, Clone, Copy)]
pub enum SessionWaitPolicy {
    /// Fail immediately with `WaxError::Io` if the lock is held.
    TryOnce,
    /// Poll until the lock is acquired, with no timeout.
    Block,
    /// Poll until the lock is acquired or the timeout elapses.
    Timeout(Duration),
}

impl Default for SessionWaitPolicy {
    fn default() -> Self {
        SessionWaitPolicy::TryOnce
    }
}
