//! # Database Façade
//!
//! Serializes mutations behind a single logical mutex, fans them out to the
//! keyed map, the active indexes, and the persistence coordinator, and
//! serves reads.
//!
//! ```text
//!  Write Path:                       Read Path:
//!  ┌─────────┐   ┌────────────┐      ┌─────────┐   ┌─────────┐
//!  │ Mutation│──>│ Commit Log │      │  Query  │──>│  Index  │
//!  └─────────┘   └─────┬──────┘      └─────────┘   └────┬────┘
//!                      │ (durable)                      │ candidates
//!                      ▼                                ▼
//!                ┌──────────┐                    ┌────────────┐
//!                │ Keyed Map│                    │ Keyed Map  │
//!                │ + Indexes│                    │ (re-score) │
//!                └──────────┘                    └────────────┘
//! ```
//!
//! The write discipline is log-then-mutate: a mutation reaches the commit
//! log before any in-memory structure changes, so a WAL failure leaves the
//! map and indexes untouched.
//!
//! Approximate indexes never remove entries. Updates and deletes leave stale
//! entries behind; searches over-fetch by the tracked stale count, drop
//! candidates missing from the map, and re-score the rest against the map's
//! current vectors. Indexes are rebuilt from the map at checkpoint
//! boundaries once stale entries exceed a quarter of the live records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use tansu_core::error::{Error, Result};
use tansu_core::{
    Clock, DatabaseConfig, DatabaseMetrics, DistanceKind, HnswConfig, IndexAlgorithm, LshConfig,
    MetricsSnapshot, PersistenceConfig, RandomSource, SystemClock, Vector,
};
use tansu_index::{HnswIndex, KdTree, LshIndex, VectorIndex};

use crate::coordinator::{PersistenceCoordinator, PersistenceStats};
use crate::recovery::{
    analyze_disk_state, RecoveryEvent, RecoveryInfo, RecoveryState, RecoveryStateMachine,
};
use crate::store::VectorStore;

/// Rebuild the indexes once stale entries exceed this fraction of live
/// records (checked at checkpoint boundaries).
const STALE_REBUILD_DIVISOR: usize = 4;

/// Result record for batch mutations.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub success: bool,
    pub operations_committed: usize,
    pub transaction_id: String,
    pub duration: Duration,
    pub error_message: Option<String>,
}

/// One similarity-search hit with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    pub key: String,
    pub distance: f32,
    pub metadata: String,
}

/// Point-in-time database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStatistics {
    pub vector_count: usize,
    pub dimensions: usize,
    pub algorithm: IndexAlgorithm,
    pub metric: DistanceKind,
    pub ready: bool,
    pub recovering: bool,
    pub recovery_state: &'static str,
    pub stale_index_entries: usize,
    pub metrics: MetricsSnapshot,
    pub persistence: Option<PersistenceStats>,
}

/// Outcome of one mutation attempt under the lock.
enum Applied {
    Yes,
    /// Contract violation that reports as `false` rather than an error
    /// (duplicate key, absent key, NaN component).
    No(&'static str),
}

enum ApproxIndex {
    None,
    Lsh(LshIndex),
    Hnsw(HnswIndex),
}

impl ApproxIndex {
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        match self {
            ApproxIndex::None => Ok(()),
            ApproxIndex::Lsh(index) => index.insert(key, vector),
            ApproxIndex::Hnsw(index) => index.insert(key, vector),
        }
    }
}

struct DatabaseInner {
    dimensions: usize,
    store: VectorStore,
    kdtree: KdTree,
    approx: ApproxIndex,
    algorithm: IndexAlgorithm,
    metric: DistanceKind,
    coordinator: Option<PersistenceCoordinator>,
    state_machine: RecoveryStateMachine,
    /// Updates + deletes since the last index rebuild
    stale_entries: usize,
    lsh_config: LshConfig,
    hnsw_config: HnswConfig,
    index_seed: Option<u64>,
}

/// The durable indexed vector store.
pub struct Database {
    dimensions: usize,
    enable_persistence: bool,
    enable_batch_operations: bool,
    inner: Mutex<DatabaseInner>,
    ready: AtomicBool,
    metrics: DatabaseMetrics,
    clock: Arc<dyn Clock>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(SystemClock), None)
    }

    /// Deterministic index construction for reproducible tests.
    pub fn new_seeded(config: DatabaseConfig, seed: u64) -> Result<Self> {
        Self::with_parts(config, Arc::new(SystemClock), Some(seed))
    }

    pub fn with_parts(
        config: DatabaseConfig,
        clock: Arc<dyn Clock>,
        index_seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;

        let metric = DistanceKind::default();
        let approx = build_approx(
            config.algorithm,
            config.dimensions,
            config.lsh,
            config.hnsw,
            metric,
            index_seed,
        );
        let coordinator = if config.enable_atomic_persistence {
            Some(PersistenceCoordinator::new(
                config.persistence.clone(),
                Arc::clone(&clock),
            ))
        } else {
            None
        };

        Ok(Self {
            dimensions: config.dimensions,
            enable_persistence: config.enable_atomic_persistence,
            enable_batch_operations: config.enable_batch_operations,
            inner: Mutex::new(DatabaseInner {
                dimensions: config.dimensions,
                store: VectorStore::new(),
                kdtree: KdTree::new(config.dimensions, metric),
                approx,
                algorithm: config.algorithm,
                metric,
                coordinator,
                state_machine: RecoveryStateMachine::new(),
                stale_entries: 0,
                lsh_config: config.lsh,
                hnsw_config: config.hnsw,
                index_seed,
            }),
            ready: AtomicBool::new(false),
            metrics: DatabaseMetrics::new(),
            clock,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Analyze on-disk state, recover if needed, and promote to READY.
    pub fn initialize(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        inner.state_machine.process_event(RecoveryEvent::StartAnalysis);

        if let Some(coordinator) = inner.coordinator.as_mut() {
            coordinator.initialize()?;
            let info = analyze_disk_state(
                &coordinator.config().data_directory,
                &coordinator.config().log_directory,
            )?;
            inner.state_machine.set_info(info);
        }
        inner
            .state_machine
            .process_event(RecoveryEvent::AnalysisComplete);

        match inner.state_machine.state() {
            RecoveryState::Clean => {
                inner
                    .state_machine
                    .process_event(RecoveryEvent::RecoveryComplete);
            }
            RecoveryState::RecoveryNeeded => {
                inner.state_machine.process_event(RecoveryEvent::RecoveryStart);
                let inner = &mut *inner;
                let coordinator = inner.coordinator.as_mut().ok_or_else(|| Error::Internal {
                    message: "recovery required but persistence is disabled".to_string(),
                })?;
                match coordinator.load_database(&mut inner.store) {
                    Ok(summary) => {
                        inner
                            .state_machine
                            .set_last_replayed(summary.last_replayed_sequence);
                        inner
                            .state_machine
                            .process_event(RecoveryEvent::RecoveryComplete);
                    }
                    Err(e) => {
                        inner
                            .state_machine
                            .process_event(RecoveryEvent::FailureDetected);
                        inner
                            .state_machine
                            .process_event(RecoveryEvent::FailureDetected);
                        return Err(Error::RecoveryFailed {
                            message: e.to_string(),
                        });
                    }
                }
                rebuild_indexes(inner)?;
                self.metrics.record_index_rebuild();
                inner
                    .state_machine
                    .process_event(RecoveryEvent::RecoveryComplete);
            }
            other => {
                return Err(Error::RecoveryFailed {
                    message: format!("analysis ended in state {}", other.name()),
                });
            }
        }

        self.ready.store(true, Ordering::SeqCst);
        info!(
            records = inner.store.len(),
            state = inner.state_machine.state().name(),
            "database initialized"
        );
        Ok(())
    }

    /// Flush the WAL and stop accepting operations. A subsequent
    /// `initialize` behaves like a process restart.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ready.store(false, Ordering::SeqCst);
        if let Some(coordinator) = inner.coordinator.as_mut() {
            coordinator.shutdown()?;
        }
        inner.state_machine = RecoveryStateMachine::new();
        info!("database shut down");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(Error::NotReady {
                reason: "call initialize() first".to_string(),
            });
        }
        Ok(())
    }

    fn check_dimensions(&self, vector: &Vector) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert a new record. Returns `Ok(false)` for a NaN component or a
    /// duplicate key; the store is untouched in both cases.
    pub fn insert(&self, key: &str, vector: Vector, metadata: &str) -> Result<bool> {
        self.ensure_ready()?;
        self.check_dimensions(&vector)?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let mut inner = self.inner.lock();
        let applied = insert_locked(&mut inner, key, vector, metadata)?;
        match applied {
            Applied::Yes => {
                self.metrics.record_insert();
                self.after_mutation(&mut inner);
                Ok(true)
            }
            Applied::No(reason) => {
                self.metrics.record_rejected_mutation();
                warn!(key, reason, "insert rejected");
                Ok(false)
            }
        }
    }

    /// Replace an existing record. Returns `Ok(false)` when the key is
    /// absent or the vector has a NaN component.
    pub fn update(&self, key: &str, vector: Vector, metadata: &str) -> Result<bool> {
        self.ensure_ready()?;
        self.check_dimensions(&vector)?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let mut inner = self.inner.lock();
        let applied = update_locked(&mut inner, key, vector, metadata)?;
        match applied {
            Applied::Yes => {
                self.metrics.record_update();
                self.after_mutation(&mut inner);
                Ok(true)
            }
            Applied::No(reason) => {
                self.metrics.record_rejected_mutation();
                warn!(key, reason, "update rejected");
                Ok(false)
            }
        }
    }

    /// Remove a record. Returns `Ok(false)` when the key is absent.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;

        let mut inner = self.inner.lock();
        let applied = remove_locked(&mut inner, key)?;
        match applied {
            Applied::Yes => {
                self.metrics.record_delete();
                self.after_mutation(&mut inner);
                Ok(true)
            }
            Applied::No(_) => {
                self.metrics.record_rejected_mutation();
                Ok(false)
            }
        }
    }

    /// Auto-checkpoint after a successful mutation. A checkpoint failure is
    /// logged but never fails the mutation that triggered it.
    fn after_mutation(&self, inner: &mut DatabaseInner) {
        let due = inner
            .coordinator
            .as_ref()
            .map(|c| c.should_checkpoint())
            .unwrap_or(false);
        if !due {
            return;
        }
        match self.checkpoint_locked(inner) {
            Ok(sequence) => info!(sequence, "automatic checkpoint"),
            Err(e) => warn!(error = %e, "automatic checkpoint failed; continuing"),
        }
    }

    fn checkpoint_locked(&self, inner: &mut DatabaseInner) -> Result<u64> {
        let sequence = {
            let inner = &mut *inner;
            let coordinator = inner.coordinator.as_mut().ok_or_else(|| Error::NotReady {
                reason: "persistence disabled".to_string(),
            })?;
            coordinator.save_database(&inner.store)?
        };
        self.metrics.record_checkpoint();

        // Checkpoint boundaries are where stale index entries get cleared.
        if inner.stale_entries > 0
            && inner.stale_entries >= inner.store.len() / STALE_REBUILD_DIVISOR
        {
            rebuild_indexes(inner)?;
            self.metrics.record_index_rebuild();
        }
        Ok(sequence)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current (vector, metadata) for a key.
    pub fn get(&self, key: &str) -> Option<(Vector, String)> {
        self.inner.lock().store.record(key)
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.inner.lock().store.metadata(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// k-nearest neighbors of `query` under the active metric, ascending by
    /// distance. Uses the active index; `exact` serves from the KD-tree.
    pub fn similarity_search(&self, query: &Vector, k: usize) -> Result<Vec<(String, f32)>> {
        self.ensure_ready()?;
        self.check_dimensions(query)?;
        let inner = self.inner.lock();
        let results = search_locked(&inner, query, k);
        match &results {
            Ok(_) => self.metrics.record_search(),
            Err(_) => self.metrics.record_search_error(),
        }
        results
    }

    /// Like `similarity_search`, with each hit's metadata attached.
    pub fn similarity_search_with_metadata(
        &self,
        query: &Vector,
        k: usize,
    ) -> Result<Vec<SearchMatch>> {
        self.ensure_ready()?;
        self.check_dimensions(query)?;
        let inner = self.inner.lock();
        let hits = search_locked(&inner, query, k)?;
        self.metrics.record_search();
        Ok(hits
            .into_iter()
            .map(|(key, distance)| {
                let metadata = inner.store.metadata(&key).unwrap_or_default();
                SearchMatch {
                    key,
                    distance,
                    metadata,
                }
            })
            .collect())
    }

    /// Run several queries under one lock acquisition; queries execute in
    /// parallel and observe one consistent snapshot of the store.
    pub fn batch_similarity_search(
        &self,
        queries: &[Vector],
        k: usize,
    ) -> Result<Vec<Vec<(String, f32)>>> {
        self.ensure_batches_enabled()?;
        for query in queries {
            self.check_dimensions(query)?;
        }
        let guard = self.inner.lock();
        let inner = &*guard;
        let results = queries
            .par_iter()
            .map(|query| search_locked(inner, query, k))
            .collect::<Result<Vec<_>>>()?;
        self.metrics.record_search();
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Batch mutations
    // ------------------------------------------------------------------

    fn ensure_batches_enabled(&self) -> Result<()> {
        if !self.enable_batch_operations {
            return Err(Error::Configuration {
                message: "batch operations are disabled".to_string(),
            });
        }
        self.ensure_ready()
    }

    /// Insert many records. Atomic per item, not across the batch: the
    /// first failure stops processing and everything before it stays
    /// committed.
    pub fn batch_insert(
        &self,
        keys: &[String],
        vectors: &[Vector],
        metadata: Option<&[String]>,
    ) -> Result<BatchResult> {
        self.ensure_batches_enabled()?;
        self.run_batch(keys, vectors, metadata, |inner, key, vector, meta| {
            insert_locked(inner, key, vector, meta)
        })
    }

    pub fn batch_update(
        &self,
        keys: &[String],
        vectors: &[Vector],
        metadata: Option<&[String]>,
    ) -> Result<BatchResult> {
        self.ensure_batches_enabled()?;
        self.run_batch(keys, vectors, metadata, |inner, key, vector, meta| {
            update_locked(inner, key, vector, meta)
        })
    }

    pub fn batch_delete(&self, keys: &[String]) -> Result<BatchResult> {
        self.ensure_batches_enabled()?;
        let start = Instant::now();
        let transaction_id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();

        let mut committed = 0usize;
        let mut error_message = None;
        for key in keys {
            match remove_locked(&mut inner, key) {
                Ok(Applied::Yes) => {
                    committed += 1;
                    self.metrics.record_delete();
                }
                Ok(Applied::No(reason)) => {
                    error_message = Some(format!("{}: {}", key, reason));
                    break;
                }
                Err(e) => {
                    error_message = Some(format!("{}: {}", key, e));
                    break;
                }
            }
        }

        self.finish_batch(&mut inner, committed);
        self.metrics.record_batch_operation();
        Ok(BatchResult {
            success: error_message.is_none(),
            operations_committed: committed,
            transaction_id,
            duration: start.elapsed(),
            error_message,
        })
    }

    fn run_batch<F>(
        &self,
        keys: &[String],
        vectors: &[Vector],
        metadata: Option<&[String]>,
        mut apply: F,
    ) -> Result<BatchResult>
    where
        F: FnMut(&mut DatabaseInner, &str, Vector, &str) -> Result<Applied>,
    {
        if keys.len() != vectors.len() {
            return Err(Error::BatchValidation {
                message: format!("{} keys but {} vectors", keys.len(), vectors.len()),
            });
        }
        if let Some(meta) = metadata {
            if meta.len() != keys.len() {
                return Err(Error::BatchValidation {
                    message: format!("{} keys but {} metadata entries", keys.len(), meta.len()),
                });
            }
        }
        for vector in vectors {
            self.check_dimensions(vector)?;
        }
        for key in keys {
            if key.is_empty() {
                return Err(Error::EmptyKey);
            }
        }

        let start = Instant::now();
        let transaction_id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();

        let mut committed = 0usize;
        let mut error_message = None;
        for (i, key) in keys.iter().enumerate() {
            let meta = metadata.map(|m| m[i].as_str()).unwrap_or("");
            match apply(&mut inner, key, vectors[i].clone(), meta) {
                Ok(Applied::Yes) => committed += 1,
                Ok(Applied::No(reason)) => {
                    error_message = Some(format!("{}: {}", key, reason));
                    break;
                }
                Err(e) => {
                    error_message = Some(format!("{}: {}", key, e));
                    break;
                }
            }
        }

        self.finish_batch(&mut inner, committed);
        self.metrics.record_batch_operation();
        Ok(BatchResult {
            success: error_message.is_none(),
            operations_committed: committed,
            transaction_id,
            duration: start.elapsed(),
            error_message,
        })
    }

    /// Append the COMMIT boundary marker and run the auto-checkpoint check
    /// once for the whole batch.
    fn finish_batch(&self, inner: &mut DatabaseInner, committed: usize) {
        if committed > 0 {
            if let Some(coordinator) = inner.coordinator.as_mut() {
                if let Err(e) = coordinator.commit_marker() {
                    warn!(error = %e, "failed to append batch commit marker");
                }
            }
        }
        self.after_mutation(inner);
    }

    // ------------------------------------------------------------------
    // Maintenance & introspection
    // ------------------------------------------------------------------

    /// fsync the WAL. Returns the count of WAL-resident uncommitted ops,
    /// which is always 0 under synchronous appends.
    pub fn flush(&self) -> Result<u64> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock();
        match inner.coordinator.as_mut() {
            Some(coordinator) => coordinator.flush(),
            None => Ok(0),
        }
    }

    /// Force a full snapshot now. Returns the snapshot's embedded sequence.
    pub fn checkpoint(&self) -> Result<u64> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock();
        self.checkpoint_locked(&mut inner)
    }

    pub fn statistics(&self) -> DatabaseStatistics {
        let inner = self.inner.lock();
        DatabaseStatistics {
            vector_count: inner.store.len(),
            dimensions: self.dimensions,
            algorithm: inner.algorithm,
            metric: inner.metric,
            ready: self.ready.load(Ordering::SeqCst),
            recovering: inner
                .coordinator
                .as_ref()
                .map(|c| c.is_recovering())
                .unwrap_or(false),
            recovery_state: inner.state_machine.state().name(),
            stale_index_entries: inner.stale_entries,
            metrics: self.metrics.snapshot(),
            persistence: inner.coordinator.as_ref().map(|c| c.statistics()),
        }
    }

    pub fn recovery_info(&self) -> RecoveryInfo {
        self.inner.lock().state_machine.info().clone()
    }

    /// Swap the distance metric and rebuild every index under it.
    pub fn set_distance_metric(&self, metric: DistanceKind) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.metric = metric;
        rebuild_indexes(&mut inner)?;
        self.metrics.record_index_rebuild();
        info!(metric = metric.name(), "distance metric changed");
        Ok(())
    }

    /// Select the approximate algorithm: `lsh` (p1 = tables, p2 = hash
    /// bits), `hnsw` (p1 = max connections, p2 = ef_construction), or
    /// `exact`. The new index is built from the current map.
    pub fn set_approximate_algorithm(&self, name: &str, p1: usize, p2: usize) -> Result<()> {
        let algorithm = IndexAlgorithm::parse(name)?;
        let mut inner = self.inner.lock();

        match algorithm {
            IndexAlgorithm::Lsh => {
                if p1 > 0 {
                    inner.lsh_config.tables = p1;
                }
                if p2 > 0 {
                    inner.lsh_config.hash_bits = p2;
                }
            }
            IndexAlgorithm::Hnsw => {
                if p1 > 0 {
                    inner.hnsw_config.max_connections = p1;
                }
                if p2 > 0 {
                    inner.hnsw_config.ef_construction = p2;
                }
            }
            IndexAlgorithm::Exact => {}
        }

        inner.algorithm = algorithm;
        let approx = build_approx(
            algorithm,
            self.dimensions,
            inner.lsh_config,
            inner.hnsw_config,
            inner.metric,
            inner.index_seed,
        );
        inner.approx = approx;
        populate_approx(&mut inner)?;
        self.metrics.record_index_rebuild();
        info!(algorithm = name, "approximate algorithm changed");
        Ok(())
    }

    /// Update WAL/checkpoint limits; directories cannot move while open.
    pub fn update_persistence_config(&self, config: PersistenceConfig) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.coordinator.as_mut() {
            Some(coordinator) => coordinator.update_config(config),
            None => Err(Error::Configuration {
                message: "persistence is disabled".to_string(),
            }),
        }
    }
}

// ----------------------------------------------------------------------
// Operations on the locked state
// ----------------------------------------------------------------------

fn insert_locked(
    inner: &mut DatabaseInner,
    key: &str,
    vector: Vector,
    metadata: &str,
) -> Result<Applied> {
    if vector.has_nan() {
        return Ok(Applied::No("NaN component"));
    }
    if inner.store.contains(key) {
        return Ok(Applied::No("duplicate key"));
    }

    // Log first; memory only advances when the record is durable.
    if let Some(coordinator) = inner.coordinator.as_mut() {
        coordinator.log_insert(key, &vector, metadata)?;
    }

    inner.kdtree.insert(key, vector.as_slice())?;
    inner.approx.insert(key, vector.as_slice())?;
    inner.store.put(key.to_string(), vector, metadata.to_string());
    Ok(Applied::Yes)
}

fn update_locked(
    inner: &mut DatabaseInner,
    key: &str,
    vector: Vector,
    metadata: &str,
) -> Result<Applied> {
    if vector.has_nan() {
        return Ok(Applied::No("NaN component"));
    }
    if !inner.store.contains(key) {
        return Ok(Applied::No("key not present"));
    }

    if let Some(coordinator) = inner.coordinator.as_mut() {
        coordinator.log_update(key, &vector, metadata)?;
    }

    // Re-insert; the old entries stay behind as stale candidates.
    inner.kdtree.insert(key, vector.as_slice())?;
    inner.approx.insert(key, vector.as_slice())?;
    inner.store.put(key.to_string(), vector, metadata.to_string());
    inner.stale_entries += 1;
    Ok(Applied::Yes)
}

fn remove_locked(inner: &mut DatabaseInner, key: &str) -> Result<Applied> {
    if !inner.store.contains(key) {
        return Ok(Applied::No("key not present"));
    }

    if let Some(coordinator) = inner.coordinator.as_mut() {
        coordinator.log_remove(key)?;
    }

    inner.store.remove(key);
    inner.stale_entries += 1;
    Ok(Applied::Yes)
}

/// Candidate pipeline shared by every search entry point: over-fetch by the
/// stale count, drop candidates absent from the map, re-score against the
/// map's current vector, deduplicate, sort, truncate.
fn search_locked(inner: &DatabaseInner, query: &Vector, k: usize) -> Result<Vec<(String, f32)>> {
    if k == 0 || inner.store.is_empty() {
        return Ok(Vec::new());
    }

    let fetch = k.saturating_add(inner.stale_entries);
    let candidates = match (&inner.approx, inner.algorithm) {
        (ApproxIndex::Lsh(index), IndexAlgorithm::Lsh) => index.search(query.as_slice(), fetch)?,
        (ApproxIndex::Hnsw(index), IndexAlgorithm::Hnsw) => {
            index.search(query.as_slice(), fetch)?
        }
        _ => inner.kdtree.search(query.as_slice(), fetch)?,
    };

    let mut results: Vec<(String, f32)> = Vec::with_capacity(candidates.len().min(k));
    let mut seen = std::collections::HashSet::new();
    for candidate in candidates {
        if !seen.insert(candidate.key.clone()) {
            continue;
        }
        // The map is authoritative: stale index entries either vanished
        // (deleted) or moved (updated); score the current vector.
        if let Some(current) = inner.store.vector(&candidate.key) {
            let distance = inner.metric.distance(query, current)?;
            results.push((candidate.key, distance));
        }
    }

    results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(k);
    Ok(results)
}

fn build_approx(
    algorithm: IndexAlgorithm,
    dimensions: usize,
    lsh: LshConfig,
    hnsw: HnswConfig,
    metric: DistanceKind,
    seed: Option<u64>,
) -> ApproxIndex {
    let source = || match seed {
        Some(seed) => RandomSource::from_seed(seed),
        None => RandomSource::from_entropy(),
    };
    match algorithm {
        IndexAlgorithm::Exact => ApproxIndex::None,
        IndexAlgorithm::Lsh => {
            let mut random = source();
            ApproxIndex::Lsh(LshIndex::new(dimensions, lsh, metric, &mut random))
        }
        IndexAlgorithm::Hnsw => ApproxIndex::Hnsw(HnswIndex::new(dimensions, hnsw, metric, source())),
    }
}

/// Rebuild the KD-tree and the active approximate index from the map.
fn rebuild_indexes(inner: &mut DatabaseInner) -> Result<()> {
    let mut kdtree = KdTree::new(inner.dimensions, inner.metric);
    kdtree.rebuild(inner.store.iter_vectors())?;
    inner.kdtree = kdtree;
    populate_approx(inner)?;
    inner.stale_entries = 0;
    Ok(())
}

/// Rebuild only the approximate index from the map.
fn populate_approx(inner: &mut DatabaseInner) -> Result<()> {
    match &mut inner.approx {
        ApproxIndex::None => Ok(()),
        ApproxIndex::Lsh(index) => {
            index.set_metric(inner.metric);
            index.rebuild(inner.store.iter_vectors())
        }
        ApproxIndex::Hnsw(index) => {
            index.set_metric(inner.metric);
            index.rebuild(inner.store.iter_vectors())
        }
    }
}
