//! # Persistence Coordinator
//!
//! Orchestrates durability for the database: every mutation is logged to the
//! commit log before it is applied in memory, checkpoints are triggered by
//! op-count or WAL-size thresholds, and recovery rebuilds the keyed map from
//! the last snapshot plus WAL replay.
//!
//! Checkpoint execution:
//! 1. Observe `seq` = last written WAL sequence
//! 2. Write the full snapshot atomically, embedding `seq`
//! 3. Append a CHECKPOINT record referencing `seq` and flush the WAL
//! 4. Rotate to a fresh segment
//! 5. Delete every segment older than the newly opened one
//! 6. Reset the ops counter
//!
//! A failure in step 2 leaves the previous snapshot canonical and no
//! rotation happens; a failure between steps 3 and 5 is recoverable because
//! the CHECKPOINT record tells recovery which snapshot to trust.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use tansu_core::error::{Error, Result};
use tansu_core::{Clock, PersistenceConfig, Vector};

use crate::snapshot::{read_snapshot, write_snapshot};
use crate::store::VectorStore;
use crate::wal::{
    decode_delete, decode_row, CommitLog, CommitLogConfig, CommitLogStats, RecordType,
};

/// Coordinator statistics.
#[derive(Debug, Clone, Default)]
pub struct PersistenceStats {
    pub total_logged_inserts: u64,
    pub total_logged_updates: u64,
    pub total_logged_deletes: u64,
    pub total_checkpoints: u64,
    pub total_flushes: u64,
    pub last_replayed_sequence: u64,
    pub ops_since_last_checkpoint: u64,
    pub recovering: bool,
    pub wal: CommitLogStats,
}

/// Outcome of `load_database`.
#[derive(Debug, Clone, Default)]
pub struct ReplaySummary {
    pub snapshot_sequence: u64,
    pub last_replayed_sequence: u64,
    pub records_replayed: u64,
    pub snapshot_loaded: bool,
}

pub struct PersistenceCoordinator {
    config: PersistenceConfig,
    clock: Arc<dyn Clock>,
    log: Option<CommitLog>,
    recovering: Arc<AtomicBool>,
    snapshot_path: PathBuf,
    stats: PersistenceStats,
}

impl PersistenceCoordinator {
    pub fn new(config: PersistenceConfig, clock: Arc<dyn Clock>) -> Self {
        let snapshot_path = config.snapshot_path();
        Self {
            config,
            clock,
            log: None,
            recovering: Arc::new(AtomicBool::new(false)),
            snapshot_path,
            stats: PersistenceStats::default(),
        }
    }

    /// Create directories and open the commit log.
    pub fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.config.data_directory)?;
        std::fs::create_dir_all(&self.config.log_directory)?;
        let log = CommitLog::open(
            &self.config.log_directory,
            CommitLogConfig {
                rotation_size: self.config.log_rotation_size,
                max_segments: self.config.max_log_files,
                sync_on_write: self.config.sync_on_write,
            },
            Arc::clone(&self.clock),
        )?;
        self.log = Some(log);
        Ok(())
    }

    /// Flush the commit log and drop the handle.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }
        self.log = None;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.log.is_some()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Shared flag for a recovery-monitoring thread to poll.
    pub fn recovering_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.recovering)
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Swap the configuration; rotation limits apply from the next append.
    /// Directories cannot be moved on a live coordinator.
    pub fn update_config(&mut self, config: PersistenceConfig) -> Result<()> {
        if config.data_directory != self.config.data_directory
            || config.log_directory != self.config.log_directory
        {
            return Err(Error::Configuration {
                message: "cannot change directories while the database is open".to_string(),
            });
        }
        if let Some(log) = self.log.as_mut() {
            log.set_limits(config.log_rotation_size, config.max_log_files);
        }
        self.config = config;
        Ok(())
    }

    fn log_mut(&mut self) -> Result<&mut CommitLog> {
        if self.recovering.load(Ordering::SeqCst) {
            return Err(Error::NotReady {
                reason: "recovery in progress".to_string(),
            });
        }
        self.log.as_mut().ok_or_else(|| Error::NotReady {
            reason: "persistence not initialized".to_string(),
        })
    }

    /// Append an INSERT record. Returns the assigned sequence; the caller
    /// mutates in-memory state only after this succeeds.
    pub fn log_insert(&mut self, key: &str, vector: &Vector, metadata: &str) -> Result<u64> {
        let sequence = self.log_mut()?.append_insert(key, vector, metadata)?;
        self.stats.total_logged_inserts += 1;
        self.stats.ops_since_last_checkpoint += 1;
        Ok(sequence)
    }

    pub fn log_update(&mut self, key: &str, vector: &Vector, metadata: &str) -> Result<u64> {
        let sequence = self.log_mut()?.append_update(key, vector, metadata)?;
        self.stats.total_logged_updates += 1;
        self.stats.ops_since_last_checkpoint += 1;
        Ok(sequence)
    }

    pub fn log_remove(&mut self, key: &str) -> Result<u64> {
        let sequence = self.log_mut()?.append_delete(key)?;
        self.stats.total_logged_deletes += 1;
        self.stats.ops_since_last_checkpoint += 1;
        Ok(sequence)
    }

    /// fsync the WAL. Returns the number of pending ops, which is always 0:
    /// every append is already durable by the time it returns.
    pub fn flush(&mut self) -> Result<u64> {
        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }
        self.stats.total_flushes += 1;
        Ok(0)
    }

    /// Append a COMMIT boundary marker (no snapshot involved).
    pub fn commit_marker(&mut self) -> Result<u64> {
        let log = self.log_mut()?;
        let sequence = log.append_commit()?;
        log.flush()?;
        Ok(sequence)
    }

    /// Checkpoint decision: ops threshold reached, or the active segment
    /// grew to the rotation size. The time-based trigger is reserved.
    pub fn should_checkpoint(&self) -> bool {
        if self.stats.ops_since_last_checkpoint >= self.config.checkpoint_trigger_ops {
            return true;
        }
        match self.log.as_ref() {
            Some(log) => log.current_segment_size() >= self.config.log_rotation_size,
            None => false,
        }
    }

    /// Write a full snapshot of `store` and retire the WAL behind it.
    /// Returns the snapshot's embedded sequence.
    pub fn save_database(&mut self, store: &VectorStore) -> Result<u64> {
        let log = self.log.as_mut().ok_or_else(|| Error::NotReady {
            reason: "persistence not initialized".to_string(),
        })?;

        // Step 1: the snapshot covers everything logged so far.
        let sequence = log.last_sequence();

        // Step 2: atomic snapshot; failure leaves the old snapshot and the
        // WAL untouched, so the caller may simply retry.
        write_snapshot(
            &self.snapshot_path,
            sequence,
            self.clock.now_micros(),
            store.len() as u64,
            store.iter_records(),
        )?;

        // Steps 3-5.
        let path_str = self.snapshot_path.to_string_lossy().into_owned();
        log.append_checkpoint(sequence, &path_str)?;
        log.flush()?;
        log.rotate()?;
        let pruned = log.prune_older_than_current()?;

        // Step 6.
        self.stats.ops_since_last_checkpoint = 0;
        self.stats.total_checkpoints += 1;

        info!(
            sequence,
            pruned, "checkpoint complete; WAL rotated and pruned"
        );
        Ok(sequence)
    }

    /// Rebuild `store` from the snapshot (if any) plus WAL replay.
    ///
    /// Mutations are refused while this runs. Records that fail their
    /// checksum were already dropped by the segment reader; records whose
    /// payload fails to decode are skipped with a warning.
    pub fn load_database(&mut self, store: &mut VectorStore) -> Result<ReplaySummary> {
        self.recovering.store(true, Ordering::SeqCst);
        let result = self.load_database_inner(store);
        self.recovering.store(false, Ordering::SeqCst);
        result
    }

    fn load_database_inner(&mut self, store: &mut VectorStore) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();

        // Snapshot first; a corrupt one is discarded and the WAL replayed
        // from sequence 0.
        if self.snapshot_path.exists() {
            match read_snapshot(&self.snapshot_path) {
                Ok(snapshot) => {
                    summary.snapshot_sequence = snapshot.sequence;
                    summary.snapshot_loaded = true;
                    info!(
                        sequence = snapshot.sequence,
                        records = snapshot.records.len(),
                        "loaded snapshot"
                    );
                    store.replace_with(snapshot.records);
                }
                Err(e) => {
                    warn!(error = %e, "discarding unreadable snapshot; replaying full WAL");
                    store.clear();
                }
            }
        } else {
            store.clear();
        }

        let log = self.log.as_mut().ok_or_else(|| Error::NotReady {
            reason: "persistence not initialized".to_string(),
        })?;

        let records = log.records_after(summary.snapshot_sequence)?;
        let mut max_sequence = summary.snapshot_sequence;
        for record in records {
            match record.record_type {
                RecordType::Insert | RecordType::Update => {
                    match decode_row(&record.payload) {
                        Ok((key, vector, metadata)) => {
                            store.put(key, vector, metadata);
                            summary.records_replayed += 1;
                        }
                        Err(e) => {
                            warn!(sequence = record.sequence, error = %e, "skipping undecodable row");
                        }
                    }
                }
                RecordType::Delete => match decode_delete(&record.payload) {
                    Ok(key) => {
                        store.remove(&key);
                        summary.records_replayed += 1;
                    }
                    Err(e) => {
                        warn!(sequence = record.sequence, error = %e, "skipping undecodable delete");
                    }
                },
                RecordType::Checkpoint => {
                    // Ordering information only; the snapshot was already chosen.
                    debug!(sequence = record.sequence, "skipping checkpoint record");
                }
                RecordType::Commit => {}
            }
            max_sequence = max_sequence.max(record.sequence);
        }

        summary.last_replayed_sequence = max_sequence;
        self.stats.last_replayed_sequence = max_sequence;
        info!(
            replayed = summary.records_replayed,
            last_sequence = max_sequence,
            "WAL replay complete"
        );
        Ok(summary)
    }

    pub fn statistics(&self) -> PersistenceStats {
        let mut stats = self.stats.clone();
        stats.recovering = self.is_recovering();
        if let Some(log) = self.log.as_ref() {
            stats.wal = log.statistics();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tansu_core::SystemClock;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir, trigger_ops: u64) -> PersistenceCoordinator {
        let config = PersistenceConfig {
            data_directory: dir.path().join("data"),
            log_directory: dir.path().join("logs"),
            checkpoint_trigger_ops: trigger_ops,
            ..PersistenceConfig::default()
        };
        let mut coordinator = PersistenceCoordinator::new(config, Arc::new(SystemClock));
        coordinator.initialize().unwrap();
        coordinator
    }

    fn vector(values: &[f32]) -> Vector {
        Vector::new(values.to_vec()).unwrap()
    }

    #[test]
    fn log_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, 10_000);

        coordinator.log_insert("a", &vector(&[1.0, 2.0]), "ma").unwrap();
        coordinator.log_insert("b", &vector(&[3.0, 4.0]), "").unwrap();
        coordinator.log_update("a", &vector(&[9.0, 9.0]), "ma2").unwrap();
        coordinator.log_remove("b").unwrap();

        let mut store = VectorStore::new();
        let summary = coordinator.load_database(&mut store).unwrap();
        assert_eq!(summary.snapshot_sequence, 0);
        assert_eq!(summary.last_replayed_sequence, 4);
        assert_eq!(store.len(), 1);
        assert_eq!(store.vector("a").unwrap(), &vector(&[9.0, 9.0]));
        assert_eq!(store.metadata("a").unwrap(), "ma2");
    }

    #[test]
    fn checkpoint_writes_snapshot_and_prunes() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, 10_000);

        let mut store = VectorStore::new();
        for i in 0..5 {
            let key = format!("k{}", i);
            let v = vector(&[i as f32, 0.0]);
            coordinator.log_insert(&key, &v, "").unwrap();
            store.put(key, v, String::new());
        }

        let sequence = coordinator.save_database(&store).unwrap();
        assert_eq!(sequence, 5);
        assert!(dir.path().join("data/main.db").exists());

        // Replaying now starts from the snapshot; the WAL holds nothing
        // below it.
        let mut restored = VectorStore::new();
        let summary = coordinator.load_database(&mut restored).unwrap();
        assert!(summary.snapshot_loaded);
        assert_eq!(summary.snapshot_sequence, 5);
        assert_eq!(summary.records_replayed, 0);
        assert_eq!(restored.len(), 5);
    }

    #[test]
    fn should_checkpoint_on_ops_threshold() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, 3);
        assert!(!coordinator.should_checkpoint());
        for i in 0..3 {
            coordinator
                .log_insert(&format!("k{}", i), &vector(&[1.0]), "")
                .unwrap();
        }
        assert!(coordinator.should_checkpoint());

        let store = VectorStore::new();
        coordinator.save_database(&store).unwrap();
        assert!(!coordinator.should_checkpoint());
    }

    #[test]
    fn mutations_refused_while_recovering() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, 10_000);

        // Shared flag as a recovery-monitoring thread would observe it.
        let flag = coordinator.recovering_flag();
        coordinator.recovering.store(true, Ordering::SeqCst);
        assert!(flag.load(Ordering::SeqCst));
        assert!(matches!(
            coordinator.log_insert("a", &vector(&[1.0]), ""),
            Err(Error::NotReady { .. })
        ));

        coordinator.recovering.store(false, Ordering::SeqCst);
        assert!(!flag.load(Ordering::SeqCst));
        coordinator.log_insert("a", &vector(&[1.0]), "").unwrap();
    }

    #[test]
    fn flush_returns_zero_pending_ops() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, 10_000);
        coordinator.log_insert("a", &vector(&[1.0]), "").unwrap();
        assert_eq!(coordinator.flush().unwrap(), 0);
        assert_eq!(coordinator.statistics().total_flushes, 1);
    }

    #[test]
    fn checkpoint_is_idempotent_without_mutations() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(&dir, 10_000);
        let mut store = VectorStore::new();
        coordinator.log_insert("a", &vector(&[1.0]), "").unwrap();
        store.put("a".to_string(), vector(&[1.0]), String::new());

        let first = coordinator.save_database(&store).unwrap();
        let second = coordinator.save_database(&store).unwrap();
        // The second snapshot covers the CHECKPOINT record of the first.
        assert!(second >= first);

        let mut restored = VectorStore::new();
        coordinator.load_database(&mut restored).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.contains("a"));
    }
}
