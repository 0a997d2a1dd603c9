//! # Commit Log (Write-Ahead Log)
//!
//! Append-only sequence of typed, sequence-numbered, checksummed records
//! across rotating segment files named `commit.log.NNNNNN`.
//!
//! Durability contract: when an append returns `Ok`, the record is flushed
//! (and fsynced when `sync_on_write` is set, the default) to the active
//! segment. Sequence numbers are strictly increasing for the life of the
//! store; they survive reopen and are never reset.
//!
//! ```text
//! logs/
//!   commit.log.000001   closed segment
//!   commit.log.000002   closed segment
//!   commit.log.000003   active segment (open for append)
//! ```
//!
//! Rotation happens when the active segment reaches the configured size or
//! when the persistence coordinator requests it at a checkpoint boundary.
//! Pruning removes segments fully covered by the last snapshot.

mod file;
mod iterator;
mod types;

pub use iterator::WalRecordIterator;
pub use types::{
    decode_checkpoint, decode_delete, decode_row, encode_checkpoint, encode_delete, encode_row,
    record_checksum, CommitLogConfig, RecordType, WalRecord, RECORD_HEADER_SIZE,
};

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use tansu_core::error::Result;
use tansu_core::{Clock, Vector};

use file::{io_error, list_segments, segment_file_name, segment_max_sequence, write_record};

struct ActiveSegment {
    index: u64,
    writer: BufWriter<File>,
    size: u64,
}

/// Commit log statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct CommitLogStats {
    pub total_records: u64,
    pub total_bytes: u64,
    pub next_sequence: u64,
    pub current_segment_size: u64,
}

pub struct CommitLog {
    log_dir: PathBuf,
    config: CommitLogConfig,
    clock: Arc<dyn Clock>,
    current: ActiveSegment,
    next_sequence: u64,
    total_records: u64,
    total_bytes: u64,
}

impl CommitLog {
    /// Open the log in `log_dir`, resuming sequence numbering from whatever
    /// segments already exist, or create `commit.log.000001`.
    pub fn open(
        log_dir: impl AsRef<Path>,
        config: CommitLogConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| io_error(format!("creating log directory {:?}", log_dir), e))?;

        let segments = list_segments(&log_dir)?;
        let (segment_index, next_sequence) = match segments.last() {
            Some(&(last_index, _)) => {
                let mut max_sequence = 0u64;
                for (_, path) in &segments {
                    if let Some(seq) = segment_max_sequence(path)? {
                        max_sequence = max_sequence.max(seq);
                    }
                }
                (last_index, max_sequence + 1)
            }
            None => (1, 1),
        };

        let path = log_dir.join(segment_file_name(segment_index));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(format!("opening segment {:?}", path), e))?;
        let size = file.metadata()?.len();

        info!(
            segment = segment_index,
            next_sequence, "commit log opened"
        );

        Ok(Self {
            log_dir,
            config,
            clock,
            current: ActiveSegment {
                index: segment_index,
                writer: BufWriter::new(file),
                size,
            },
            next_sequence,
            total_records: 0,
            total_bytes: 0,
        })
    }

    pub fn append_insert(&mut self, key: &str, vector: &Vector, metadata: &str) -> Result<u64> {
        self.append(RecordType::Insert, encode_row(key, vector, metadata))
    }

    pub fn append_update(&mut self, key: &str, vector: &Vector, metadata: &str) -> Result<u64> {
        self.append(RecordType::Update, encode_row(key, vector, metadata))
    }

    pub fn append_delete(&mut self, key: &str) -> Result<u64> {
        self.append(RecordType::Delete, encode_delete(key))
    }

    pub fn append_checkpoint(&mut self, snapshot_sequence: u64, snapshot_path: &str) -> Result<u64> {
        self.append(
            RecordType::Checkpoint,
            encode_checkpoint(snapshot_sequence, snapshot_path),
        )
    }

    pub fn append_commit(&mut self) -> Result<u64> {
        self.append(RecordType::Commit, Bytes::new())
    }

    /// Append one record: assign the next sequence, checksum, write, flush
    /// (+fsync), then rotate if the segment crossed the size threshold.
    fn append(&mut self, record_type: RecordType, payload: Bytes) -> Result<u64> {
        let sequence = self.next_sequence;
        let record = WalRecord::new(self.clock.now_micros(), record_type, sequence, payload);
        let len = record.serialized_len() as u64;

        write_record(&mut self.current.writer, &record)?;
        self.current.writer.flush()?;
        if self.config.sync_on_write {
            self.current.writer.get_ref().sync_all()?;
        }

        self.next_sequence += 1;
        self.current.size += len;
        self.total_records += 1;
        self.total_bytes += len;

        if self.current.size >= self.config.rotation_size {
            self.rotate()?;
            self.enforce_retention()?;
        }

        Ok(sequence)
    }

    /// Flush buffered bytes and force them to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.current.writer.flush()?;
        self.current.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Open a fresh segment; further records land there. Sequence numbering
    /// is unaffected.
    pub fn rotate(&mut self) -> Result<()> {
        self.flush()?;

        let index = self.current.index + 1;
        let path = self.log_dir.join(segment_file_name(index));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(format!("opening segment {:?}", path), e))?;

        info!(segment = index, "rotated commit log");
        self.current = ActiveSegment {
            index,
            writer: BufWriter::new(file),
            size: 0,
        };
        Ok(())
    }

    /// Delete every closed segment older than the active one. Called by the
    /// coordinator right after a checkpoint rotation, when all previous
    /// records are covered by the snapshot.
    pub fn prune_older_than_current(&mut self) -> Result<usize> {
        let mut removed = 0;
        for (index, path) in list_segments(&self.log_dir)? {
            if index >= self.current.index {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(segment = index, "pruned commit log segment");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to prune segment"),
            }
        }
        Ok(removed)
    }

    /// Delete closed segments whose largest record sequence is at or below
    /// `sequence` (i.e. fully captured by a snapshot at that sequence).
    pub fn prune_up_to(&mut self, sequence: u64) -> Result<usize> {
        let mut removed = 0;
        for (index, path) in list_segments(&self.log_dir)? {
            if index >= self.current.index {
                continue;
            }
            let covered = match segment_max_sequence(&path)? {
                Some(max) => max <= sequence,
                None => true, // nothing readable in it
            };
            if covered {
                std::fs::remove_file(&path)?;
                debug!(segment = index, up_to = sequence, "pruned covered segment");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Retention cap applied during normal (size-triggered) rotation: the
    /// oldest closed segments beyond `max_segments` are dropped.
    fn enforce_retention(&mut self) -> Result<()> {
        let segments = list_segments(&self.log_dir)?;
        if segments.len() <= self.config.max_segments {
            return Ok(());
        }
        let excess = segments.len() - self.config.max_segments;
        for (index, path) in segments.into_iter().take(excess) {
            if index >= self.current.index {
                break;
            }
            warn!(segment = index, "retention cap exceeded; dropping oldest segment");
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// All readable records with sequence strictly greater than `sequence`,
    /// ordered ascending across every segment.
    pub fn records_after(&mut self, sequence: u64) -> Result<Vec<WalRecord>> {
        self.flush()?;
        let paths = list_segments(&self.log_dir)?
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        let mut records: Vec<WalRecord> = WalRecordIterator::new(paths)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|r| r.sequence > sequence)
            .collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    /// Sequence of the most recently appended record (0 before any append).
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn current_segment_index(&self) -> u64 {
        self.current.index
    }

    /// Apply new rotation limits; takes effect from the next append.
    pub fn set_limits(&mut self, rotation_size: u64, max_segments: usize) {
        self.config.rotation_size = rotation_size;
        self.config.max_segments = max_segments;
    }

    pub fn current_segment_size(&self) -> u64 {
        self.current.size
    }

    pub fn statistics(&self) -> CommitLogStats {
        CommitLogStats {
            total_records: self.total_records,
            total_bytes: self.total_bytes,
            next_sequence: self.next_sequence,
            current_segment_size: self.current.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tansu_core::SystemClock;
    use tempfile::TempDir;

    fn open_log(dir: &Path, rotation_size: u64) -> CommitLog {
        CommitLog::open(
            dir,
            CommitLogConfig {
                rotation_size,
                max_segments: 10,
                sync_on_write: true,
            },
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    fn vector(values: &[f32]) -> Vector {
        Vector::new(values.to_vec()).unwrap()
    }

    #[test]
    fn sequences_start_at_one_and_increase() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(dir.path(), u64::MAX);
        assert_eq!(log.append_insert("a", &vector(&[1.0]), "").unwrap(), 1);
        assert_eq!(log.append_insert("b", &vector(&[2.0]), "").unwrap(), 2);
        assert_eq!(log.append_delete("a").unwrap(), 3);
        assert_eq!(log.last_sequence(), 3);
    }

    #[test]
    fn sequences_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = open_log(dir.path(), u64::MAX);
            log.append_insert("a", &vector(&[1.0]), "").unwrap();
            log.append_insert("b", &vector(&[2.0]), "").unwrap();
        }
        let mut log = open_log(dir.path(), u64::MAX);
        assert_eq!(log.append_commit().unwrap(), 3);
    }

    #[test]
    fn records_after_filters_and_orders() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(dir.path(), u64::MAX);
        for i in 0..5 {
            log.append_insert(&format!("k{}", i), &vector(&[i as f32]), "")
                .unwrap();
        }
        let records = log.records_after(2).unwrap();
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[test]
    fn size_triggered_rotation_creates_new_segment() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(dir.path(), 64);
        for i in 0..10 {
            log.append_insert(&format!("key-{}", i), &vector(&[1.0, 2.0, 3.0]), "meta")
                .unwrap();
        }
        assert!(log.current_segment_index() > 1);

        // All records remain readable across segments.
        let records = log.records_after(0).unwrap();
        assert_eq!(records.len(), 10);
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn prune_removes_closed_segments() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(dir.path(), u64::MAX);
        for i in 0..4 {
            log.append_insert(&format!("k{}", i), &vector(&[1.0]), "").unwrap();
        }
        log.rotate().unwrap();
        log.append_insert("late", &vector(&[9.0]), "").unwrap();

        let removed = log.prune_up_to(4).unwrap();
        assert_eq!(removed, 1);

        let records = log.records_after(0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 5);
    }

    #[test]
    fn checkpoint_and_commit_records_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(dir.path(), u64::MAX);
        log.append_checkpoint(42, "data/main.db").unwrap();
        log.append_commit().unwrap();

        let records = log.records_after(0).unwrap();
        assert_eq!(records[0].record_type, RecordType::Checkpoint);
        let (seq, path) = decode_checkpoint(&records[0].payload).unwrap();
        assert_eq!((seq, path.as_str()), (42, "data/main.db"));
        assert_eq!(records[1].record_type, RecordType::Commit);
        assert!(records[1].payload.is_empty());
    }

    #[test]
    fn truncated_tail_is_dropped_silently() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(dir.path(), u64::MAX);
        for i in 0..3 {
            log.append_insert(&format!("k{}", i), &vector(&[i as f32]), "")
                .unwrap();
        }
        drop(log);

        // Chop 5 bytes off the segment, as a crash mid-append would.
        let segment = dir.path().join("commit.log.000001");
        let data = std::fs::read(&segment).unwrap();
        std::fs::write(&segment, &data[..data.len() - 5]).unwrap();

        let mut log = open_log(dir.path(), u64::MAX);
        let records = log.records_after(0).unwrap();
        assert_eq!(records.len(), 2);
        // The torn third record's sequence is reused on reopen.
        assert_eq!(log.last_sequence(), 2);
    }

    #[test]
    fn corrupt_record_ignores_rest_of_segment() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(dir.path(), u64::MAX);
        for i in 0..3 {
            log.append_insert(&format!("k{}", i), &vector(&[i as f32]), "meta")
                .unwrap();
        }
        drop(log);

        // Flip a payload byte inside the second record.
        let segment = dir.path().join("commit.log.000001");
        let mut data = std::fs::read(&segment).unwrap();
        let record_len = RECORD_HEADER_SIZE + encode_row("k0", &vector(&[0.0]), "meta").len();
        data[record_len + RECORD_HEADER_SIZE + 2] ^= 0xFF;
        std::fs::write(&segment, &data).unwrap();

        let mut log = open_log(dir.path(), u64::MAX);
        let records = log.records_after(0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
    }
}
