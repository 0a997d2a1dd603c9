//! # Atomic Snapshot Writer
//!
//! Full database images written to a temporary file and atomically promoted
//! to the canonical path.
//!
//! Snapshot File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header                                                     │
//! │    Magic "VDBD" (u32 = 0x56444244)                          │
//! │    Version (u32 = 1)                                        │
//! │    Sequence (u64)    last WAL sequence captured             │
//! │    Timestamp (u64)   microseconds since epoch               │
//! │    Count (u64)       number of records                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Records (count times)                                      │
//! │    len32 key | key | dims32 | D x f32 | len32 meta | meta   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Footer                                                     │
//! │    Magic "ENDM" (u32 = 0x454E444D)                          │
//! │    Checksum (u32)    XOR of every length/dims field written │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{info, warn};

use tansu_core::error::{Error, Result};
use tansu_core::Vector;

pub const SNAPSHOT_MAGIC: u32 = 0x5644_4244; // "VDBD"
pub const SNAPSHOT_VERSION: u32 = 1;
pub const FOOTER_MAGIC: u32 = 0x454E_444D; // "ENDM"

/// Single-use writer that makes a file appear atomically.
///
/// Bytes go to a temporary sibling; `commit()` flushes, fsyncs, and renames
/// over the final path. Aborting (explicitly or by drop) removes the
/// temporary file and leaves any existing final file untouched.
pub struct AtomicFileWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFileWriter {
    pub fn new(final_path: impl Into<PathBuf>, temp_path: impl Into<PathBuf>) -> Result<Self> {
        let final_path = final_path.into();
        let temp_path = temp_path.into();
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::Io {
                message: format!("creating temporary file {:?}", temp_path),
                source: e,
            })?;
        Ok(Self {
            temp_path,
            final_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// The writer is single-use: writing after commit or abort is an error.
    pub fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| Error::Internal {
            message: "write after commit or abort".to_string(),
        })
    }

    /// Flush, fsync, close, then rename over the final path.
    pub fn commit(mut self) -> Result<()> {
        let mut writer = self.writer.take().ok_or_else(|| Error::Internal {
            message: "commit after commit or abort".to_string(),
        })?;

        let result = (|| -> Result<()> {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            drop(writer);
            std::fs::rename(&self.temp_path, &self.final_path).map_err(|e| Error::Io {
                message: format!(
                    "renaming {:?} -> {:?}",
                    self.temp_path, self.final_path
                ),
                source: e,
            })
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
        result
    }

    /// Discard the temporary file.
    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.temp_path.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        self.abort_in_place();
    }
}

/// A fully decoded snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub records: Vec<(String, Vector, String)>,
}

/// Write a snapshot of `records` at `sequence` to `final_path`, staging in
/// `checkpoint_<sequence>.tmp` alongside it.
pub fn write_snapshot<'a, I>(
    final_path: &Path,
    sequence: u64,
    timestamp_us: u64,
    count: u64,
    records: I,
) -> Result<()>
where
    I: Iterator<Item = (&'a str, &'a Vector, &'a str)>,
{
    let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!("checkpoint_{}.tmp", sequence));

    let mut atomic = AtomicFileWriter::new(final_path, &temp_path)?;
    let result = (|| -> Result<()> {
        let writer = atomic.writer()?;
        writer.write_u32::<LittleEndian>(SNAPSHOT_MAGIC)?;
        writer.write_u32::<LittleEndian>(SNAPSHOT_VERSION)?;
        writer.write_u64::<LittleEndian>(sequence)?;
        writer.write_u64::<LittleEndian>(timestamp_us)?;
        writer.write_u64::<LittleEndian>(count)?;

        let mut footer_crc = 0u32;
        let mut written = 0u64;
        for (key, vector, metadata) in records {
            let key_len = key.len() as u32;
            writer.write_u32::<LittleEndian>(key_len)?;
            writer.write_all(key.as_bytes())?;
            footer_crc ^= key_len;

            let dims = vector.len() as u32;
            writer.write_u32::<LittleEndian>(dims)?;
            writer.write_all(&vector.to_le_bytes())?;
            footer_crc ^= dims;

            let meta_len = metadata.len() as u32;
            writer.write_u32::<LittleEndian>(meta_len)?;
            writer.write_all(metadata.as_bytes())?;
            footer_crc ^= meta_len;

            written += 1;
        }
        if written != count {
            return Err(Error::Internal {
                message: format!("snapshot record count drifted: {} != {}", written, count),
            });
        }

        writer.write_u32::<LittleEndian>(FOOTER_MAGIC)?;
        writer.write_u32::<LittleEndian>(footer_crc)?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            atomic.commit()?;
            info!(sequence, count, path = %final_path.display(), "snapshot written");
            Ok(())
        }
        Err(e) => {
            atomic.abort();
            Err(e)
        }
    }
}

fn corrupt(details: impl Into<String>) -> Error {
    Error::CorruptSnapshot {
        details: details.into(),
    }
}

/// Read and validate a snapshot file.
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let file = File::open(path).map_err(|e| Error::Io {
        message: format!("opening snapshot {:?}", path),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let magic = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| corrupt("missing header"))?;
    if magic != SNAPSHOT_MAGIC {
        return Err(corrupt(format!("bad magic {:#010x}", magic)));
    }
    let version = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| corrupt("missing version"))?;
    if version != SNAPSHOT_VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }

    let sequence = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| corrupt("missing sequence"))?;
    let timestamp_us = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| corrupt("missing timestamp"))?;
    let count = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| corrupt("missing count"))?;

    let mut footer_crc = 0u32;
    let mut records = Vec::with_capacity(count.min(1 << 20) as usize);
    for i in 0..count {
        let key_len = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt(format!("record {} truncated", i)))?;
        let mut key = vec![0u8; key_len as usize];
        reader
            .read_exact(&mut key)
            .map_err(|_| corrupt(format!("record {} truncated", i)))?;
        footer_crc ^= key_len;

        let dims = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt(format!("record {} truncated", i)))?;
        let mut raw = vec![0u8; dims as usize * 4];
        reader
            .read_exact(&mut raw)
            .map_err(|_| corrupt(format!("record {} truncated", i)))?;
        footer_crc ^= dims;

        let meta_len = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt(format!("record {} truncated", i)))?;
        let mut metadata = vec![0u8; meta_len as usize];
        reader
            .read_exact(&mut metadata)
            .map_err(|_| corrupt(format!("record {} truncated", i)))?;
        footer_crc ^= meta_len;

        let key = String::from_utf8(key).map_err(|_| corrupt("non-UTF-8 key"))?;
        let metadata =
            String::from_utf8(metadata).map_err(|_| corrupt("non-UTF-8 metadata"))?;
        records.push((key, Vector::from_le_bytes(&raw)?, metadata));
    }

    let footer_magic = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| corrupt("missing footer"))?;
    if footer_magic != FOOTER_MAGIC {
        return Err(corrupt(format!("bad footer magic {:#010x}", footer_magic)));
    }
    let stored_crc = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| corrupt("missing footer checksum"))?;
    if stored_crc != footer_crc {
        return Err(Error::ChecksumMismatch {
            expected: stored_crc,
            actual: footer_crc,
        });
    }

    Ok(Snapshot {
        sequence,
        timestamp_us,
        records,
    })
}

/// Cheap header probe used during recovery analysis: returns the embedded
/// sequence when the magic and version are valid.
pub fn probe_snapshot(path: &Path) -> Result<Option<u64>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let magic = match reader.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    let version = match reader.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    if magic != SNAPSHOT_MAGIC || version != SNAPSHOT_VERSION {
        return Ok(None);
    }
    match reader.read_u64::<LittleEndian>() {
        Ok(sequence) => Ok(Some(sequence)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_records() -> Vec<(String, Vector, String)> {
        vec![
            (
                "alpha".to_string(),
                Vector::new(vec![1.0, 2.0, 3.0]).unwrap(),
                "first".to_string(),
            ),
            (
                "beta".to_string(),
                Vector::new(vec![-1.0, 0.5, 0.25]).unwrap(),
                String::new(),
            ),
        ]
    }

    fn write_sample(path: &Path, sequence: u64) {
        let records = sample_records();
        write_snapshot(
            path,
            sequence,
            1_700_000_000_000_000,
            records.len() as u64,
            records.iter().map(|(k, v, m)| (k.as_str(), v, m.as_str())),
        )
        .unwrap();
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.db");
        write_sample(&path, 42);

        let snapshot = read_snapshot(&path).unwrap();
        assert_eq!(snapshot.sequence, 42);
        assert_eq!(snapshot.records, sample_records());

        // Temp file was promoted, not left behind.
        assert!(!dir.path().join("checkpoint_42.tmp").exists());
    }

    #[test]
    fn probe_reads_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.db");
        assert_eq!(probe_snapshot(&path).unwrap(), None);
        write_sample(&path, 77);
        assert_eq!(probe_snapshot(&path).unwrap(), Some(77));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.db");
        std::fs::write(&path, b"not a snapshot at all").unwrap();
        assert!(matches!(
            read_snapshot(&path),
            Err(Error::CorruptSnapshot { .. })
        ));
        assert_eq!(probe_snapshot(&path).unwrap(), None);
    }

    #[test]
    fn corrupted_footer_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.db");
        write_sample(&path, 1);

        let mut data = std::fs::read(&path).unwrap();
        let len = data.len();
        data[len - 1] ^= 0xFF; // footer checksum byte
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(
            read_snapshot(&path),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.db");
        write_sample(&path, 1);

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 10]).unwrap();

        assert!(read_snapshot(&path).is_err());
    }

    #[test]
    fn failed_write_leaves_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.db");
        write_sample(&path, 5);

        // A writer that is aborted must not disturb the canonical file.
        let atomic =
            AtomicFileWriter::new(&path, dir.path().join("checkpoint_6.tmp")).unwrap();
        atomic.abort();

        let snapshot = read_snapshot(&path).unwrap();
        assert_eq!(snapshot.sequence, 5);
        assert!(!dir.path().join("checkpoint_6.tmp").exists());
    }

    #[test]
    fn dropped_writer_cleans_up_temp() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("checkpoint_9.tmp");
        {
            let mut atomic = AtomicFileWriter::new(dir.path().join("main.db"), &tmp).unwrap();
            atomic.writer().unwrap().write_all(b"partial").unwrap();
            assert!(tmp.exists());
        }
        assert!(!tmp.exists());
    }
}
