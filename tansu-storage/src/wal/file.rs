use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use tansu_core::error::{Error, Result};

use super::types::{record_checksum, RecordType, WalRecord};

const SEGMENT_PREFIX: &str = "commit.log.";

/// `commit.log.NNNNNN` with a zero-padded six-digit segment index.
pub(crate) fn segment_file_name(index: u64) -> String {
    format!("{}{:06}", SEGMENT_PREFIX, index)
}

pub(crate) fn parse_segment_index(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

/// All segments in the directory, sorted by segment index.
pub(crate) fn list_segments(log_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_segment_index) {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

pub(crate) fn write_record(writer: &mut impl Write, record: &WalRecord) -> Result<()> {
    writer.write_u64::<LittleEndian>(record.timestamp_us)?;
    writer.write_u32::<LittleEndian>(record.record_type as u32)?;
    writer.write_u64::<LittleEndian>(record.sequence)?;
    writer.write_u32::<LittleEndian>(record.checksum)?;
    writer.write_u32::<LittleEndian>(record.payload.len() as u32)?;
    writer.write_all(&record.payload)?;
    Ok(())
}

/// Outcome of reading one record from a segment.
pub(crate) enum ReadOutcome {
    Record(WalRecord),
    /// Clean end of file, or a partial header/payload left by a crash.
    /// The partial tail is discarded silently.
    End,
    /// Stored checksum disagrees with the recomputed one; the record and
    /// everything after it in this segment must be ignored.
    Corrupt { expected: u32, actual: u32 },
}

pub(crate) fn read_record(reader: &mut impl Read) -> Result<ReadOutcome> {
    let timestamp_us = match reader.read_u64::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::End),
        Err(e) => return Err(e.into()),
    };

    // Header fields after the first are subject to the same crash-tail rule.
    let mut header = [0u8; 20];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::End),
        Err(e) => return Err(e.into()),
    }
    let raw_type = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let mut sequence_bytes = [0u8; 8];
    sequence_bytes.copy_from_slice(&header[4..12]);
    let sequence = u64::from_le_bytes(sequence_bytes);
    let stored_checksum = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
    let data_length = u32::from_le_bytes([header[16], header[17], header[18], header[19]]) as usize;

    let mut payload = vec![0u8; data_length];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::End),
        Err(e) => return Err(e.into()),
    }

    let record_type = match RecordType::try_from(raw_type) {
        Ok(t) => t,
        Err(_) => {
            // An unknown type means the bytes are garbage; treat like a
            // checksum failure and abandon the segment.
            return Ok(ReadOutcome::Corrupt {
                expected: stored_checksum,
                actual: stored_checksum.wrapping_add(1),
            });
        }
    };

    let actual = record_checksum(timestamp_us, record_type, sequence, &payload);
    if actual != stored_checksum {
        return Ok(ReadOutcome::Corrupt {
            expected: stored_checksum,
            actual,
        });
    }

    Ok(ReadOutcome::Record(WalRecord {
        timestamp_us,
        record_type,
        sequence,
        checksum: stored_checksum,
        payload: Bytes::from(payload),
    }))
}

/// Largest record sequence readable from a segment, if any. Stops at the
/// first corrupt or truncated record, mirroring replay.
pub(crate) fn segment_max_sequence(path: &Path) -> Result<Option<u64>> {
    let file = fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut max = None;
    loop {
        match read_record(&mut reader)? {
            ReadOutcome::Record(record) => {
                max = Some(max.map_or(record.sequence, |m: u64| m.max(record.sequence)));
            }
            ReadOutcome::End | ReadOutcome::Corrupt { .. } => break,
        }
    }
    Ok(max)
}

pub(crate) fn io_error(message: impl Into<String>, source: std::io::Error) -> Error {
    Error::Io {
        message: message.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_record(sequence: u64) -> WalRecord {
        WalRecord::new(
            1_700_000_000_000_000,
            RecordType::Insert,
            sequence,
            Bytes::from_static(b"payload"),
        )
    }

    #[test]
    fn segment_names_are_zero_padded() {
        assert_eq!(segment_file_name(1), "commit.log.000001");
        assert_eq!(segment_file_name(123456), "commit.log.123456");
        assert_eq!(parse_segment_index("commit.log.000042"), Some(42));
        assert_eq!(parse_segment_index("commit.log"), None);
        assert_eq!(parse_segment_index("other.file"), None);
    }

    #[test]
    fn record_round_trip() {
        let record = sample_record(9);
        let mut buffer = Vec::new();
        write_record(&mut buffer, &record).unwrap();

        let mut cursor = Cursor::new(buffer);
        match read_record(&mut cursor).unwrap() {
            ReadOutcome::Record(back) => {
                assert_eq!(back.sequence, 9);
                assert_eq!(back.record_type, RecordType::Insert);
                assert_eq!(&back.payload[..], b"payload");
                assert!(back.is_valid());
            }
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn truncated_tail_reads_as_end() {
        let record = sample_record(1);
        let mut buffer = Vec::new();
        write_record(&mut buffer, &record).unwrap();
        buffer.truncate(buffer.len() - 5);

        let mut cursor = Cursor::new(buffer);
        assert!(matches!(read_record(&mut cursor).unwrap(), ReadOutcome::End));
    }

    #[test]
    fn flipped_payload_byte_reads_as_corrupt() {
        let record = sample_record(1);
        let mut buffer = Vec::new();
        write_record(&mut buffer, &record).unwrap();
        let last = buffer.len() - 1;
        buffer[last] ^= 0xFF;

        let mut cursor = Cursor::new(buffer);
        assert!(matches!(
            read_record(&mut cursor).unwrap(),
            ReadOutcome::Corrupt { .. }
        ));
    }
}
