use bytes::Bytes;

use tansu_core::error::{Error, Result};
use tansu_core::Vector;

/// Serialized record header: timestamp (8) + type (4) + sequence (8) +
/// checksum (4) + data length (4).
pub const RECORD_HEADER_SIZE: usize = 28;

/// Commit log record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RecordType {
    Insert = 1,
    Update = 2,
    Delete = 3,

    // Control record marking a durable snapshot: everything at or below the
    // embedded sequence is captured in the referenced snapshot file.
    Checkpoint = 4,

    // Boundary marker with an empty payload; a no-op during replay.
    Commit = 5,
}

impl TryFrom<u32> for RecordType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(RecordType::Insert),
            2 => Ok(RecordType::Update),
            3 => Ok(RecordType::Delete),
            4 => Ok(RecordType::Checkpoint),
            5 => Ok(RecordType::Commit),
            _ => Err(Error::WriteAheadLog {
                message: format!("invalid record type: {}", value),
                source: None,
            }),
        }
    }
}

/// One commit log record.
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub timestamp_us: u64,
    pub record_type: RecordType,
    pub sequence: u64,
    pub checksum: u32,
    pub payload: Bytes,
}

impl WalRecord {
    pub fn new(timestamp_us: u64, record_type: RecordType, sequence: u64, payload: Bytes) -> Self {
        let checksum = record_checksum(timestamp_us, record_type, sequence, &payload);
        Self {
            timestamp_us,
            record_type,
            sequence,
            checksum,
            payload,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.checksum
            == record_checksum(
                self.timestamp_us,
                self.record_type,
                self.sequence,
                &self.payload,
            )
    }

    pub fn serialized_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// XOR checksum over the header fields (u64s folded to their low 32 bits)
/// and every payload byte.
pub fn record_checksum(
    timestamp_us: u64,
    record_type: RecordType,
    sequence: u64,
    payload: &[u8],
) -> u32 {
    let mut crc = 0u32;
    crc ^= timestamp_us as u32;
    crc ^= record_type as u32;
    crc ^= sequence as u32;
    crc ^= payload.len() as u32;
    for byte in payload {
        crc ^= *byte as u32;
    }
    crc
}

/// Commit log configuration.
#[derive(Debug, Clone)]
pub struct CommitLogConfig {
    /// Byte threshold at which the active segment rotates
    pub rotation_size: u64,
    /// Retention cap applied during normal rotation
    pub max_segments: usize,
    /// fsync after every append before reporting success
    pub sync_on_write: bool,
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            rotation_size: 100 * 1024 * 1024,
            max_segments: 10,
            sync_on_write: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload codecs
//
// INSERT/UPDATE: len32 key | key | dims32 | D x f32 | len32 metadata | metadata
// DELETE:       len32 key | key
// CHECKPOINT:   u64 snapshot_sequence | len32 path | path
// COMMIT:       empty
// ---------------------------------------------------------------------------

fn put_string(buffer: &mut Vec<u8>, value: &str) {
    buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
}

fn take_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let end = *offset + 4;
    let slice = data.get(*offset..end).ok_or_else(truncated_payload)?;
    *offset = end;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn take_u64(data: &[u8], offset: &mut usize) -> Result<u64> {
    let end = *offset + 8;
    let slice = data.get(*offset..end).ok_or_else(truncated_payload)?;
    *offset = end;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(slice);
    Ok(u64::from_le_bytes(bytes))
}

fn take_string(data: &[u8], offset: &mut usize) -> Result<String> {
    let len = take_u32(data, offset)? as usize;
    let end = *offset + len;
    let slice = data.get(*offset..end).ok_or_else(truncated_payload)?;
    *offset = end;
    String::from_utf8(slice.to_vec()).map_err(|_| Error::WriteAheadLog {
        message: "payload string is not valid UTF-8".to_string(),
        source: None,
    })
}

fn truncated_payload() -> Error {
    Error::WriteAheadLog {
        message: "truncated payload".to_string(),
        source: None,
    }
}

/// Encode an INSERT/UPDATE payload.
pub fn encode_row(key: &str, vector: &Vector, metadata: &str) -> Bytes {
    let mut buffer = Vec::with_capacity(8 + key.len() + vector.len() * 4 + metadata.len() + 4);
    put_string(&mut buffer, key);
    buffer.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    buffer.extend_from_slice(&vector.to_le_bytes());
    put_string(&mut buffer, metadata);
    Bytes::from(buffer)
}

/// Decode an INSERT/UPDATE payload.
pub fn decode_row(data: &[u8]) -> Result<(String, Vector, String)> {
    let mut offset = 0;
    let key = take_string(data, &mut offset)?;
    let dims = take_u32(data, &mut offset)? as usize;
    let end = offset + dims * 4;
    let raw = data.get(offset..end).ok_or_else(truncated_payload)?;
    offset = end;
    let vector = Vector::from_le_bytes(raw)?;
    let metadata = take_string(data, &mut offset)?;
    Ok((key, vector, metadata))
}

/// Encode a DELETE payload.
pub fn encode_delete(key: &str) -> Bytes {
    let mut buffer = Vec::with_capacity(4 + key.len());
    put_string(&mut buffer, key);
    Bytes::from(buffer)
}

/// Decode a DELETE payload.
pub fn decode_delete(data: &[u8]) -> Result<String> {
    let mut offset = 0;
    take_string(data, &mut offset)
}

/// Encode a CHECKPOINT payload.
pub fn encode_checkpoint(snapshot_sequence: u64, snapshot_path: &str) -> Bytes {
    let mut buffer = Vec::with_capacity(12 + snapshot_path.len());
    buffer.extend_from_slice(&snapshot_sequence.to_le_bytes());
    put_string(&mut buffer, snapshot_path);
    Bytes::from(buffer)
}

/// Decode a CHECKPOINT payload.
pub fn decode_checkpoint(data: &[u8]) -> Result<(u64, String)> {
    let mut offset = 0;
    let sequence = take_u64(data, &mut offset)?;
    let path = take_string(data, &mut offset)?;
    Ok((sequence, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_covers_every_field() {
        let payload = Bytes::from_static(b"abc");
        let record = WalRecord::new(1234, RecordType::Insert, 7, payload.clone());
        assert!(record.is_valid());

        let mut tampered = record.clone();
        tampered.sequence = 8;
        assert!(!tampered.is_valid());

        let mut tampered = record.clone();
        tampered.payload = Bytes::from_static(b"abd");
        assert!(!tampered.is_valid());
    }

    #[test]
    fn row_payload_round_trip() {
        let vector = Vector::new(vec![1.5, -2.25, 0.0]).unwrap();
        let payload = encode_row("user:42", &vector, "{\"tag\":\"x\"}");
        let (key, decoded, metadata) = decode_row(&payload).unwrap();
        assert_eq!(key, "user:42");
        assert_eq!(decoded, vector);
        assert_eq!(metadata, "{\"tag\":\"x\"}");
    }

    #[test]
    fn empty_metadata_round_trips() {
        let vector = Vector::new(vec![1.0]).unwrap();
        let payload = encode_row("k", &vector, "");
        let (_, _, metadata) = decode_row(&payload).unwrap();
        assert_eq!(metadata, "");
    }

    #[test]
    fn delete_and_checkpoint_round_trip() {
        assert_eq!(decode_delete(&encode_delete("gone")).unwrap(), "gone");
        let (seq, path) = decode_checkpoint(&encode_checkpoint(500, "data/main.db")).unwrap();
        assert_eq!(seq, 500);
        assert_eq!(path, "data/main.db");
    }

    #[test]
    fn short_payload_is_rejected() {
        let vector = Vector::new(vec![1.0, 2.0]).unwrap();
        let payload = encode_row("key", &vector, "meta");
        assert!(decode_row(&payload[..payload.len() - 3]).is_err());
    }
}
