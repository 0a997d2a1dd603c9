//! # Error Handling
//!
//! Error types shared by every TansuDB crate.
//!
//! ## Design Principles
//!
//! 1. **Actionable**: every error carries the context needed to act on it
//! 2. **Contextual**: dimensions, keys, paths and source errors are included
//! 3. **Classified**: callers can distinguish recoverable from fatal errors

use thiserror::Error;

/// Result type alias for TansuDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for TansuDB
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("component index {index} out of bounds for dimension {dimensions}")]
    InvalidIndex { index: usize, dimensions: usize },

    #[error("record keys must be non-empty")]
    EmptyKey,

    #[error("database is not ready: {reason}")]
    NotReady { reason: String },

    #[error("key not found: {key}")]
    KeyAbsent { key: String },

    #[error("key already present: {key}")]
    KeyDuplicate { key: String },

    #[error("batch validation failed: {message}")]
    BatchValidation { message: String },

    // Storage errors
    #[error("commit log error: {message}")]
    WriteAheadLog {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("corrupt snapshot: {details}")]
    CorruptSnapshot { details: String },

    #[error("recovery failed: {message}")]
    RecoveryFailed { message: String },

    // System errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Check if the error leaves the database usable for further calls.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io { .. } => false,
            Error::RecoveryFailed { .. } => false,
            Error::Internal { .. } => false,
            _ => true,
        }
    }

    /// Stable code for monitoring and the HTTP surface.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::InvalidIndex { .. } => "INVALID_INDEX",
            Error::EmptyKey => "EMPTY_KEY",
            Error::NotReady { .. } => "NOT_READY",
            Error::KeyAbsent { .. } => "KEY_ABSENT",
            Error::KeyDuplicate { .. } => "KEY_DUPLICATE",
            Error::BatchValidation { .. } => "BATCH_VALIDATION_FAILED",
            Error::WriteAheadLog { .. } => "WAL_ERROR",
            Error::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Error::CorruptSnapshot { .. } => "CORRUPT_SNAPSHOT",
            Error::RecoveryFailed { .. } => "RECOVERY_FAILED",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Internal {
            message: format!("{}: {}", f(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = Error::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.error_code(), "DIMENSION_MISMATCH");
        assert!(err.is_recoverable());

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(!err.is_recoverable());
    }
}
