//! # Configuration Management
//!
//! Configuration for every TansuDB component. Defaults match the documented
//! production values; everything round-trips through serde for file- and
//! HTTP-based configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Which index serves similarity searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAlgorithm {
    /// KD-tree only (exact results)
    Exact,
    /// Random-projection hash tables
    Lsh,
    /// Layered proximity graph
    Hnsw,
}

impl IndexAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            IndexAlgorithm::Exact => "exact",
            IndexAlgorithm::Lsh => "lsh",
            IndexAlgorithm::Hnsw => "hnsw",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "exact" => Ok(IndexAlgorithm::Exact),
            "lsh" => Ok(IndexAlgorithm::Lsh),
            "hnsw" => Ok(IndexAlgorithm::Hnsw),
            other => Err(Error::Configuration {
                message: format!("unknown index algorithm: {}", other),
            }),
        }
    }
}

impl Default for IndexAlgorithm {
    fn default() -> Self {
        IndexAlgorithm::Exact
    }
}

/// Top-level database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Required vector dimension; vectors of any other length are rejected
    pub dimensions: usize,
    /// Active similarity-search index
    #[serde(default)]
    pub algorithm: IndexAlgorithm,
    /// If false, mutations are in-memory only (no WAL, no snapshots)
    #[serde(default = "default_true")]
    pub enable_atomic_persistence: bool,
    /// Gates the batch mutation APIs
    #[serde(default = "default_true")]
    pub enable_batch_operations: bool,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub lsh: LshConfig,
    #[serde(default)]
    pub hnsw: HnswConfig,
}

fn default_true() -> bool {
    true
}

impl DatabaseConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            algorithm: IndexAlgorithm::default(),
            enable_atomic_persistence: true,
            enable_batch_operations: true,
            persistence: PersistenceConfig::default(),
            lsh: LshConfig::default(),
            hnsw: HnswConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(Error::Configuration {
                message: "dimensions must be positive".to_string(),
            });
        }
        if self.lsh.tables == 0 || self.lsh.hash_bits == 0 || self.lsh.hash_bits > 63 {
            return Err(Error::Configuration {
                message: format!(
                    "invalid LSH parameters: tables={}, hash_bits={}",
                    self.lsh.tables, self.lsh.hash_bits
                ),
            });
        }
        if self.hnsw.max_connections < 2 {
            return Err(Error::Configuration {
                message: "HNSW max_connections must be at least 2".to_string(),
            });
        }
        Ok(())
    }
}

/// Persistence (WAL + snapshot) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Snapshot directory; the canonical snapshot is `<data_directory>/main.db`
    pub data_directory: PathBuf,
    /// WAL segment directory
    pub log_directory: PathBuf,
    /// Byte threshold for WAL segment rotation
    pub log_rotation_size: u64,
    /// Segment retention cap during normal rotation
    pub max_log_files: usize,
    /// Reserved: time-based checkpoint trigger
    pub checkpoint_interval: Duration,
    /// Ops-since-last-checkpoint threshold
    pub checkpoint_trigger_ops: u64,
    /// fsync the WAL on every append before reporting success
    pub sync_on_write: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            log_directory: PathBuf::from("logs"),
            log_rotation_size: 100 * 1024 * 1024, // 100 MiB
            max_log_files: 10,
            checkpoint_interval: Duration::from_secs(60 * 60),
            checkpoint_trigger_ops: 10_000,
            sync_on_write: true,
        }
    }
}

impl PersistenceConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_directory.join("main.db")
    }
}

/// LSH index configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LshConfig {
    /// Number of independent hash tables (T)
    pub tables: usize,
    /// Hyperplane hash bits per table (H)
    pub hash_bits: usize,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            tables: 10,
            hash_bits: 8,
        }
    }
}

/// HNSW index configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Max neighbors per node above layer 0 (M); layer 0 allows 2M
    pub max_connections: usize,
    /// Candidate list size during construction
    pub ef_construction: usize,
    /// Candidate list size during search
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DatabaseConfig::new(128);
        assert_eq!(cfg.algorithm, IndexAlgorithm::Exact);
        assert!(cfg.enable_atomic_persistence);
        assert!(cfg.enable_batch_operations);
        assert_eq!(cfg.persistence.data_directory, PathBuf::from("data"));
        assert_eq!(cfg.persistence.log_directory, PathBuf::from("logs"));
        assert_eq!(cfg.persistence.log_rotation_size, 100 * 1024 * 1024);
        assert_eq!(cfg.persistence.max_log_files, 10);
        assert_eq!(cfg.persistence.checkpoint_trigger_ops, 10_000);
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(DatabaseConfig::new(0).validate().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let cfg = DatabaseConfig::new(64);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: DatabaseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dimensions, 64);
        assert_eq!(back.persistence.checkpoint_trigger_ops, 10_000);
    }
}
