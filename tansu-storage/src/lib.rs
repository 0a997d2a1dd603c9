//! # TansuDB Storage
//!
//! The durable indexed vector store: the authoritative keyed map, the
//! commit log (WAL), atomic snapshots, the persistence coordinator, the
//! recovery state machine, and the [`Database`] façade that ties them
//! together.
//!
//! ## Durability model
//!
//! Every mutation is appended to the commit log (flushed and fsynced by
//! default) before any in-memory state changes. Checkpoints write a full
//! snapshot atomically, record it in the WAL, rotate to a fresh segment,
//! and prune everything the snapshot covers. Recovery loads the snapshot,
//! replays strictly newer WAL records in sequence order, and rebuilds the
//! search indexes from the final map.

pub mod coordinator;
pub mod engine;
pub mod recovery;
pub mod snapshot;
pub mod store;
pub mod wal;

pub use coordinator::{PersistenceCoordinator, PersistenceStats, ReplaySummary};
pub use engine::{BatchResult, Database, DatabaseStatistics, SearchMatch};
pub use recovery::{
    AnalysisOutcome, RecoveryEvent, RecoveryInfo, RecoveryState, RecoveryStateMachine,
};
pub use snapshot::{read_snapshot, write_snapshot, AtomicFileWriter, Snapshot};
pub use store::VectorStore;
pub use wal::{CommitLog, CommitLogConfig, CommitLogStats, RecordType, WalRecord};
