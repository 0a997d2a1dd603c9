//! # TansuDB Indexes
//!
//! Nearest-neighbor index implementations behind a common trait:
//!
//! - [`KdTree`]: exact search, rebuildable from the keyed map
//! - [`LshIndex`]: random-projection hash tables (approximate)
//! - [`HnswIndex`]: layered proximity graph (approximate)
//!
//! None of the indexes support removal: updates and deletes leave stale
//! entries behind, which the database layer filters against the
//! authoritative map and eventually clears with a rebuild.

pub mod hnsw;
pub mod kdtree;
pub mod lsh;
pub mod traits;

pub use hnsw::HnswIndex;
pub use kdtree::KdTree;
pub use lsh::LshIndex;
pub use traits::{Neighbor, VectorIndex};
