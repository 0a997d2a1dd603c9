//! # Vector Index Traits
//!
//! Common interface for the exact and approximate index implementations.
//!
//! Indexes take `&mut self`: every access is serialized under the database
//! mutex, so interior locking would be redundant. Indexes may keep stale
//! entries after updates and deletes; the database filters candidates
//! through the authoritative keyed map and re-scores them, so index results
//! are candidate sets, not final answers.

use tansu_core::error::Result;

/// Search candidate with key and distance under the active metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub key: String,
    pub distance: f32,
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Smaller distance = smaller in ordering. BinaryHeap is a max-heap,
        // so the worst candidate sits on top and pop() evicts it.
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// Vector index interface implemented by the KD-tree, LSH, and HNSW indexes.
pub trait VectorIndex: Send {
    /// Insert a vector under the given key. Duplicate keys are allowed;
    /// the index does not deduplicate.
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()>;

    /// Return up to `k` candidates ordered by ascending distance.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Number of entries (including stale ones).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard all entries and rebuild from the authoritative map.
    fn rebuild<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: Iterator<Item = (&'a str, &'a [f32])>,
        Self: Sized;
}
