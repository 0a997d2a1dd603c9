//! # Keyed Map
//!
//! The authoritative in-memory store: key -> (vector, metadata). Indexes and
//! snapshots are both derived from this map; anything a search index returns
//! is validated against it.

use std::collections::HashMap;

use tansu_core::Vector;

/// Authoritative keyed record store.
///
/// Metadata is kept in a parallel map with empty strings normalized to an
/// absent entry, matching the snapshot and WAL payload encodings where empty
/// metadata is written as a zero length.
#[derive(Debug, Default, Clone)]
pub struct VectorStore {
    vectors: HashMap<String, Vector>,
    metadata: HashMap<String, String>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vectors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Insert or replace a record.
    pub fn put(&mut self, key: String, vector: Vector, metadata: String) {
        if metadata.is_empty() {
            self.metadata.remove(&key);
        } else {
            self.metadata.insert(key.clone(), metadata);
        }
        self.vectors.insert(key, vector);
    }

    /// Remove a record, returning whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.metadata.remove(key);
        self.vectors.remove(key).is_some()
    }

    pub fn vector(&self, key: &str) -> Option<&Vector> {
        self.vectors.get(key)
    }

    /// Metadata for a key; empty string when the key exists without metadata.
    pub fn metadata(&self, key: &str) -> Option<String> {
        if !self.vectors.contains_key(key) {
            return None;
        }
        Some(self.metadata.get(key).cloned().unwrap_or_default())
    }

    pub fn record(&self, key: &str) -> Option<(Vector, String)> {
        let vector = self.vectors.get(key)?.clone();
        let metadata = self.metadata.get(key).cloned().unwrap_or_default();
        Some((vector, metadata))
    }

    /// Iterate (key, vector) pairs, e.g. for index rebuilds.
    pub fn iter_vectors(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.vectors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Iterate full (key, vector, metadata) records for snapshots.
    pub fn iter_records(&self) -> impl Iterator<Item = (&str, &Vector, &str)> {
        self.vectors.iter().map(|(k, v)| {
            let meta = self.metadata.get(k).map(String::as_str).unwrap_or("");
            (k.as_str(), v, meta)
        })
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
        self.metadata.clear();
    }

    /// Replace the whole map, e.g. when loading a snapshot.
    pub fn replace_with(&mut self, records: Vec<(String, Vector, String)>) {
        self.clear();
        for (key, vector, metadata) in records {
            self.put(key, vector, metadata);
        }
    }
}
