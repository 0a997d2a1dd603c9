//! # LSH Index (Random-Projection Hashing)
//!
//! `T` hash tables, each addressing buckets by `H` hyperplane sign bits:
//! `bit = sign(dot(v, r) + b)` with `r` and `b` drawn once from standard
//! normals at construction. Vectors are stored once in a side table keyed by
//! a stable slot id; buckets hold slot ids.
//!
//! Search unions the query's bucket across all tables, deduplicates, scores
//! every candidate exactly with the active metric, and returns the `k`
//! smallest.

use std::collections::{BinaryHeap, HashMap, HashSet};

use tansu_core::error::{Error, Result};
use tansu_core::{DistanceKind, LshConfig, RandomSource};

use crate::traits::{Neighbor, VectorIndex};

struct Hyperplane {
    normal: Vec<f32>,
    bias: f32,
}

impl Hyperplane {
    fn sample(dimensions: usize, random: &mut RandomSource) -> Self {
        let normal = (0..dimensions).map(|_| random.standard_normal()).collect();
        Self {
            normal,
            bias: random.standard_normal(),
        }
    }

    #[inline]
    fn side(&self, vector: &[f32]) -> u64 {
        let dot: f32 = self
            .normal
            .iter()
            .zip(vector.iter())
            .map(|(r, v)| r * v)
            .sum();
        u64::from(dot + self.bias > 0.0)
    }
}

pub struct LshIndex {
    /// bucket id -> slot ids, one map per table
    tables: Vec<HashMap<u64, Vec<u64>>>,
    /// `tables * hash_bits` hyperplanes, row-major by table
    hyperplanes: Vec<Hyperplane>,
    /// Side table of stored records; slot id = position
    slots: Vec<(String, Vec<f32>)>,
    dimensions: usize,
    hash_bits: usize,
    metric: DistanceKind,
}

impl LshIndex {
    pub fn new(
        dimensions: usize,
        config: LshConfig,
        metric: DistanceKind,
        random: &mut RandomSource,
    ) -> Self {
        let hyperplanes = (0..config.tables * config.hash_bits)
            .map(|_| Hyperplane::sample(dimensions, random))
            .collect();
        Self {
            tables: (0..config.tables).map(|_| HashMap::new()).collect(),
            hyperplanes,
            slots: Vec::new(),
            dimensions,
            hash_bits: config.hash_bits,
            metric,
        }
    }

    pub fn set_metric(&mut self, metric: DistanceKind) {
        self.metric = metric;
    }

    fn bucket_id(&self, table: usize, vector: &[f32]) -> u64 {
        let base = table * self.hash_bits;
        let mut id = 0u64;
        for j in 0..self.hash_bits {
            id = (id << 1) | self.hyperplanes[base + j].side(vector);
        }
        id
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl VectorIndex for LshIndex {
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;

        let slot = self.slots.len() as u64;
        self.slots.push((key.to_string(), vector.to_vec()));
        for table in 0..self.tables.len() {
            let id = self.bucket_id(table, vector);
            self.tables[table].entry(id).or_default().push(slot);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimensions(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut candidate_slots = HashSet::new();
        for table in 0..self.tables.len() {
            let id = self.bucket_id(table, query);
            if let Some(bucket) = self.tables[table].get(&id) {
                candidate_slots.extend(bucket.iter().copied());
            }
        }

        // Best distance per key; stale duplicates collapse here.
        let mut best: HashMap<&str, f32> = HashMap::new();
        for slot in candidate_slots {
            let (key, vector) = &self.slots[slot as usize];
            let distance = self.metric.distance_slices(query, vector);
            best.entry(key.as_str())
                .and_modify(|d| {
                    if distance < *d {
                        *d = distance;
                    }
                })
                .or_insert(distance);
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for (key, distance) in best {
            let candidate = Neighbor {
                key: key.to_string(),
                distance,
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(worst) = heap.peek() {
                if candidate.distance < worst.distance {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }

        let mut results = heap.into_vec();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn rebuild<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: Iterator<Item = (&'a str, &'a [f32])>,
    {
        // The hyperplanes were sampled once at construction and survive the
        // rebuild; only the stored records are replaced.
        for table in &mut self.tables {
            table.clear();
        }
        self.slots.clear();
        for (key, vector) in entries {
            self.insert(key, vector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(points: &[(&str, Vec<f32>)], tables: usize, bits: usize) -> LshIndex {
        let mut random = RandomSource::from_seed(99);
        let mut index = LshIndex::new(
            points[0].1.len(),
            LshConfig {
                tables,
                hash_bits: bits,
            },
            DistanceKind::Euclidean,
            &mut random,
        );
        for (key, vector) in points {
            index.insert(key, vector).unwrap();
        }
        index
    }

    #[test]
    fn finds_identical_vector() {
        let points: Vec<(&str, Vec<f32>)> = vec![
            ("a", vec![1.0, 0.0, 0.0]),
            ("b", vec![0.0, 1.0, 0.0]),
            ("c", vec![0.0, 0.0, 1.0]),
        ];
        let index = index_with(&points, 16, 4);
        let results = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].key, "a");
        assert_eq!(results[0].distance, 0.0);
    }

    #[test]
    fn bucket_ids_are_stable_for_same_vector() {
        let points = vec![("a", vec![0.5, -0.5])];
        let index = index_with(&points, 4, 6);
        for table in 0..4 {
            assert_eq!(
                index.bucket_id(table, &[0.5, -0.5]),
                index.bucket_id(table, &[0.5, -0.5])
            );
            assert!(index.bucket_id(table, &[0.5, -0.5]) < (1 << 6));
        }
    }

    #[test]
    fn duplicate_keys_collapse_to_best_distance() {
        let mut random = RandomSource::from_seed(3);
        let mut index = LshIndex::new(
            2,
            LshConfig {
                tables: 8,
                hash_bits: 2,
            },
            DistanceKind::Euclidean,
            &mut random,
        );
        index.insert("x", &[5.0, 5.0]).unwrap();
        index.insert("x", &[1.0, 1.0]).unwrap(); // update re-insert
        let results = index.search(&[1.0, 1.0], 4).unwrap();
        let hits: Vec<_> = results.iter().filter(|n| n.key == "x").collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn rebuild_replaces_contents() {
        let points = vec![("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])];
        let mut index = index_with(&points, 8, 3);
        let fresh = [("c".to_string(), vec![2.0f32, 2.0])];
        index
            .rebuild(fresh.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
            .unwrap();
        assert_eq!(index.len(), 1);
        let results = index.search(&[2.0, 2.0], 4).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "c");
    }
}
