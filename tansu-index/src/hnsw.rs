//! # HNSW Index (Layered Proximity Graph)
//!
//! Hierarchical navigable small-world graph. Every node draws a level from
//! an exponential distribution (`floor(-ln(U) * ml)`, `ml = 1/ln(M)`);
//! neighbor lists are capped at `M` above layer 0 and `2M` at layer 0.
//!
//! **Insert**: greedy descent from the top entry point through layers above
//! the node's level, then per-layer candidate search at `ef_construction`,
//! nearest-distance neighbor selection, and bidirectional wiring with cap
//! pruning. A node drawn above the current max level becomes the new entry
//! point; the entry-point table always holds at least `max_level + 1` slots.
//!
//! **Search**: the same descent at `ef_search`, a layer-0 search, then the
//! `k` nearest by exact distance.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tansu_core::error::{Error, Result};
use tansu_core::{DistanceKind, HnswConfig, RandomSource};

use crate::traits::{Neighbor, VectorIndex};

/// Min-heap entry for the expansion frontier.
#[derive(Clone, Copy)]
struct Candidate {
    idx: u32,
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: smaller distance = higher priority.
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap entry for the bounded result set.
#[derive(Clone, Copy)]
struct FarCandidate {
    idx: u32,
    distance: f32,
}

impl PartialEq for FarCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for FarCandidate {}

impl Ord for FarCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for FarCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct HnswNode {
    key: String,
    vector: Vec<f32>,
    level: usize,
    /// Neighbor lists for layers 0..=level
    neighbors: Vec<Vec<u32>>,
}

pub struct HnswIndex {
    nodes: Vec<HnswNode>,
    /// Per-layer entry points; length is at least `max_level + 1` whenever
    /// the graph is non-empty.
    entry_points: Vec<u32>,
    max_level: usize,
    m: usize,
    m0: usize,
    ml: f64,
    ef_construction: usize,
    ef_search: usize,
    dimensions: usize,
    metric: DistanceKind,
    random: RandomSource,
}

impl HnswIndex {
    pub fn new(
        dimensions: usize,
        config: HnswConfig,
        metric: DistanceKind,
        random: RandomSource,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            entry_points: Vec::new(),
            max_level: 0,
            m: config.max_connections,
            m0: config.max_connections * 2,
            ml: 1.0 / (config.max_connections as f64).ln(),
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            dimensions,
            metric,
            random,
        }
    }

    pub fn set_metric(&mut self, metric: DistanceKind) {
        self.metric = metric;
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn entry_point_slots(&self) -> usize {
        self.entry_points.len()
    }

    fn random_level(&mut self) -> usize {
        let u = self.random.uniform_open();
        (-u.ln() * self.ml).floor() as usize
    }

    #[inline]
    fn distance_to(&self, query: &[f32], idx: u32) -> f32 {
        self.metric
            .distance_slices(query, &self.nodes[idx as usize].vector)
    }

    fn layer_cap(&self, level: usize) -> usize {
        if level == 0 {
            self.m0
        } else {
            self.m
        }
    }

    /// Bounded best-first search within one layer. Returns up to `ef`
    /// candidates sorted by ascending distance.
    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, level: usize) -> Vec<(u32, f32)> {
        let entry_distance = self.distance_to(query, entry);

        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(entry);

        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        frontier.push(Candidate {
            idx: entry,
            distance: entry_distance,
        });

        let mut results: BinaryHeap<FarCandidate> = BinaryHeap::with_capacity(ef + 1);
        results.push(FarCandidate {
            idx: entry,
            distance: entry_distance,
        });

        while let Some(current) = frontier.pop() {
            let worst = results.peek().map(|r| r.distance).unwrap_or(f32::MAX);
            if results.len() >= ef && current.distance > worst {
                break;
            }

            let node = &self.nodes[current.idx as usize];
            if level > node.level {
                continue;
            }
            for &neighbor in &node.neighbors[level] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let distance = self.distance_to(query, neighbor);
                let worst = results.peek().map(|r| r.distance).unwrap_or(f32::MAX);
                if results.len() < ef || distance < worst {
                    frontier.push(Candidate {
                        idx: neighbor,
                        distance,
                    });
                    results.push(FarCandidate {
                        idx: neighbor,
                        distance,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(u32, f32)> = results.into_iter().map(|r| (r.idx, r.distance)).collect();
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        out
    }

    /// Greedy descent from the top layer down to `target_level + 1`,
    /// returning the local nearest neighbor to use as the next entry.
    fn descend(&self, query: &[f32], target_level: usize) -> u32 {
        let mut entry = self.entry_points[self.max_level];
        let mut level = self.max_level;
        while level > target_level {
            if let Some(&(best, _)) = self.search_layer(query, entry, 1, level).first() {
                entry = best;
            }
            level -= 1;
        }
        entry
    }

    /// Trim an overfull neighbor list back to the layer cap, keeping the
    /// nearest neighbors of the owning node.
    fn prune_neighbors(&mut self, idx: u32, level: usize) {
        let cap = self.layer_cap(level);
        let list = self.nodes[idx as usize].neighbors[level].clone();
        if list.len() <= cap {
            return;
        }
        let own_vector = self.nodes[idx as usize].vector.clone();
        let mut scored: Vec<(u32, f32)> = list
            .into_iter()
            .map(|n| (n, self.distance_to(&own_vector, n)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(cap);
        self.nodes[idx as usize].neighbors[level] = scored.into_iter().map(|(n, _)| n).collect();
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

impl VectorIndex for HnswIndex {
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;

        let level = self.random_level();
        let idx = self.nodes.len() as u32;
        self.nodes.push(HnswNode {
            key: key.to_string(),
            vector: vector.to_vec(),
            level,
            neighbors: vec![Vec::new(); level + 1],
        });

        // First node seeds the entry-point table outright.
        if self.nodes.len() == 1 {
            self.entry_points = vec![idx; level + 1];
            self.max_level = level;
            return Ok(());
        }

        let top = self.max_level;
        let mut entry = self.descend(vector, level.min(top));

        for layer in (0..=level.min(top)).rev() {
            let candidates = self.search_layer(vector, entry, self.ef_construction, layer);
            if let Some(&(best, _)) = candidates.first() {
                entry = best;
            }

            let cap = self.layer_cap(layer);
            let selected: Vec<u32> = candidates.iter().take(cap).map(|&(n, _)| n).collect();
            for neighbor in selected {
                self.nodes[idx as usize].neighbors[layer].push(neighbor);
                self.nodes[neighbor as usize].neighbors[layer].push(idx);
                self.prune_neighbors(neighbor, layer);
            }
        }

        // Promotion: the new node becomes the entry point for every layer it
        // introduced; the table never shrinks below max_level + 1.
        if level > self.max_level {
            self.entry_points.resize(level + 1, idx);
            self.max_level = level;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimensions(query)?;
        if k == 0 || self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        let entry = self.descend(query, 0);
        let ef = self.ef_search.max(k);
        let candidates = self.search_layer(query, entry, ef, 0);

        // Collapse stale duplicates to the best distance per key.
        let mut best: HashMap<&str, f32> = HashMap::new();
        for (idx, distance) in candidates {
            let key = self.nodes[idx as usize].key.as_str();
            best.entry(key)
                .and_modify(|d| {
                    if distance < *d {
                        *d = distance;
                    }
                })
                .or_insert(distance);
        }

        let mut results: Vec<Neighbor> = best
            .into_iter()
            .map(|(key, distance)| Neighbor {
                key: key.to_string(),
                distance,
            })
            .collect();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });
        results.truncate(k);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn rebuild<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: Iterator<Item = (&'a str, &'a [f32])>,
    {
        self.nodes.clear();
        self.entry_points.clear();
        self.max_level = 0;
        for (key, vector) in entries {
            self.insert(key, vector)?;
        }
        Ok(())
    }
}
