//! # KD-Tree (Exact Search)
//!
//! Binary space-partitioning tree over the database vectors. Each node owns
//! one record and splits on dimension `depth mod D`; insertion order fully
//! determines the tree shape.
//!
//! k-NN is a bounded best-first traversal carrying a max-heap of the `k`
//! best candidates seen so far. The far subtree at a node is pruned when the
//! split-plane lower bound cannot beat the current k-th best. The bound is
//! metric-aware:
//!
//! - Euclidean / squared Euclidean: `delta^2` against squared distances
//! - Manhattan: `|delta|`
//! - Cosine: no valid plane bound exists, so the traversal visits both sides

use std::collections::BinaryHeap;

use tansu_core::distance::{cosine_distance, manhattan, squared_euclidean};
use tansu_core::error::{Error, Result};
use tansu_core::DistanceKind;

use crate::traits::{Neighbor, VectorIndex};

struct Node {
    key: String,
    vector: Vec<f32>,
    split_dimension: usize,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

pub struct KdTree {
    root: Option<Box<Node>>,
    dimensions: usize,
    metric: DistanceKind,
    count: usize,
}

impl KdTree {
    pub fn new(dimensions: usize, metric: DistanceKind) -> Self {
        Self {
            root: None,
            dimensions,
            metric,
            count: 0,
        }
    }

    pub fn metric(&self) -> DistanceKind {
        self.metric
    }

    /// Comparison score: squared space for Euclidean so the hot loop skips
    /// the square root.
    #[inline]
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DistanceKind::Euclidean | DistanceKind::SquaredEuclidean => squared_euclidean(a, b),
            DistanceKind::Manhattan => manhattan(a, b),
            DistanceKind::Cosine => cosine_distance(a, b),
        }
    }

    /// Convert an internal score back to the metric's distance.
    #[inline]
    fn finalize(&self, score: f32) -> f32 {
        match self.metric {
            DistanceKind::Euclidean => score.sqrt(),
            _ => score,
        }
    }

    /// Lower bound on the score of anything across the split plane, or None
    /// when the metric admits no such bound.
    #[inline]
    fn plane_bound(&self, delta: f32) -> Option<f32> {
        match self.metric {
            DistanceKind::Euclidean | DistanceKind::SquaredEuclidean => Some(delta * delta),
            DistanceKind::Manhattan => Some(delta.abs()),
            DistanceKind::Cosine => None,
        }
    }

    fn search_node(
        &self,
        node: &Node,
        query: &[f32],
        k: usize,
        heap: &mut BinaryHeap<Neighbor>,
    ) {
        let score = self.score(query, &node.vector);
        if heap.len() < k {
            heap.push(Neighbor {
                key: node.key.clone(),
                distance: score,
            });
        } else if let Some(worst) = heap.peek() {
            if score < worst.distance {
                heap.pop();
                heap.push(Neighbor {
                    key: node.key.clone(),
                    distance: score,
                });
            }
        }

        let delta = query[node.split_dimension] - node.vector[node.split_dimension];
        let (near, far) = if delta < 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        if let Some(child) = near {
            self.search_node(child, query, k, heap);
        }
        if let Some(child) = far {
            let visit = match self.plane_bound(delta) {
                Some(bound) => {
                    heap.len() < k || bound < heap.peek().map(|w| w.distance).unwrap_or(f32::MAX)
                }
                None => true,
            };
            if visit {
                self.search_node(child, query, k, heap);
            }
        }
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

impl VectorIndex for KdTree {
    fn insert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;

        let dimensions = self.dimensions;
        let mut depth = 0usize;
        let mut slot = &mut self.root;
        loop {
            match slot {
                Some(node) => {
                    let dim = depth % dimensions;
                    slot = if vector[dim] < node.vector[dim] {
                        &mut node.left
                    } else {
                        &mut node.right
                    };
                    depth += 1;
                }
                None => {
                    *slot = Some(Box::new(Node {
                        key: key.to_string(),
                        vector: vector.to_vec(),
                        split_dimension: depth % dimensions,
                        left: None,
                        right: None,
                    }));
                    self.count += 1;
                    return Ok(());
                }
            }
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimensions(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = &self.root {
            self.search_node(root, query, k, &mut heap);
        }

        let mut results: Vec<Neighbor> = heap.into_vec();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for n in &mut results {
            n.distance = self.finalize(n.distance);
        }
        Ok(results)
    }

    fn len(&self) -> usize {
        self.count
    }

    fn rebuild<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: Iterator<Item = (&'a str, &'a [f32])>,
    {
        self.root = None;
        self.count = 0;
        for (key, vector) in entries {
            self.insert(key, vector)?;
        }
        Ok(())
    }
}
