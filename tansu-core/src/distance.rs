//! # Distance Metrics
//!
//! Scalar pairwise distance kernels and the metric selector.
//!
//! Each database instance owns a [`DistanceKind`] value; there is no global
//! metric state. All kernels operate on equal-length slices; the checked
//! entry point is [`DistanceKind::distance`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vector::Vector;

/// Pluggable distance metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceKind {
    Euclidean,
    SquaredEuclidean,
    Manhattan,
    Cosine,
}

impl DistanceKind {
    /// Compute the distance between two vectors, checking dimensions.
    pub fn distance(&self, a: &Vector, b: &Vector) -> Result<f32> {
        if a.len() != b.len() {
            return Err(Error::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(self.distance_slices(a.as_slice(), b.as_slice()))
    }

    /// Unchecked kernel dispatch over raw slices (lengths must match).
    #[inline]
    pub fn distance_slices(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceKind::Euclidean => euclidean(a, b),
            DistanceKind::SquaredEuclidean => squared_euclidean(a, b),
            DistanceKind::Manhattan => manhattan(a, b),
            DistanceKind::Cosine => cosine_distance(a, b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DistanceKind::Euclidean => "euclidean",
            DistanceKind::SquaredEuclidean => "squared_euclidean",
            DistanceKind::Manhattan => "manhattan",
            DistanceKind::Cosine => "cosine",
        }
    }

    /// Parse a metric name as used by the configuration and HTTP surface.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "euclidean" => Ok(DistanceKind::Euclidean),
            "squared_euclidean" => Ok(DistanceKind::SquaredEuclidean),
            "manhattan" => Ok(DistanceKind::Manhattan),
            "cosine" => Ok(DistanceKind::Cosine),
            other => Err(Error::Configuration {
                message: format!("unknown distance metric: {}", other),
            }),
        }
    }
}

impl Default for DistanceKind {
    fn default() -> Self {
        DistanceKind::Euclidean
    }
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

#[inline]
pub fn manhattan(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Cosine distance `1 - cos(a, b)`.
///
/// Convention: a zero vector has no direction and is treated as maximally
/// dissimilar from everything, so the distance is 1.0 whenever either norm
/// vanishes.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
