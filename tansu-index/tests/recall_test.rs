//! # Recall Tests
//!
//! Compare the approximate indexes against the KD-tree (ground truth).
//! Metric: Recall@K = |approx results ∩ exact results| / K

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tansu_core::{DistanceKind, HnswConfig, LshConfig, RandomSource};
use tansu_index::{HnswIndex, KdTree, LshIndex, VectorIndex};

fn random_vectors(rng: &mut StdRng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn recall_at_k(approx: &[String], exact: &[String], k: usize) -> f32 {
    let approx_set: HashSet<_> = approx.iter().collect();
    let exact_set: HashSet<_> = exact.iter().take(k).collect();
    let hits = exact_set.iter().filter(|key| approx_set.contains(**key)).count();
    hits as f32 / k as f32
}

#[test]
fn lsh_full_scan_contains_exact_top10() {
    // T=32, H=4, 1000 vectors: asking for every record must surface the
    // exact top-10 with recall >= 0.9 on average.
    let n = 1000;
    let dim = 8;
    let k = 10;
    let num_queries = 50;

    let mut rng = StdRng::seed_from_u64(42);
    let data = random_vectors(&mut rng, n, dim);

    let mut exact = KdTree::new(dim, DistanceKind::Euclidean);
    let mut random = RandomSource::from_seed(42);
    let mut lsh = LshIndex::new(
        dim,
        LshConfig {
            tables: 32,
            hash_bits: 4,
        },
        DistanceKind::Euclidean,
        &mut random,
    );

    for (i, vector) in data.iter().enumerate() {
        let key = format!("v{}", i);
        exact.insert(&key, vector).unwrap();
        lsh.insert(&key, vector).unwrap();
    }

    let queries = random_vectors(&mut rng, num_queries, dim);
    let mut total_recall = 0.0f32;
    for query in &queries {
        let exact_keys: Vec<String> = exact
            .search(query, k)
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        let lsh_keys: Vec<String> = lsh
            .search(query, n)
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        total_recall += recall_at_k(&lsh_keys, &exact_keys, k);
    }

    let avg_recall = total_recall / num_queries as f32;
    assert!(
        avg_recall >= 0.9,
        "LSH recall too low: {:.1}% (expected >= 90%)",
        avg_recall * 100.0
    );
}

#[test]
fn hnsw_recall_against_exact() {
    let n = 2000;
    let dim = 24;
    let k = 10;
    let num_queries = 50;

    let mut rng = StdRng::seed_from_u64(7);
    let data = random_vectors(&mut rng, n, dim);

    let mut exact = KdTree::new(dim, DistanceKind::Euclidean);
    let mut hnsw = HnswIndex::new(
        dim,
        HnswConfig {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 100,
        },
        DistanceKind::Euclidean,
        RandomSource::from_seed(7),
    );

    for (i, vector) in data.iter().enumerate() {
        let key = format!("v{}", i);
        exact.insert(&key, vector).unwrap();
        hnsw.insert(&key, vector).unwrap();
    }

    let queries = random_vectors(&mut rng, num_queries, dim);
    let mut total_recall = 0.0f32;
    for query in &queries {
        let exact_keys: Vec<String> = exact
            .search(query, k)
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        let hnsw_keys: Vec<String> = hnsw
            .search(query, k)
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        total_recall += recall_at_k(&hnsw_keys, &exact_keys, k);
    }

    let avg_recall = total_recall / num_queries as f32;
    assert!(
        avg_recall >= 0.7,
        "HNSW recall too low: {:.1}% (expected >= 70%)",
        avg_recall * 100.0
    );
}
