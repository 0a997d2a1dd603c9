//! Index search benchmarks: KD-tree vs LSH vs HNSW at 10k vectors.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tansu_core::{DistanceKind, HnswConfig, LshConfig, RandomSource};
use tansu_index::{HnswIndex, KdTree, LshIndex, VectorIndex};

const N: usize = 10_000;
const DIM: usize = 64;
const K: usize = 10;

fn dataset() -> (Vec<Vec<f32>>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(1234);
    let data = (0..N)
        .map(|_| (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let query = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
    (data, query)
}

fn bench_search(c: &mut Criterion) {
    let (data, query) = dataset();

    let mut kd = KdTree::new(DIM, DistanceKind::Euclidean);
    let mut random = RandomSource::from_seed(1234);
    let mut lsh = LshIndex::new(
        DIM,
        LshConfig {
            tables: 16,
            hash_bits: 8,
        },
        DistanceKind::Euclidean,
        &mut random,
    );
    let mut hnsw = HnswIndex::new(
        DIM,
        HnswConfig::default(),
        DistanceKind::Euclidean,
        RandomSource::from_seed(1234),
    );

    for (i, vector) in data.iter().enumerate() {
        let key = format!("v{}", i);
        kd.insert(&key, vector).unwrap();
        lsh.insert(&key, vector).unwrap();
        hnsw.insert(&key, vector).unwrap();
    }

    let mut group = c.benchmark_group("knn_search_10k");
    group.bench_function("kdtree", |b| {
        b.iter(|| kd.search(black_box(&query), K).unwrap())
    });
    group.bench_function("lsh", |b| {
        b.iter(|| lsh.search(black_box(&query), K).unwrap())
    });
    group.bench_function("hnsw", |b| {
        b.iter(|| hnsw.search(black_box(&query), K).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
