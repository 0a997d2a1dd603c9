//! Behavioral tests shared by every index implementation.

use tansu_core::{DistanceKind, HnswConfig, LshConfig, RandomSource};
use tansu_index::{HnswIndex, KdTree, LshIndex, Neighbor, VectorIndex};

const DIM: usize = 4;

fn seed_data() -> Vec<(String, Vec<f32>)> {
    vec![
        ("a".to_string(), vec![1.0, 0.0, 0.0, 0.0]),
        ("b".to_string(), vec![0.0, 1.0, 0.0, 0.0]),
        ("c".to_string(), vec![0.0, 0.0, 1.0, 0.0]),
        ("d".to_string(), vec![0.0, 0.0, 0.0, 1.0]),
    ]
}

fn populate<I: VectorIndex>(index: &mut I) {
    for (key, vector) in seed_data() {
        index.insert(&key, &vector).unwrap();
    }
}

fn assert_common_contracts<I: VectorIndex>(index: &I) {
    // Member vector comes back first at distance zero.
    let results = index.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
    assert_eq!(results[0].key, "a");
    assert_eq!(results[0].distance, 0.0);

    // k = 0 is empty; k > n is bounded by n.
    assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 0).unwrap().is_empty());
    assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 100).unwrap().len() <= 4);

    // Dimension mismatch is rejected.
    assert!(index.search(&[1.0, 0.0], 1).is_err());

    // Results come back in ascending distance order.
    let results = index.search(&[0.9, 0.1, 0.0, 0.0], 4).unwrap();
    let distances: Vec<f32> = results.iter().map(|n| n.distance).collect();
    let mut sorted = distances.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(distances, sorted);
}

#[test]
fn kdtree_contracts() {
    let mut index = KdTree::new(DIM, DistanceKind::Euclidean);
    populate(&mut index);
    assert_eq!(index.len(), 4);
    assert_common_contracts(&index);
}

#[test]
fn lsh_contracts() {
    let mut random = RandomSource::from_seed(5);
    let mut index = LshIndex::new(
        DIM,
        LshConfig {
            tables: 24,
            hash_bits: 3,
        },
        DistanceKind::Euclidean,
        &mut random,
    );
    populate(&mut index);
    assert_eq!(index.len(), 4);
    assert_common_contracts(&index);
}

#[test]
fn hnsw_contracts() {
    let mut index = HnswIndex::new(
        DIM,
        HnswConfig {
            max_connections: 4,
            ef_construction: 32,
            ef_search: 16,
        },
        DistanceKind::Euclidean,
        RandomSource::from_seed(5),
    );
    populate(&mut index);
    assert_eq!(index.len(), 4);
    assert_common_contracts(&index);
}

#[test]
fn insert_dimension_mismatch_rejected_everywhere() {
    let mut kd = KdTree::new(DIM, DistanceKind::Euclidean);
    assert!(kd.insert("bad", &[1.0]).is_err());

    let mut random = RandomSource::from_seed(1);
    let mut lsh = LshIndex::new(DIM, LshConfig::default(), DistanceKind::Euclidean, &mut random);
    assert!(lsh.insert("bad", &[1.0]).is_err());

    let mut hnsw = HnswIndex::new(
        DIM,
        HnswConfig::default(),
        DistanceKind::Euclidean,
        RandomSource::from_seed(1),
    );
    assert!(hnsw.insert("bad", &[1.0]).is_err());
}

#[test]
fn neighbor_ordering_supports_heaps() {
    let near = Neighbor {
        key: "near".to_string(),
        distance: 0.5,
    };
    let far = Neighbor {
        key: "far".to_string(),
        distance: 2.0,
    };
    assert!(near < far);
    let mut heap = std::collections::BinaryHeap::new();
    heap.push(far.clone());
    heap.push(near);
    assert_eq!(heap.peek().unwrap().key, "far");
}

#[test]
fn rebuild_drops_stale_entries() {
    let mut kd = KdTree::new(DIM, DistanceKind::Euclidean);
    populate(&mut kd);
    kd.insert("a", &[0.5, 0.5, 0.0, 0.0]).unwrap(); // stale duplicate
    assert_eq!(kd.len(), 5);

    let live = vec![("a".to_string(), vec![0.5f32, 0.5, 0.0, 0.0])];
    kd.rebuild(live.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
        .unwrap();
    assert_eq!(kd.len(), 1);
    let results = kd.search(&[0.5, 0.5, 0.0, 0.0], 4).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "a");
    assert_eq!(results[0].distance, 0.0);
}
