use std::sync::Arc;
use criterion::{criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use tempfile::NamedTempFile;

use quarzdb::common::types::Rid;
use quarzdb::index::btree::BPlusTree;
use quarzdb::storage::buffer::BufferPoolManager;

fn build_tree(keys: i32) -> (Arc<BPlusTree<i32>>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(512, file.path()).unwrap());
    let tree = Arc::new(BPlusTree::new("bench", pool, 64, 64).unwrap());

    let mut order: Vec<i32> = (0..keys).collect();
    order.shuffle(&mut StdRng::seed_from_u64(99));
    for key in order {
        tree.insert(key, Rid::new(key, 0)).unwrap();
    }
    (tree, file)
}

fn bench_insert(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(512, file.path()).unwrap());
    let tree: BPlusTree<i32> = BPlusTree::new("bench", pool, 64, 64).unwrap();

    let mut key = 0;
    c.bench_function("btree_insert_sequential", |b| {
        b.iter(|| {
            tree.insert(key, Rid::new(key, 0)).unwrap();
            key += 1;
        })
    });
}

fn bench_point_lookup(c: &mut Criterion) {
    let (tree, _file) = build_tree(10_000);
    let mut rng = StdRng::seed_from_u64(5);

    c.bench_function("btree_get", |b| {
        b.iter(|| {
            let key = rng.gen_range(0..10_000);
            tree.get(&key).unwrap();
        })
    });
}

fn bench_range_scan(c: &mut Criterion) {
    let (tree, _file) = build_tree(10_000);
    let mut rng = StdRng::seed_from_u64(6);

    c.bench_function("btree_range_scan_100", |b| {
        b.iter(|| {
            let lo = rng.gen_range(0..9_900);
            let rids = tree.range_scan(&lo, &(lo + 99)).unwrap();
            assert_eq!(rids.len(), 100);
        })
    });
}

criterion_group!(benches, bench_insert, bench_point_lookup, bench_range_scan);
criterion_main!(benches);
