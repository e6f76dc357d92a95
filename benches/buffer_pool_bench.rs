use std::sync::Arc;
use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use quarzdb::storage::buffer::BufferPoolManager;

fn bench_new_and_unpin(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());

    c.bench_function("buffer_pool_new_page", |b| {
        b.iter(|| {
            let (_, page_id) = pool.new_page().unwrap();
            pool.unpin_page(page_id, false).unwrap();
        })
    });
}

fn bench_fetch_resident(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());

    let mut ids = Vec::new();
    for _ in 0..128 {
        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false).unwrap();
        ids.push(page_id);
    }

    let mut next = 0usize;
    c.bench_function("buffer_pool_fetch_resident", |b| {
        b.iter(|| {
            let page_id = ids[next % ids.len()];
            next += 1;
            let page = pool.fetch_page(page_id).unwrap();
            let _ = page.read().data[0];
            pool.unpin_page(page_id, false).unwrap();
        })
    });
}

fn bench_fetch_with_eviction(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    // Pool far smaller than the working set, so most fetches evict
    let pool = Arc::new(BufferPoolManager::new(16, file.path()).unwrap());

    let mut ids = Vec::new();
    for i in 0..256u8 {
        let (page, page_id) = pool.new_page().unwrap();
        page.write().data[0] = i;
        pool.unpin_page(page_id, true).unwrap();
        ids.push(page_id);
    }

    let mut next = 0usize;
    c.bench_function("buffer_pool_fetch_evicting", |b| {
        b.iter(|| {
            let page_id = ids[next % ids.len()];
            next += 1;
            let page = pool.fetch_page(page_id).unwrap();
            let _ = page.read().data[0];
            pool.unpin_page(page_id, false).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_new_and_unpin,
    bench_fetch_resident,
    bench_fetch_with_eviction
);
criterion_main!(benches);
