//! Criterion micro-benchmarks for array element access.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use perma_array::{TxArrayExt, ViewArrayExt};
use perma_bench::{seed_pool, LARGE_LEN};

/// Benchmark: set one element of the large array per transaction.
fn bench_element_set(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let pool = seed_pool(&dir.path().join("set.pool")).unwrap();
    let root = pool.root();
    let mut i = 0usize;
    c.bench_function("array_element_set", |b| {
        b.iter(|| {
            pool.run(|tx| {
                let arr = tx.get(root)?.large;
                tx.array_mut(arr)?.set(i % LARGE_LEN, i as u64)
            })
            .unwrap();
            i += 1;
        });
    });
}

/// Benchmark: fill the whole large array per transaction.
fn bench_fill(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let pool = seed_pool(&dir.path().join("fill.pool")).unwrap();
    let root = pool.root();
    let mut v = 0u64;
    c.bench_function("array_fill_4096", |b| {
        b.iter(|| {
            pool.run(|tx| {
                let arr = tx.get(root)?.large;
                tx.array_mut(arr)?.fill(v)
            })
            .unwrap();
            v += 1;
        });
    });
}

/// Benchmark: sum the large array through a read-only view.
fn bench_view_sum(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let pool = seed_pool(&dir.path().join("sum.pool")).unwrap();
    c.bench_function("array_view_sum_4096", |b| {
        b.iter(|| {
            let view = pool.view().unwrap();
            let arr = view.array(view.root().unwrap().large).unwrap();
            black_box(arr.iter().sum::<u64>());
        });
    });
}

criterion_group!(benches, bench_element_set, bench_fill, bench_view_sum);
criterion_main!(benches);
