//! Benchmark profiles for the perma persistent object pool.
//!
//! - [`bench_config`]: pool geometry shared by every benchmark
//! - [`BenchRoot`]: root object with one large and one small array
//! - [`seed_pool`]: create a pool and allocate both arrays

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use perma_array::{make_array, PArray};
use perma_core::{PRef, PoolError, TxError};
use perma_heap::PoolConfig;
use perma_tx::Pool;

/// Elements in the large benchmark array.
pub const LARGE_LEN: usize = 4096;

/// Layout name of benchmark pools.
pub const BENCH_LAYOUT: &str = "perma-bench";

/// Root of a benchmark pool.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BenchRoot {
    /// 32 KiB of `u64`s.
    pub large: PRef<PArray<u64, LARGE_LEN>>,
    /// Three doubles.
    pub small: PRef<PArray<f64, 3>>,
}

/// 16 MiB pool with a 1 MiB undo log, room for whole-array snapshots of
/// [`BenchRoot::large`].
pub fn bench_config() -> PoolConfig {
    PoolConfig::new(16 * 1024 * 1024).with_log_capacity(1024 * 1024)
}

/// Create a pool at `path` with both arrays allocated.
pub fn seed_pool(path: &Path) -> Result<Pool<BenchRoot>, TxError> {
    let pool = Pool::<BenchRoot>::create(path, BENCH_LAYOUT, &bench_config())
        .map_err(TxError::from)?;
    let root = pool.root();
    pool.run(|tx| {
        let large = tx.alloc_zeroed::<PArray<u64, LARGE_LEN>>()?;
        let small = make_array(tx, [1.0, 2.0, 3.5])?;
        tx.set(root, BenchRoot { large, small })
    })?;
    Ok(pool)
}

/// Reopen a pool created by [`seed_pool`].
pub fn reopen(path: &Path) -> Result<Pool<BenchRoot>, PoolError> {
    Pool::open(path, BENCH_LAYOUT)
}
