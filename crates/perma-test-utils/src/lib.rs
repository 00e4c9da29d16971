//! Test utilities for perma development.
//!
//! [`TempPool`] owns a scratch directory and a pool path inside it,
//! [`simulate_crash`] abandons a transaction the way a killed process
//! would, and [`file_digest`] fingerprints a pool file for
//! byte-for-byte comparisons across reopens.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use perma_core::hash::fnv1a;
use perma_core::{Persistent, PoolError, TxError};
use perma_heap::PoolConfig;
use perma_tx::{Pool, Transaction};
use tempfile::TempDir;

/// A pool path inside a directory that is removed on drop.
pub struct TempPool {
    dir: TempDir,
    path: PathBuf,
}

impl TempPool {
    pub fn new(file_name: &str) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(file_name);
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Create the pool with [`small_config`].
    pub fn create<R: Persistent>(&self, layout: &str) -> Result<Pool<R>, PoolError> {
        Pool::create(&self.path, layout, &small_config())
    }

    pub fn open<R: Persistent>(&self, layout: &str) -> Result<Pool<R>, PoolError> {
        Pool::open(&self.path, layout)
    }

    /// Fingerprint of the pool file as it is on disk now.
    pub fn digest(&self) -> io::Result<u64> {
        file_digest(&self.path)
    }
}

/// Smallest accepted pool with a 64 KiB undo log.
pub fn small_config() -> PoolConfig {
    PoolConfig::new(PoolConfig::MIN_POOL_SIZE).with_log_capacity(64 * 1024)
}

/// Begin a transaction, run `body`, then abandon the transaction without
/// commit or rollback and drop the pool.
///
/// The undo log is left active on disk exactly as a process killed at
/// that point would leave it; the next open must roll it back.
pub fn simulate_crash<R, F>(pool: Pool<R>, body: F) -> Result<(), TxError>
where
    R: Persistent,
    F: FnOnce(&mut Transaction<'_>) -> Result<(), TxError>,
{
    {
        let mut tx = pool.begin()?;
        body(&mut tx)?;
        mem::forget(tx);
    }
    drop(pool);
    Ok(())
}

/// FNV-1a over the whole file.
pub fn file_digest(path: &Path) -> io::Result<u64> {
    Ok(fnv1a(&fs::read(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_config_is_valid() {
        assert!(small_config().validate().is_ok());
    }

    #[test]
    fn temp_pool_path_lives_in_its_dir() {
        let tp = TempPool::new("a.pool").unwrap();
        assert!(tp.path().starts_with(tp.dir()));
        assert!(!tp.path().exists());
    }

    #[test]
    fn digest_changes_with_content() {
        let tp = TempPool::new("raw.bin").unwrap();
        fs::write(tp.path(), b"abc").unwrap();
        let a = tp.digest().unwrap();
        fs::write(tp.path(), b"abd").unwrap();
        assert_ne!(a, tp.digest().unwrap());
    }
}
