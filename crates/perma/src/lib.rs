//! perma: a transactional persistent object pool.
//!
//! A pool is a memory-mapped file holding a heap of plain-data objects and
//! one root object. Objects link to each other through offset-based
//! [`PRef`](types::PRef) handles, every mutation goes through an undo log,
//! and a transaction interrupted by a crash is rolled back the next time
//! the pool is opened.
//!
//! This is the facade crate that re-exports the public API of the perma
//! sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use perma::prelude::*;
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("quick.pool");
//!
//! let pool: Pool<PRef<PArray<f64, 3>>> =
//!     Pool::create(&path, "quick", &PoolConfig::default())?;
//! let root = pool.root();
//! pool.run(|tx| {
//!     let arr = make_array(tx, [1.0, 2.0, 3.5])?;
//!     tx.set(root, arr)
//! })?;
//! pool.run(|tx| {
//!     let arr = *tx.get(root)?;
//!     tx.array_mut(arr)?.set(2, 7.5)
//! })?;
//! pool.close()?;
//!
//! let pool: Pool<PRef<PArray<f64, 3>>> = Pool::open(&path, "quick")?;
//! let view = pool.view()?;
//! let arr = view.array(*view.root()?)?;
//! assert_eq!(*arr.back()?, 7.5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `perma-core` | `PRef`, ids, `Persistent`, error enums |
//! | [`heap`] | `perma-heap` | pool file, undo log, allocator, offline check |
//! | [`tx`] | `perma-tx` | `Pool`, `Transaction`, `View` |
//! | [`array`] | `perma-array` | `PArray` and its views |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, identifiers and errors (`perma-core`).
pub use perma_core as types;

/// Pool file, undo log and allocator (`perma-heap`).
///
/// Most users only need [`heap::PoolConfig`]. [`heap::check`] inspects a
/// pool file without opening it for writing.
pub use perma_heap as heap;

/// Typed pools and transactions (`perma-tx`).
pub use perma_tx as tx;

/// Fixed-size persistent arrays (`perma-array`).
pub use perma_array as array;

/// Common imports for typical perma usage.
///
/// ```rust
/// use perma::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use perma_core::{PRef, Persistent, PoolId, TypeTag};

    // Errors
    pub use perma_core::{ContainerError, PoolError, TxError};

    // Pools and transactions
    pub use perma_heap::PoolConfig;
    pub use perma_tx::{Pool, Transaction, TxState, View};

    // Arrays
    pub use perma_array::{make_array, ArrayMut, ArrayRef, PArray, TxArrayExt, ViewArrayExt};
}
