//! Fixed-size arrays stored in place inside a pool.
//!
//! [`PArray<T, N>`] is `N` elements of `T` laid out exactly like `[T; N]`.
//! It is allocated with [`make_array`] (or [`TxArrayExt::alloc_array`]) and
//! reached through one of two views:
//!
//! - [`ArrayRef`], from [`ViewArrayExt::array`] or [`TxArrayExt::array`]:
//!   a shared reference, so every element it yields is `&T`.
//! - [`ArrayMut`], from [`TxArrayExt::array_mut`]: yields `&mut T`, after
//!   recording the element's pre-image in the transaction's undo log.
//!
//! ```no_run
//! use perma_array::{make_array, PArray, TxArrayExt, ViewArrayExt};
//! use perma_core::PRef;
//! use perma_heap::PoolConfig;
//! use perma_tx::Pool;
//!
//! let pool: Pool<PRef<PArray<f64, 3>>> =
//!     Pool::create("/tmp/indexing.pool", "indexing", &PoolConfig::default())?;
//! let root = pool.root();
//! pool.run(|tx| {
//!     let arr = make_array(tx, [1.0, 2.0, 3.5])?;
//!     tx.set(root, arr)?;
//!     Ok(())
//! })?;
//! pool.run(|tx| {
//!     let arr = *tx.get(root)?;
//!     let mut view = tx.array_mut(arr)?;
//!     view.set(0, 5.5)?;
//!     *view.back_mut()? = 7.5;
//!     Ok(())
//! })?;
//! let view = pool.view()?;
//! let arr = view.array(*view.root()?)?;
//! assert_eq!(*arr.front()?, 5.5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Zero-length arrays are valid types. Every checked accessor on them
//! returns `OutOfRange` or `EmptyContainer`; none touches element memory.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod array;
pub mod ext;
pub mod view;

pub use array::PArray;
pub use ext::{make_array, TxArrayExt, ViewArrayExt};
pub use view::{ArrayMut, ArrayRef};
