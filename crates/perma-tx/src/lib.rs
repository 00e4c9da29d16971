//! Typed pools and scoped transactions.
//!
//! [`Pool<R>`] wraps a durable heap whose root object has type `R`.
//! Mutation happens inside a [`Transaction`], usually through
//! [`Pool::run`]:
//!
//! ```no_run
//! use perma_heap::PoolConfig;
//! use perma_tx::Pool;
//!
//! let pool: Pool<[u64; 4]> =
//!     Pool::create("/tmp/counters.pool", "counters", &PoolConfig::default())?;
//! pool.run(|tx| {
//!     tx.get_mut(pool.root())?[0] += 1;
//!     Ok(())
//! })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Nested scopes ([`Transaction::run`]) join the enclosing transaction;
//! only the outermost scope commits or rolls back. Dropping an active
//! transaction rolls it back, and a transaction interrupted by a crash is
//! rolled back when the pool is next opened.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod pool;
pub mod transaction;
pub mod view;

pub use pool::Pool;
pub use transaction::{Transaction, TxState};
pub use view::View;
