//! Crash-consistent durable heap for perma pools.
//!
//! A pool is a single memory-mapped file:
//!
//! ```text
//! 0x0000             header page (static header + root record)
//! 0x1000             undo log (log_capacity bytes)
//! 0x1000 + log_cap   heap: chain of 32-byte-aligned blocks
//! ```
//!
//! [`Heap`] owns the mapping, the [`UndoLog`](log::UndoLog) and the block
//! allocator. All mutation goes through a transaction on the heap; the
//! typed, scoped transaction API lives in `perma-tx`.
//!
//! # Modules
//!
//! - [`config`]: pool creation parameters
//! - [`header`]: header page encoding and validation
//! - [`block`]: block headers and chain walking
//! - [`log`]: the undo log
//! - [`region`]: the file mapping (the crate's only `unsafe`)
//! - [`heap`]: allocator, object access and recovery
//! - [`check`]: offline consistency check

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod block;
pub mod check;
pub mod codec;
pub mod config;
pub mod header;
pub mod heap;
pub mod log;
pub mod region;

pub use check::{check, CheckReport};
pub use config::PoolConfig;
pub use heap::{Heap, HeapStats, ObjectInfo};
pub use log::LogState;
