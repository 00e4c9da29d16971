//! Core types and traits for the perma persistent object pool.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental abstractions used throughout the perma workspace:
//! pool and type identifiers, the [`PRef`] persistent reference, the
//! process-wide registry of mapped pools, and the error taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod error;
pub mod handle;
pub mod hash;
pub mod id;
pub mod registry;
pub mod traits;

pub use error::{ContainerError, PoolError, TxError};
pub use handle::{PRef, RawRef};
pub use id::{PoolId, TypeTag};
pub use traits::Persistent;
