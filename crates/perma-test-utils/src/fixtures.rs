//! Pool fixtures shared by the array and facade tests.
//!
//! [`IndexingRoot`] is a root object holding one array per indexing case:
//!
//! - `mutable`: three doubles written through a write view.
//! - `constant`: three doubles only ever read.
//! - `empty` and `empty_const`: zero-length arrays.

use bytemuck::{Pod, Zeroable};
use perma_array::{make_array, PArray};
use perma_core::{PRef, TxError};
use perma_tx::Transaction;

/// Layout name used by the indexing fixtures.
pub const INDEXING_LAYOUT: &str = "indexing.pass";

/// Initial contents of the three-element arrays.
pub const INITIAL: [f64; 3] = [1.0, 2.0, 3.5];

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct IndexingRoot {
    pub mutable: PRef<PArray<f64, 3>>,
    pub constant: PRef<PArray<f64, 3>>,
    pub empty: PRef<PArray<f64, 0>>,
    pub empty_const: PRef<PArray<f64, 0>>,
}

impl IndexingRoot {
    /// Whether the arrays have been allocated.
    pub fn is_populated(&self) -> bool {
        !self.mutable.is_null()
    }
}

/// Allocate all four arrays and link them from `root`.
pub fn populate(tx: &mut Transaction<'_>, root: PRef<IndexingRoot>) -> Result<(), TxError> {
    let fresh = IndexingRoot {
        mutable: make_array(tx, INITIAL)?,
        constant: make_array(tx, INITIAL)?,
        empty: make_array(tx, [])?,
        empty_const: make_array(tx, [])?,
    };
    tx.set(root, fresh)
}
