//! Array entry points on transactions and views.

use perma_core::{PRef, Persistent, PoolError, TxError};
use perma_tx::{Transaction, View};

use crate::array::PArray;
use crate::view::{ArrayMut, ArrayRef};

/// Allocate an array holding `elems` inside `tx`.
///
/// The element count is checked at compile time; use
/// [`PArray::from_slice`] when it is only known at run time.
pub fn make_array<T: Persistent, const N: usize>(
    tx: &mut Transaction<'_>,
    elems: [T; N],
) -> Result<PRef<PArray<T, N>>, TxError> {
    tx.alloc(PArray::new(elems))
}

/// Array access on a [`Transaction`].
pub trait TxArrayExt<'p> {
    /// Allocate an array holding `elems`. Same as [`make_array`].
    fn alloc_array<T: Persistent, const N: usize>(
        &mut self,
        elems: [T; N],
    ) -> Result<PRef<PArray<T, N>>, TxError>;

    /// Read-only view of the array behind `r`.
    fn array<T: Persistent, const N: usize>(
        &self,
        r: PRef<PArray<T, N>>,
    ) -> Result<ArrayRef<'_, T, N>, TxError>;

    /// Write-barrier view of the array behind `r`.
    ///
    /// Fails with `InvalidReference` unless `r` names a live array of
    /// exactly this element type and length.
    fn array_mut<T: Persistent, const N: usize>(
        &mut self,
        r: PRef<PArray<T, N>>,
    ) -> Result<ArrayMut<'_, 'p, T, N>, TxError>;
}

impl<'p> TxArrayExt<'p> for Transaction<'p> {
    fn alloc_array<T: Persistent, const N: usize>(
        &mut self,
        elems: [T; N],
    ) -> Result<PRef<PArray<T, N>>, TxError> {
        make_array(self, elems)
    }

    fn array<T: Persistent, const N: usize>(
        &self,
        r: PRef<PArray<T, N>>,
    ) -> Result<ArrayRef<'_, T, N>, TxError> {
        self.get(r)
    }

    fn array_mut<T: Persistent, const N: usize>(
        &mut self,
        r: PRef<PArray<T, N>>,
    ) -> Result<ArrayMut<'_, 'p, T, N>, TxError> {
        self.get(r)?;
        Ok(ArrayMut::new(self, r))
    }
}

/// Array access on a read-only [`View`].
pub trait ViewArrayExt {
    /// Read-only view of the array behind `r`.
    fn array<T: Persistent, const N: usize>(
        &self,
        r: PRef<PArray<T, N>>,
    ) -> Result<ArrayRef<'_, T, N>, PoolError>;
}

impl<R: Persistent> ViewArrayExt for View<'_, R> {
    fn array<T: Persistent, const N: usize>(
        &self,
        r: PRef<PArray<T, N>>,
    ) -> Result<ArrayRef<'_, T, N>, PoolError> {
        self.get(r)
    }
}
