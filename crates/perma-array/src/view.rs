//! Read-only and write-barrier views of pool-resident arrays.

use std::mem;
use std::ops::{Index, IndexMut};

use perma_core::{ContainerError, PRef, Persistent, TxError};
use perma_tx::Transaction;

use crate::array::PArray;

/// Read-only view of a pool-resident array.
///
/// Every accessor reachable through it yields `&T`, whatever `N` is.
pub type ArrayRef<'a, T, const N: usize> = &'a PArray<T, N>;

/// Mutable view of a pool-resident array inside a transaction.
///
/// Each mutable element access snapshots only that element's bytes into
/// the undo log before handing out `&mut T`, so touching one element of a
/// large array costs one element of log space.
pub struct ArrayMut<'t, 'p, T, const N: usize> {
    tx: &'t mut Transaction<'p>,
    array: PRef<PArray<T, N>>,
}

impl<'t, 'p, T: Persistent, const N: usize> ArrayMut<'t, 'p, T, N> {
    pub(crate) fn new(tx: &'t mut Transaction<'p>, array: PRef<PArray<T, N>>) -> Self {
        Self { tx, array }
    }

    /// Number of elements.
    pub const fn size(&self) -> usize {
        N
    }

    /// Number of elements.
    pub const fn len(&self) -> usize {
        N
    }

    /// Whether `N == 0`.
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Reference to the underlying array object.
    pub fn reference(&self) -> PRef<PArray<T, N>> {
        self.array
    }

    /// The whole array, read-only.
    pub fn as_array(&self) -> Result<ArrayRef<'_, T, N>, TxError> {
        self.tx.get(self.array)
    }

    /// Element `index`, read-only.
    pub fn at(&self, index: usize) -> Result<&T, TxError> {
        let offset = element_offset::<T, N>(index)?;
        self.tx.field::<PArray<T, N>, T>(self.array, offset)
    }

    /// Element `index`, snapshotted for writing.
    pub fn at_mut(&mut self, index: usize) -> Result<&mut T, TxError> {
        let offset = element_offset::<T, N>(index)?;
        self.tx.field_mut::<PArray<T, N>, T>(self.array, offset)
    }

    /// First element, read-only.
    pub fn front(&self) -> Result<&T, TxError> {
        self.at(first::<N>()?)
    }

    /// Last element, read-only.
    pub fn back(&self) -> Result<&T, TxError> {
        self.at(last::<N>()?)
    }

    /// First element, snapshotted for writing.
    pub fn front_mut(&mut self) -> Result<&mut T, TxError> {
        self.at_mut(first::<N>()?)
    }

    /// Last element, snapshotted for writing.
    pub fn back_mut(&mut self) -> Result<&mut T, TxError> {
        self.at_mut(last::<N>()?)
    }

    /// Overwrite element `index`.
    pub fn set(&mut self, index: usize, value: T) -> Result<(), TxError> {
        *self.at_mut(index)? = value;
        Ok(())
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: T) -> Result<(), TxError> {
        if N == 0 {
            return Ok(());
        }
        self.tx.get_mut(self.array)?.as_mut_slice().fill(value);
        Ok(())
    }

    /// Exchange elements `a` and `b`.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<(), TxError> {
        let va = *self.at(a)?;
        let vb = *self.at(b)?;
        if a != b {
            *self.at_mut(a)? = vb;
            *self.at_mut(b)? = va;
        }
        Ok(())
    }

    /// Copy of every element.
    pub fn to_array(&self) -> Result<[T; N], TxError> {
        Ok(self.as_array()?.into_inner())
    }
}

impl<T: Persistent, const N: usize> Index<usize> for ArrayMut<'_, '_, T, N> {
    type Output = T;

    /// Panics if `index >= N` or the array is no longer live.
    fn index(&self, index: usize) -> &T {
        match self.at(index) {
            Ok(v) => v,
            Err(e) => panic!("index out of bounds: {e}"),
        }
    }
}

impl<T: Persistent, const N: usize> IndexMut<usize> for ArrayMut<'_, '_, T, N> {
    /// Panics if `index >= N`, the array is no longer live, or the undo
    /// log is full.
    fn index_mut(&mut self, index: usize) -> &mut T {
        match self.at_mut(index) {
            Ok(v) => v,
            Err(e) => panic!("index out of bounds: {e}"),
        }
    }
}

impl<T, const N: usize> std::fmt::Debug for ArrayMut<'_, '_, T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayMut")
            .field("array", &self.array.erase())
            .field("len", &N)
            .finish()
    }
}

fn element_offset<T, const N: usize>(index: usize) -> Result<usize, TxError> {
    if index >= N {
        return Err(ContainerError::OutOfRange { index, len: N }.into());
    }
    Ok(index * mem::size_of::<T>())
}

fn first<const N: usize>() -> Result<usize, ContainerError> {
    if N == 0 {
        Err(ContainerError::EmptyContainer)
    } else {
        Ok(0)
    }
}

fn last<const N: usize>() -> Result<usize, ContainerError> {
    N.checked_sub(1).ok_or(ContainerError::EmptyContainer)
}
