//! The fixed-size array type.

use std::ops::{Index, IndexMut};
use std::slice;

use bytemuck::{Pod, Zeroable};
use perma_core::ContainerError;

/// `N` elements of `T`, stored contiguously by value.
///
/// Layout-identical to `[T; N]`, so it can live inside a pool block and
/// be viewed in place. The length is part of the type and never changes.
///
/// Checked accessors ([`at`](Self::at), [`front`](Self::front),
/// [`back`](Self::back)) return `Result`; indexing with `[]` panics on an
/// out-of-range index, like slices. For `N == 0` every checked accessor
/// returns an error and there is no way to reach element memory.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PArray<T, const N: usize> {
    elems: [T; N],
}

impl<T, const N: usize> PArray<T, N> {
    /// Wrap `elems`.
    pub const fn new(elems: [T; N]) -> Self {
        Self { elems }
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

    /// Element `index`, or `OutOfRange`.
    pub fn at(&self, index: usize) -> Result<&T, ContainerError> {
        self.elems
            .get(index)
            .ok_or(ContainerError::OutOfRange { index, len: N })
    }

    /// Mutable element `index`, or `OutOfRange`.
    pub fn at_mut(&mut self, index: usize) -> Result<&mut T, ContainerError> {
        self.elems
            .get_mut(index)
            .ok_or(ContainerError::OutOfRange { index, len: N })
    }

    /// First element, or `EmptyContainer`.
    pub fn front(&self) -> Result<&T, ContainerError> {
        self.elems.first().ok_or(ContainerError::EmptyContainer)
    }

    /// Last element, or `EmptyContainer`.
    pub fn back(&self) -> Result<&T, ContainerError> {
        self.elems.last().ok_or(ContainerError::EmptyContainer)
    }

    /// Mutable first element, or `EmptyContainer`.
    pub fn front_mut(&mut self) -> Result<&mut T, ContainerError> {
        self.elems.first_mut().ok_or(ContainerError::EmptyContainer)
    }

    /// Mutable last element, or `EmptyContainer`.
    pub fn back_mut(&mut self) -> Result<&mut T, ContainerError> {
        self.elems.last_mut().ok_or(ContainerError::EmptyContainer)
    }

    /// The elements as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.elems
    }

    /// The elements as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.elems
    }

    /// Iterator over the elements.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.elems.iter()
    }

    /// Unwrap into the plain array.
    pub fn into_inner(self) -> [T; N] {
        self.elems
    }
}

impl<T: Copy, const N: usize> PArray<T, N> {
    /// Copy exactly `N` elements out of `elems`.
    ///
    /// Fails with `SizeMismatch` if `elems.len() != N`.
    pub fn from_slice(elems: &[T]) -> Result<Self, ContainerError> {
        let elems: [T; N] = elems
            .try_into()
            .map_err(|_| ContainerError::SizeMismatch {
                expected: N,
                found: elems.len(),
            })?;
        Ok(Self { elems })
    }
}

impl<T: Copy + Default, const N: usize> Default for PArray<T, N> {
    fn default() -> Self {
        Self {
            elems: [T::default(); N],
        }
    }
}

impl<T, const N: usize> From<[T; N]> for PArray<T, N> {
    fn from(elems: [T; N]) -> Self {
        Self { elems }
    }
}

impl<T, const N: usize> Index<usize> for PArray<T, N> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.elems[index]
    }
}

impl<T, const N: usize> IndexMut<usize> for PArray<T, N> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.elems[index]
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a PArray<T, N> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elems.iter()
    }
}

impl<T: std::fmt::Debug, const N: usize> std::fmt::Debug for PArray<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.elems.iter()).finish()
    }
}

// SAFETY: `PArray<T, N>` is `repr(transparent)` over `[T; N]`, which is
// `Zeroable` for `T: Zeroable`.
#[allow(unsafe_code)]
unsafe impl<T: Zeroable, const N: usize> Zeroable for PArray<T, N> {}

// SAFETY: `repr(transparent)` over `[T; N]`, which is `Pod` for `T: Pod`:
// no padding between elements, every bit pattern valid.
#[allow(unsafe_code)]
unsafe impl<T: Pod, const N: usize> Pod for PArray<T, N> {}
