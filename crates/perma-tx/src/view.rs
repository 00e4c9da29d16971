//! Read-only pool access.

use perma_core::{PRef, Persistent, PoolError};
use perma_heap::{HeapStats, ObjectInfo};

use crate::pool::Lease;

/// A read-only view of a pool.
///
/// Holds the pool's lock for its lifetime, so it never observes a
/// half-applied transaction. Everything reachable through it is `&T`.
pub struct View<'p, R> {
    lease: Lease<'p>,
    root: PRef<R>,
}

impl<'p, R: Persistent> View<'p, R> {
    pub(crate) fn new(lease: Lease<'p>, root: PRef<R>) -> Self {
        Self { lease, root }
    }

    /// The root object.
    pub fn root(&self) -> Result<&R, PoolError> {
        self.lease.object(self.root)
    }

    /// Reference to the root object.
    pub fn root_ref(&self) -> PRef<R> {
        self.root
    }

    /// Any object of the pool.
    pub fn get<T: Persistent>(&self, r: PRef<T>) -> Result<&T, PoolError> {
        self.lease.object(r)
    }

    /// The `F` at `byte_offset` inside `*r`.
    pub fn field<T: Persistent, F: Persistent>(
        &self,
        r: PRef<T>,
        byte_offset: usize,
    ) -> Result<&F, PoolError> {
        self.lease.field::<T, F>(r, byte_offset as u64)
    }

    /// Occupancy figures.
    pub fn stats(&self) -> HeapStats {
        self.lease.stats()
    }

    /// Every allocated object, in address order.
    pub fn objects(&self) -> impl Iterator<Item = ObjectInfo> + '_ {
        self.lease.objects()
    }
}
