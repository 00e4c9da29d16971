//! Persistent references.
//!
//! A [`PRef`] names an object by `(pool id, byte offset)` instead of by
//! address, so it stays meaningful when the pool is mapped somewhere else
//! in the next process. It is plain data and may itself be stored inside
//! pool-resident structs.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::{Pod, Zeroable};

use crate::error::PoolError;
use crate::id::{PoolId, TypeTag};
use crate::registry;

/// Typed, offset-based handle to an object inside a pool.
///
/// Equality, ordering and hashing use `(pool id, offset)` only; the type
/// tag is checked when the reference is dereferenced through a pool view
/// or transaction. A `PRef` does not keep its referent alive.
///
/// The null reference has offset 0, which always falls inside the pool
/// header and never names an object.
#[repr(C)]
#[must_use]
pub struct PRef<T> {
    pool_id: u64,
    offset: u64,
    type_tag: u64,
    _marker: PhantomData<fn() -> T>,
}

/// An untyped reference, as returned by the raw heap allocator.
pub type RawRef = PRef<()>;

impl<T> PRef<T> {
    /// Build a reference from its raw parts.
    ///
    /// Low-level constructor for the heap and transaction layers. The
    /// parts are validated on every dereference, so a forged reference can
    /// produce an error but never an out-of-bounds access.
    pub const fn from_raw(pool_id: PoolId, offset: u64, type_tag: TypeTag) -> Self {
        Self {
            pool_id: pool_id.0,
            offset,
            type_tag: type_tag.0,
            _marker: PhantomData,
        }
    }

    /// The null reference.
    pub const fn null() -> Self {
        Self {
            pool_id: 0,
            offset: 0,
            type_tag: 0,
            _marker: PhantomData,
        }
    }

    /// Whether this is the null reference.
    pub const fn is_null(&self) -> bool {
        self.offset == 0
    }

    /// Id of the pool this reference points into.
    pub const fn pool_id(&self) -> PoolId {
        PoolId(self.pool_id)
    }

    /// Byte offset of the object from the start of the pool.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Type tag recorded when the object was allocated.
    pub const fn type_tag(&self) -> TypeTag {
        TypeTag(self.type_tag)
    }

    /// Reinterpret as a reference to another type with the same parts.
    ///
    /// The block header still records the original tag, so dereferencing
    /// the result as the wrong type fails with `InvalidReference`.
    pub const fn cast<U>(self) -> PRef<U> {
        PRef {
            pool_id: self.pool_id,
            offset: self.offset,
            type_tag: self.type_tag,
            _marker: PhantomData,
        }
    }

    /// Erase the type parameter.
    pub const fn erase(self) -> RawRef {
        self.cast()
    }

    /// Resolve to the object's current address.
    ///
    /// Only valid while the owning pool is mapped: fails with
    /// [`PoolError::PoolNotOpen`] otherwise, and with
    /// [`PoolError::InvalidReference`] for null or out-of-bounds offsets.
    /// An offset equal to the pool length resolves to the one-past-the-end
    /// address: that is where a zero-size object in the last block lives.
    /// The address is invalidated when the pool is closed.
    pub fn resolve(&self) -> Result<NonNull<u8>, PoolError> {
        if self.is_null() {
            return Err(PoolError::InvalidReference {
                offset: 0,
                reason: "null reference".into(),
            });
        }
        let mapping = registry::lookup(self.pool_id()).ok_or(PoolError::PoolNotOpen {
            pool_id: self.pool_id,
        })?;
        if self.offset > mapping.len as u64 {
            return Err(PoolError::InvalidReference {
                offset: self.offset,
                reason: format!("offset beyond pool end ({} bytes)", mapping.len),
            });
        }
        let addr = mapping.base + self.offset as usize;
        NonNull::new(addr as *mut u8).ok_or(PoolError::PoolNotOpen {
            pool_id: self.pool_id,
        })
    }
}

impl<T> Clone for PRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PRef<T> {}

impl<T> PartialEq for PRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.pool_id == other.pool_id && self.offset == other.offset
    }
}

impl<T> Eq for PRef<T> {}

impl<T> PartialOrd for PRef<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PRef<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.pool_id, self.offset).cmp(&(other.pool_id, other.offset))
    }
}

impl<T> Hash for PRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pool_id.hash(state);
        self.offset.hash(state);
    }
}

impl<T> Default for PRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for PRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PRef(pool={:#x}, off={:#x}, tag={:#x})",
            self.pool_id, self.offset, self.type_tag
        )
    }
}

// SAFETY: `PRef<T>` is `repr(C)` with three `u64` fields and a zero-sized
// marker: no padding, no pointers, and every bit pattern is a valid value
// (the all-zero pattern is the null reference).
#[allow(unsafe_code)]
unsafe impl<T: 'static> Zeroable for PRef<T> {}

// SAFETY: see the `Zeroable` impl above.
#[allow(unsafe_code)]
unsafe impl<T: 'static> Pod for PRef<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_three_words() {
        assert_eq!(std::mem::size_of::<PRef<f64>>(), 24);
        assert_eq!(std::mem::align_of::<PRef<f64>>(), 8);
    }

    #[test]
    fn zeroed_is_null() {
        let r: PRef<f64> = bytemuck::Zeroable::zeroed();
        assert!(r.is_null());
        assert_eq!(r, PRef::null());
    }

    #[test]
    fn equality_ignores_type_tag() {
        let a = PRef::<u64>::from_raw(PoolId(1), 64, TypeTag(5));
        let b = PRef::<u64>::from_raw(PoolId(1), 64, TypeTag(9));
        assert_eq!(a, b);
    }

    #[test]
    fn ordering_by_pool_then_offset() {
        let a = PRef::<u8>::from_raw(PoolId(1), 128, TypeTag(1));
        let b = PRef::<u8>::from_raw(PoolId(2), 64, TypeTag(1));
        let c = PRef::<u8>::from_raw(PoolId(2), 96, TypeTag(1));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn different_pools_never_equal() {
        let a = PRef::<u8>::from_raw(PoolId(1), 64, TypeTag(1));
        let b = PRef::<u8>::from_raw(PoolId(2), 64, TypeTag(1));
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_null_is_invalid() {
        let r = PRef::<u8>::null();
        assert!(matches!(
            r.resolve(),
            Err(PoolError::InvalidReference { offset: 0, .. })
        ));
    }

    #[test]
    fn resolve_unmapped_pool_fails() {
        let r = PRef::<u8>::from_raw(PoolId(0xdead_0001), 4096, TypeTag(1));
        assert!(matches!(r.resolve(), Err(PoolError::PoolNotOpen { .. })));
    }

    #[test]
    fn resolve_against_registered_range() {
        let backing = vec![0u8; 256];
        let base = backing.as_ptr() as usize;
        let id = PoolId(0xdead_0002);
        registry::register(id, base, backing.len()).unwrap();

        let r = PRef::<u8>::from_raw(id, 128, TypeTag(1));
        assert_eq!(r.resolve().unwrap().as_ptr() as usize, base + 128);

        let past_end = PRef::<u8>::from_raw(id, 257, TypeTag(1));
        assert!(matches!(
            past_end.resolve(),
            Err(PoolError::InvalidReference { .. })
        ));

        registry::unregister(id);
        assert!(matches!(r.resolve(), Err(PoolError::PoolNotOpen { .. })));
    }

    #[test]
    fn zero_size_object_at_pool_end_resolves() {
        let backing = vec![0u8; 512];
        let base = backing.as_ptr() as usize;
        let id = PoolId(0xdead_0003);
        registry::register(id, base, backing.len()).unwrap();

        let at_end = PRef::<[f64; 0]>::from_raw(id, 512, TypeTag(1));
        let resolved = at_end.resolve().map(|p| p.as_ptr() as usize);
        registry::unregister(id);
        assert_eq!(resolved.unwrap(), base + 512);
    }

    #[test]
    fn cast_preserves_parts() {
        let r = PRef::<f64>::from_raw(PoolId(7), 4160, TypeTag(3));
        let raw = r.erase();
        assert_eq!(raw.pool_id(), PoolId(7));
        assert_eq!(raw.offset(), 4160);
        assert_eq!(raw.type_tag(), TypeTag(3));
        let back: PRef<f64> = raw.cast();
        assert_eq!(back, r);
    }
}
