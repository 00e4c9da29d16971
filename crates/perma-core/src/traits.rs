//! Traits for types that may live inside a pool.

use bytemuck::Pod;

use crate::id::TypeTag;

/// A type that can be stored in a pool and viewed in place.
///
/// Blanket-implemented for every [`Pod`] type: plain bytes, no pointers,
/// no padding, valid for any bit pattern. Those are exactly the types whose
/// bytes mean the same thing after the pool is unmapped and mapped again
/// at another address. Native references and `Box` are not `Pod`; use
/// [`PRef`](crate::PRef) for links between objects.
pub trait Persistent: Pod {
    /// The tag recorded in the block header for objects of this type.
    fn type_tag() -> TypeTag {
        TypeTag::of::<Self>()
    }
}

impl<T: Pod> Persistent for T {}
