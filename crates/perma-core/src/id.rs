//! Strongly-typed identifiers for pools and persistent types.

use std::fmt;

use crate::hash::Fnv1a;

/// Identifies a pool file.
///
/// Assigned once when the pool is created and stored in its header.
/// Every [`PRef`](crate::PRef) carries the id of the pool it points into,
/// so a reference can never be resolved against the wrong mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl From<u64> for PoolId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// 64-bit tag describing the memory layout of a persistent type.
///
/// FNV-1a over a fixed prefix and the type's size and alignment, so every
/// build of the same code computes the same tag. Renaming or moving a type
/// keeps its tag; changing its layout does not. Types with identical size
/// and alignment share a tag. Stored in every block header and in the pool
/// header (for the root type), so that a pool created with one root layout
/// refuses to open as another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(pub u64);

impl TypeTag {
    /// Tag of a block that holds no object.
    pub const NONE: TypeTag = TypeTag(0);

    /// Compute the tag for `T`.
    pub fn of<T>() -> Self {
        Self::from_layout(std::mem::size_of::<T>() as u64, std::mem::align_of::<T>() as u64)
    }

    /// Tag of any type with this size and alignment.
    pub fn from_layout(size: u64, align: u64) -> Self {
        let mut h = Fnv1a::new();
        h.write_bytes(b"perma.type");
        h.write_u64(size);
        h.write_u64(align);
        // Zero is reserved for free blocks.
        Self(h.finish().max(1))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_stable_per_type() {
        assert_eq!(TypeTag::of::<f64>(), TypeTag::of::<f64>());
        assert_eq!(TypeTag::of::<[u32; 4]>(), TypeTag::of::<[u32; 4]>());
    }

    #[test]
    fn tag_distinguishes_layouts() {
        assert_ne!(TypeTag::of::<f64>(), TypeTag::of::<u32>());
        assert_ne!(TypeTag::of::<[f64; 3]>(), TypeTag::of::<[f64; 0]>());
        assert_ne!(TypeTag::of::<[u8; 8]>(), TypeTag::of::<u64>());
    }

    #[test]
    fn tag_follows_layout_not_name() {
        #[allow(dead_code)]
        struct Renamed(f64);
        assert_eq!(TypeTag::of::<Renamed>(), TypeTag::of::<f64>());
        assert_eq!(TypeTag::of::<f64>(), TypeTag::of::<u64>());
    }

    #[test]
    fn tag_values_are_pinned() {
        // Written into pool files: these must never change.
        assert_eq!(TypeTag::of::<f64>(), TypeTag(0xb66c_1a66_21b4_b558));
        assert_eq!(TypeTag::of::<[f64; 3]>(), TypeTag(0xc68a_bde4_f063_3148));
        assert_eq!(TypeTag::of::<[f64; 0]>(), TypeTag(0x3eb0_5816_0b68_d550));
        assert_eq!(TypeTag::from_layout(0, 1), TypeTag(0x5581_5767_6dd2_7079));
    }

    #[test]
    fn tag_never_collides_with_none() {
        assert_ne!(TypeTag::of::<()>(), TypeTag::NONE);
    }

    #[test]
    fn pool_id_displays_as_hex() {
        assert_eq!(PoolId(0xab).to_string(), "0x00000000000000ab");
    }
}
