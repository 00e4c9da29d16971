//! Process-wide registry of mapped pools.
//!
//! Maps a [`PoolId`] to the address range its file is currently mapped at.
//! [`PRef::resolve`](crate::PRef::resolve) consults it, so a reference can
//! be turned into an address without a pool handle in scope, and fails
//! cleanly once the pool has been closed.

use std::sync::{OnceLock, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::error::PoolError;
use crate::id::PoolId;

/// Address range of a mapped pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    /// Base address of the mapping.
    pub base: usize,
    /// Length of the mapping in bytes.
    pub len: usize,
}

fn registry() -> &'static RwLock<IndexMap<PoolId, Mapping>> {
    static REGISTRY: OnceLock<RwLock<IndexMap<PoolId, Mapping>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(IndexMap::new()))
}

/// Record that pool `id` is mapped at `[base, base + len)`.
///
/// Fails with [`PoolError::InvalidConfig`] if the id is already registered:
/// two mappings of one pool id (e.g. a byte-for-byte copy of a pool file
/// opened alongside the original) would make references ambiguous.
pub fn register(id: PoolId, base: usize, len: usize) -> Result<(), PoolError> {
    let mut map = registry().write().unwrap_or_else(PoisonError::into_inner);
    if map.contains_key(&id) {
        return Err(PoolError::InvalidConfig {
            reason: format!("pool {id} is already mapped in this process"),
        });
    }
    map.insert(id, Mapping { base, len });
    Ok(())
}

/// Remove pool `id` from the registry. Unknown ids are ignored.
pub fn unregister(id: PoolId) {
    let mut map = registry().write().unwrap_or_else(PoisonError::into_inner);
    map.shift_remove(&id);
}

/// Current mapping of pool `id`, if it is open.
pub fn lookup(id: PoolId) -> Option<Mapping> {
    let map = registry().read().unwrap_or_else(PoisonError::into_inner);
    map.get(&id).copied()
}

/// Number of pools currently mapped in this process.
pub fn open_count() -> usize {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_unregister() {
        let id = PoolId(0x5eed_0001);
        register(id, 0x1000, 4096).unwrap();
        assert_eq!(
            lookup(id),
            Some(Mapping {
                base: 0x1000,
                len: 4096
            })
        );
        unregister(id);
        assert_eq!(lookup(id), None);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let id = PoolId(0x5eed_0002);
        register(id, 0x1000, 4096).unwrap();
        assert!(matches!(
            register(id, 0x2000, 4096),
            Err(PoolError::InvalidConfig { .. })
        ));
        unregister(id);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        unregister(PoolId(0x5eed_0003));
        assert_eq!(lookup(PoolId(0x5eed_0003)), None);
    }
}
