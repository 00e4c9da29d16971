//! The durable heap: a mapped pool file, its undo log and block allocator.
//!
//! Every mutation of pool bytes happens inside a transaction and is
//! preceded by an undo-log snapshot of the bytes it changes. Block
//! headers are journaled like object data, so rolling back a transaction
//! restores the allocator state along with the objects.
//!
//! Blocks freed inside a transaction stay quarantined until commit: their
//! payloads still hold the pre-transaction object, and reusing them before
//! commit would make that object unrecoverable on rollback. Coalescing of
//! quarantined blocks happens after the commit point with single 8-byte
//! size stores, each of which leaves a valid chain.

use std::collections::BTreeMap;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use perma_core::hash::Fnv1a;
use perma_core::{registry, PRef, Persistent, PoolError, PoolId, RawRef, TypeTag};
use tracing::{debug, info, trace, warn};

use crate::block::{self, BlockHeader, BlockState, BLOCK_HEADER_SIZE, MAX_ALIGN};
use crate::codec::put_u64_at;
use crate::config::PoolConfig;
use crate::header::{check_layout_name, PoolHeader, RootRecord, ROOT_RECORD_BYTES, ROOT_RECORD_OFFSET};
use crate::log::{LogState, UndoLog};
use crate::region::{MappedRegion, PoolMedia};

/// Allocation and occupancy figures for a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Size of the pool file.
    pub pool_size: u64,
    /// Bytes managed by the allocator.
    pub heap_size: u64,
    /// Number of allocated objects, the root included.
    pub live_objects: usize,
    /// Bytes in allocated blocks, headers included.
    pub used_bytes: u64,
    /// Bytes in allocatable free blocks, headers included.
    pub free_bytes: u64,
    /// Number of allocatable free blocks.
    pub free_blocks: usize,
    /// Largest payload a single allocation could get right now.
    pub largest_free: u64,
}

/// One allocated object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Reference to the object.
    pub reference: RawRef,
    /// Type tag recorded at allocation.
    pub type_tag: TypeTag,
    /// Payload length requested at allocation.
    pub size: u64,
    /// Size of the containing block, header included.
    pub block_size: u64,
}

/// An open pool file and its allocator state.
///
/// A `Heap` holds the file's exclusive lock and its registry entry for as
/// long as it lives. Dropping it does not roll back an in-flight
/// transaction: that is left to recovery on the next open.
pub struct Heap {
    region: MappedRegion,
    header: PoolHeader,
    log: UndoLog,
    root: Option<RootRecord>,
    /// Block offset to block size, for allocatable blocks.
    free: BTreeMap<u64, u64>,
    /// Block offset to header, for allocated blocks.
    live: BTreeMap<u64, BlockHeader>,
    /// Blocks freed by the current transaction.
    quarantine: Vec<(u64, u64)>,
    /// Whether this heap owns the registry entry for its pool id.
    registered: bool,
}

impl Heap {
    /// Create and format a new pool file.
    pub fn create(path: &Path, layout: &str, config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        check_layout_name(layout)?;
        let header = PoolHeader::new(fresh_pool_id(path), layout, config)?;
        let mut region =
            MappedRegion::create(path, config.size, config.mode, config.force_recreate)?;

        let encoded = header.encode()?;
        region.bytes_mut()[..encoded.len()].copy_from_slice(&encoded);
        UndoLog::format(&mut region, header.log_offset, header.log_capacity)?;
        write_block(
            &mut region,
            header.heap_offset,
            &BlockHeader::free(header.heap_size),
        )?;
        region.flush()?;

        info!(
            path = %path.display(),
            layout,
            pool_id = %header.pool_id,
            size = config.size,
            "created pool"
        );
        Self::assemble(region, header)
    }

    /// Open an existing pool file, running recovery if needed.
    pub fn open(path: &Path, layout: &str) -> Result<Self, PoolError> {
        let region = MappedRegion::open(path)?;
        let header = PoolHeader::decode(region.bytes())?;
        header.validate_geometry(region.len())?;
        header.check_layout(layout)?;
        info!(path = %path.display(), layout, pool_id = %header.pool_id, "opened pool");
        Self::assemble(region, header)
    }

    fn assemble(mut region: MappedRegion, header: PoolHeader) -> Result<Self, PoolError> {
        // A copy of a mapped pool shares its id; reject it before recovery
        // touches the file.
        if registry::lookup(header.pool_id).is_some() {
            return Err(PoolError::InvalidConfig {
                reason: format!("pool {} is already mapped in this process", header.pool_id),
            });
        }
        let mut log = UndoLog::load(region.bytes(), header.log_offset, header.log_capacity)?;
        if let LogState::Active { entries } = log.state() {
            warn!(
                pool_id = %header.pool_id,
                entries,
                "pool was closed mid-transaction, rolling back"
            );
            log.rollback(&mut region)?;
        }

        let mut heap = Self {
            region,
            header,
            log,
            root: None,
            free: BTreeMap::new(),
            live: BTreeMap::new(),
            quarantine: Vec::new(),
            registered: false,
        };
        heap.reload()?;
        registry::register(
            heap.header.pool_id,
            heap.region.base_addr(),
            heap.region.bytes().len(),
        )?;
        heap.registered = true;
        Ok(heap)
    }

    /// Rebuild the in-memory indexes and root from the file.
    fn reload(&mut self) -> Result<(), PoolError> {
        self.free.clear();
        self.live.clear();
        self.quarantine.clear();
        let blocks = block::walk(
            self.region.bytes(),
            self.header.heap_offset,
            self.header.heap_end(),
        )?;
        for (pos, b) in blocks {
            match b.state {
                BlockState::Free => {
                    self.free.insert(pos, b.size);
                }
                BlockState::Used => {
                    self.live.insert(pos, b);
                }
            }
        }

        let slot = ROOT_RECORD_OFFSET as usize..(ROOT_RECORD_OFFSET + ROOT_RECORD_BYTES) as usize;
        self.root = RootRecord::decode(&self.region.bytes()[slot])?;
        if let Some(root) = self.root {
            let live = root
                .offset
                .checked_sub(BLOCK_HEADER_SIZE)
                .and_then(|b| self.live.get(&b));
            match live {
                Some(b) if b.type_tag == root.tag => {}
                _ => {
                    return Err(PoolError::CorruptHeader {
                        reason: format!("root record names no live object at {:#x}", root.offset),
                    })
                }
            }
        }
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────

    /// The pool's id.
    pub fn pool_id(&self) -> PoolId {
        self.header.pool_id
    }

    /// The static header.
    pub fn header(&self) -> &PoolHeader {
        &self.header
    }

    /// Layout name recorded at create.
    pub fn layout(&self) -> &str {
        &self.header.layout
    }

    /// Path the pool was opened from.
    pub fn path(&self) -> &Path {
        self.region.path()
    }

    /// The root record, if a root has been set.
    pub fn root(&self) -> Option<RootRecord> {
        self.root
    }

    /// Undo log state.
    pub fn log_state(&self) -> LogState {
        self.log.state()
    }

    /// Whether a transaction is in flight.
    pub fn in_transaction(&self) -> bool {
        self.log.is_active()
    }

    /// Undo-log bytes left for the current transaction.
    pub fn log_available(&self) -> u64 {
        self.log.available()
    }

    /// Occupancy figures.
    pub fn stats(&self) -> HeapStats {
        let used_bytes = self.live.values().map(|b| b.size).sum();
        let free_bytes = self.free.values().sum();
        HeapStats {
            pool_size: self.header.pool_size,
            heap_size: self.header.heap_size,
            live_objects: self.live.len(),
            used_bytes,
            free_bytes,
            free_blocks: self.free.len(),
            largest_free: self.largest_free(),
        }
    }

    /// Every allocated object, in address order.
    pub fn objects(&self) -> impl Iterator<Item = ObjectInfo> + '_ {
        let pool_id = self.header.pool_id;
        self.live.iter().map(move |(&pos, b)| ObjectInfo {
            reference: RawRef::from_raw(pool_id, pos + BLOCK_HEADER_SIZE, b.type_tag),
            type_tag: b.type_tag,
            size: b.payload_len,
            block_size: b.size,
        })
    }

    fn largest_free(&self) -> u64 {
        self.free
            .values()
            .max()
            .map(|s| s - BLOCK_HEADER_SIZE)
            .unwrap_or(0)
    }

    // ── Transactions ────────────────────────────────────────────

    /// Start a transaction.
    pub fn begin(&mut self) -> Result<(), PoolError> {
        self.log.begin(&mut self.region)?;
        trace!(generation = self.log.generation(), "tx begin");
        Ok(())
    }

    /// Commit the current transaction. Returns the number of pre-images it logged.
    pub fn commit(&mut self) -> Result<u64, PoolError> {
        let entries = self.log.commit(&mut self.region)?;
        for (pos, size) in mem::take(&mut self.quarantine) {
            self.release(pos, size)?;
        }
        debug!(
            generation = self.log.generation(),
            entries,
            "tx committed"
        );
        Ok(entries)
    }

    /// Roll back the current transaction. Returns the number of pre-images restored.
    pub fn rollback(&mut self) -> Result<u64, PoolError> {
        let restored = self.log.rollback(&mut self.region)?;
        self.reload()?;
        debug!(
            generation = self.log.generation(),
            restored,
            "tx rolled back"
        );
        Ok(restored)
    }

    fn require_tx(&self) -> Result<(), PoolError> {
        if self.log.is_active() {
            Ok(())
        } else {
            Err(PoolError::NotInTransaction)
        }
    }

    fn journal(&mut self, offset: u64, len: u64) -> Result<(), PoolError> {
        self.log.snapshot(&mut self.region, offset, len)?;
        Ok(())
    }

    // ── Allocation ──────────────────────────────────────────────

    /// Allocate `size` zeroed payload bytes for an object tagged `tag`.
    ///
    /// First fit over free blocks in address order; the tail of the chosen
    /// block is split off when it can hold a block header.
    pub fn allocate(&mut self, size: u64, align: usize, tag: TypeTag) -> Result<RawRef, PoolError> {
        if align > MAX_ALIGN {
            return Err(PoolError::UnsupportedAlignment {
                align,
                max: MAX_ALIGN,
            });
        }
        self.require_tx()?;
        let out_of_memory = |heap: &Self| PoolError::OutOfMemory {
            requested: size,
            largest_free: heap.largest_free(),
        };
        let need = block::block_size_for(size).ok_or_else(|| out_of_memory(self))?;
        let (pos, have) = self
            .free
            .iter()
            .find(|&(_, &s)| s >= need)
            .map(|(&p, &s)| (p, s))
            .ok_or_else(|| out_of_memory(self))?;

        let remainder = have - need;
        let size_taken = if remainder >= BLOCK_HEADER_SIZE {
            need
        } else {
            have
        };

        self.journal(pos, BLOCK_HEADER_SIZE)?;
        if size_taken < have {
            let rest = pos + size_taken;
            self.journal(rest, BLOCK_HEADER_SIZE)?;
            write_block(&mut self.region, rest, &BlockHeader::free(remainder))?;
            self.free.insert(rest, remainder);
        }
        let hdr = BlockHeader::used(size_taken, tag, size);
        write_block(&mut self.region, pos, &hdr)?;
        self.free.remove(&pos);
        self.live.insert(pos, hdr);

        // Fresh payload: nothing to restore on rollback, so later writes
        // to it need no pre-image.
        let payload = pos + BLOCK_HEADER_SIZE;
        let capacity = hdr.capacity();
        self.log.cover(payload..payload + capacity);
        self.region.bytes_mut()[payload as usize..(payload + capacity) as usize].fill(0);

        trace!(offset = payload, size, block = size_taken, %tag, "alloc");
        Ok(RawRef::from_raw(self.header.pool_id, payload, tag))
    }

    /// Free an object. Its block becomes reusable once the transaction commits.
    pub fn free(&mut self, r: RawRef) -> Result<(), PoolError> {
        self.require_tx()?;
        let (payload, hdr) = self.locate(r)?;
        if self.root.map(|root| root.offset) == Some(payload) {
            return Err(PoolError::InvalidReference {
                offset: payload,
                reason: "the root object cannot be freed".into(),
            });
        }
        let pos = payload - BLOCK_HEADER_SIZE;
        self.journal(pos, BLOCK_HEADER_SIZE)?;
        write_block(&mut self.region, pos, &BlockHeader::free(hdr.size))?;
        self.live.remove(&pos);
        self.quarantine.push((pos, hdr.size));
        trace!(offset = payload, block = hdr.size, "free");
        Ok(())
    }

    /// Return a committed free block to the allocator, merging neighbours.
    fn release(&mut self, pos: u64, size: u64) -> Result<(), PoolError> {
        let mut start = pos;
        let mut merged = size;
        if let Some(next) = self.free.remove(&(pos + size)) {
            merged += next;
        }
        let before = self.free.range(..pos).next_back().map(|(&p, &s)| (p, s));
        if let Some((prev, prev_size)) = before {
            if prev + prev_size == pos {
                self.free.remove(&prev);
                start = prev;
                merged += prev_size;
            }
        }
        if start != pos || merged != size {
            put_u64_at(self.region.bytes_mut(), start, merged)?;
            self.region.flush_range(start, 8)?;
        }
        self.free.insert(start, merged);
        Ok(())
    }

    // ── Root ────────────────────────────────────────────────────

    /// Record `r` as the pool's root object.
    pub fn set_root(&mut self, r: RawRef) -> Result<(), PoolError> {
        self.require_tx()?;
        let (payload, hdr) = self.locate(r)?;
        let record = RootRecord {
            offset: payload,
            tag: hdr.type_tag,
            size: hdr.payload_len,
        };
        self.journal(ROOT_RECORD_OFFSET, ROOT_RECORD_BYTES)?;
        let encoded = record.encode()?;
        let at = ROOT_RECORD_OFFSET as usize;
        self.region.bytes_mut()[at..at + encoded.len()].copy_from_slice(&encoded);
        self.root = Some(record);
        Ok(())
    }

    /// Reference to the root object, if one is set.
    pub fn root_ref(&self) -> Option<RawRef> {
        self.root
            .map(|root| RawRef::from_raw(self.header.pool_id, root.offset, root.tag))
    }

    // ── Object access ───────────────────────────────────────────

    /// Validate `r` and return its payload offset and block header.
    pub fn locate(&self, r: RawRef) -> Result<(u64, BlockHeader), PoolError> {
        let offset = r.offset();
        if r.is_null() {
            return Err(invalid(0, "null reference".into()));
        }
        if r.pool_id() != self.header.pool_id {
            return Err(invalid(
                offset,
                format!(
                    "reference belongs to pool {}, this is pool {}",
                    r.pool_id(),
                    self.header.pool_id
                ),
            ));
        }
        let hdr = offset
            .checked_sub(BLOCK_HEADER_SIZE)
            .and_then(|pos| self.live.get(&pos))
            .copied()
            .ok_or_else(|| invalid(offset, "no live object at this offset".into()))?;
        if hdr.type_tag != r.type_tag() {
            return Err(invalid(
                offset,
                format!(
                    "reference tagged {}, object tagged {}",
                    r.type_tag(),
                    hdr.type_tag
                ),
            ));
        }
        Ok((offset, hdr))
    }

    fn locate_typed<T: Persistent>(&self, r: PRef<T>) -> Result<u64, PoolError> {
        let (payload, hdr) = self.locate(r.erase())?;
        if hdr.type_tag != T::type_tag() {
            return Err(invalid(
                payload,
                format!("object is not a {}", std::any::type_name::<T>()),
            ));
        }
        if hdr.payload_len < mem::size_of::<T>() as u64 {
            return Err(invalid(payload, "object smaller than its type".into()));
        }
        Ok(payload)
    }

    /// Payload bytes of an object.
    pub fn object_bytes(&self, r: RawRef) -> Result<&[u8], PoolError> {
        let (payload, hdr) = self.locate(r)?;
        Ok(&self.region.bytes()[payload as usize..(payload + hdr.payload_len) as usize])
    }

    /// Snapshot `[offset, offset + len)` of an object's payload.
    pub fn add_range(&mut self, r: RawRef, offset: u64, len: u64) -> Result<(), PoolError> {
        self.require_tx()?;
        let (payload, hdr) = self.locate(r)?;
        match offset.checked_add(len) {
            Some(end) if end <= hdr.payload_len => {}
            _ => {
                return Err(invalid(
                    payload,
                    format!(
                        "range {offset}+{len} outside object of {} bytes",
                        hdr.payload_len
                    ),
                ))
            }
        }
        self.journal(payload + offset, len)
    }

    /// Shared view of an object.
    pub fn object<T: Persistent>(&self, r: PRef<T>) -> Result<&T, PoolError> {
        let payload = self.locate_typed(r)?;
        self.view_at(payload)
    }

    /// Mutable view of an object. The whole object is snapshotted first.
    pub fn object_mut<T: Persistent>(&mut self, r: PRef<T>) -> Result<&mut T, PoolError> {
        self.require_tx()?;
        let payload = self.locate_typed(r)?;
        self.journal(payload, mem::size_of::<T>() as u64)?;
        self.view_at_mut(payload)
    }

    /// Shared view of the `F` at `byte_offset` inside an object of type `T`.
    pub fn field<T: Persistent, F: Persistent>(
        &self,
        r: PRef<T>,
        byte_offset: u64,
    ) -> Result<&F, PoolError> {
        let at = self.field_offset::<T, F>(r, byte_offset)?;
        self.view_at(at)
    }

    /// Mutable view of one field. Only the field's bytes are snapshotted.
    pub fn field_mut<T: Persistent, F: Persistent>(
        &mut self,
        r: PRef<T>,
        byte_offset: u64,
    ) -> Result<&mut F, PoolError> {
        self.require_tx()?;
        let at = self.field_offset::<T, F>(r, byte_offset)?;
        self.journal(at, mem::size_of::<F>() as u64)?;
        self.view_at_mut(at)
    }

    fn field_offset<T: Persistent, F: Persistent>(
        &self,
        r: PRef<T>,
        byte_offset: u64,
    ) -> Result<u64, PoolError> {
        let payload = self.locate_typed(r)?;
        match byte_offset.checked_add(mem::size_of::<F>() as u64) {
            Some(end) if end <= mem::size_of::<T>() as u64 => Ok(payload + byte_offset),
            _ => Err(invalid(
                payload,
                format!(
                    "field of {} bytes at {byte_offset} outside {}",
                    mem::size_of::<F>(),
                    std::any::type_name::<T>()
                ),
            )),
        }
    }

    fn view_at<T: Persistent>(&self, at: u64) -> Result<&T, PoolError> {
        let start = at as usize;
        let bytes = &self.region.bytes()[start..start + mem::size_of::<T>()];
        bytemuck::try_from_bytes(bytes).map_err(|e| invalid(at, format!("cast failed: {e:?}")))
    }

    fn view_at_mut<T: Persistent>(&mut self, at: u64) -> Result<&mut T, PoolError> {
        let start = at as usize;
        let bytes = &mut self.region.bytes_mut()[start..start + mem::size_of::<T>()];
        bytemuck::try_from_bytes_mut(bytes)
            .map_err(|e| invalid(at, format!("cast failed: {e:?}")))
    }

    /// Flush every mapped byte to the file.
    pub fn flush(&mut self) -> Result<(), PoolError> {
        self.region.flush()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.registered {
            registry::unregister(self.header.pool_id);
        }
        if self.log.is_active() {
            debug!(pool_id = %self.header.pool_id, "heap dropped mid-transaction");
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("path", &self.region.path())
            .field("pool_id", &self.header.pool_id)
            .field("layout", &self.header.layout)
            .field("log", &self.log.state())
            .field("live", &self.live.len())
            .field("free", &self.free.len())
            .finish()
    }
}

fn write_block<M: PoolMedia>(media: &mut M, pos: u64, hdr: &BlockHeader) -> Result<(), PoolError> {
    let encoded = hdr.encode()?;
    let at = pos as usize;
    media.bytes_mut()[at..at + encoded.len()].copy_from_slice(&encoded);
    Ok(())
}

fn invalid(offset: u64, reason: String) -> PoolError {
    PoolError::InvalidReference { offset, reason }
}

/// A pool id unlikely to repeat across files, processes or time.
fn fresh_pool_id(path: &Path) -> PoolId {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut h = Fnv1a::new();
    h.write_bytes(path.as_os_str().as_encoded_bytes());
    h.write_u64(nanos);
    h.write_u64(u64::from(std::process::id()));
    h.write_u64(SEQ.fetch_add(1, Ordering::Relaxed));
    PoolId(h.finish().max(1))
}
