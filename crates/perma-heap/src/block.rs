//! Heap block headers.
//!
//! The heap is a contiguous chain of blocks. Each starts with a 32-byte
//! header; the payload follows immediately, so a reference's offset is
//! always `block + BLOCK_HEADER_SIZE`.
//!
//! ```text
//! size u64          whole block including header, multiple of BLOCK_ALIGN
//! state u64         BLOCK_FREE or BLOCK_USED
//! type_tag u64      TypeTag of the object (0 when free)
//! payload_len u64   bytes requested at allocation (0 when free)
//! ```

use perma_core::{PoolError, TypeTag};

use crate::codec::{read_u64_le, write_u64_le};

/// Size of a block header.
pub const BLOCK_HEADER_SIZE: u64 = 32;

/// Block sizes and offsets are multiples of this.
pub const BLOCK_ALIGN: u64 = 32;

/// Largest type alignment a payload is guaranteed to satisfy.
pub const MAX_ALIGN: usize = 32;

/// State word of a free block.
pub const BLOCK_FREE: u64 = u64::from_le_bytes(*b"PBLKFREE");

/// State word of an allocated block.
pub const BLOCK_USED: u64 = u64::from_le_bytes(*b"PBLKUSED");

/// Whether a block is allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// On the free list.
    Free,
    /// Holds an object.
    Used,
}

/// Decoded block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Whole block size in bytes, header included.
    pub size: u64,
    /// Allocation state.
    pub state: BlockState,
    /// Type of the object stored in the payload.
    pub type_tag: TypeTag,
    /// Requested payload length in bytes.
    pub payload_len: u64,
}

impl BlockHeader {
    /// Header of a free block spanning `size` bytes.
    pub fn free(size: u64) -> Self {
        Self {
            size,
            state: BlockState::Free,
            type_tag: TypeTag::NONE,
            payload_len: 0,
        }
    }

    /// Header of an allocated block.
    pub fn used(size: u64, type_tag: TypeTag, payload_len: u64) -> Self {
        Self {
            size,
            state: BlockState::Used,
            type_tag,
            payload_len,
        }
    }

    /// Payload capacity of the block.
    pub fn capacity(&self) -> u64 {
        self.size - BLOCK_HEADER_SIZE
    }

    /// Encode into the on-disk form.
    pub fn encode(&self) -> Result<[u8; BLOCK_HEADER_SIZE as usize], PoolError> {
        let mut out = [0u8; BLOCK_HEADER_SIZE as usize];
        let mut w: &mut [u8] = &mut out[..];
        write_u64_le(&mut w, self.size)?;
        write_u64_le(
            &mut w,
            match self.state {
                BlockState::Free => BLOCK_FREE,
                BlockState::Used => BLOCK_USED,
            },
        )?;
        write_u64_le(&mut w, self.type_tag.0)?;
        write_u64_le(&mut w, self.payload_len)?;
        Ok(out)
    }

    /// Decode the header at `pos`, checking it against the heap bounds.
    pub fn decode_at(bytes: &[u8], pos: u64, heap_end: u64) -> Result<Self, PoolError> {
        let start = usize::try_from(pos).map_err(|_| bad_block(pos, "offset overflow"))?;
        let raw = bytes
            .get(start..start + BLOCK_HEADER_SIZE as usize)
            .ok_or_else(|| bad_block(pos, "header beyond end of pool"))?;
        let mut r = raw;
        let size = read_u64_le(&mut r)?;
        let state = match read_u64_le(&mut r)? {
            BLOCK_FREE => BlockState::Free,
            BLOCK_USED => BlockState::Used,
            other => return Err(bad_block(pos, &format!("unknown state word {other:#018x}"))),
        };
        let type_tag = TypeTag(read_u64_le(&mut r)?);
        let payload_len = read_u64_le(&mut r)?;

        if size < BLOCK_HEADER_SIZE || size % BLOCK_ALIGN != 0 {
            return Err(bad_block(pos, &format!("bad block size {size}")));
        }
        match pos.checked_add(size) {
            Some(end) if end <= heap_end => {}
            _ => return Err(bad_block(pos, "block extends past heap end")),
        }
        if payload_len > size - BLOCK_HEADER_SIZE {
            return Err(bad_block(pos, "payload larger than block"));
        }
        Ok(Self {
            size,
            state,
            type_tag,
            payload_len,
        })
    }
}

/// Block size needed for a payload of `payload` bytes, or `None` on overflow.
pub fn block_size_for(payload: u64) -> Option<u64> {
    let raw = payload.checked_add(BLOCK_HEADER_SIZE)?;
    let rounded = raw.checked_add(BLOCK_ALIGN - 1)?;
    Some(rounded & !(BLOCK_ALIGN - 1))
}

/// Walk the block chain `[heap_offset, heap_end)`.
///
/// Fails unless the blocks tile the heap exactly.
pub fn walk(
    bytes: &[u8],
    heap_offset: u64,
    heap_end: u64,
) -> Result<Vec<(u64, BlockHeader)>, PoolError> {
    let mut blocks = Vec::new();
    let mut pos = heap_offset;
    while pos < heap_end {
        let block = BlockHeader::decode_at(bytes, pos, heap_end)?;
        blocks.push((pos, block));
        pos += block.size;
    }
    Ok(blocks)
}

fn bad_block(pos: u64, reason: &str) -> PoolError {
    PoolError::CorruptHeader {
        reason: format!("block at {pos:#x}: {reason}"),
    }
}
