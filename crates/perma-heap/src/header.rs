//! Pool header page.
//!
//! The first [`HEADER_SIZE`] bytes of a pool hold two records:
//!
//! ```text
//! 0x000  static header (written once at create, checksummed)
//!        magic[8] version u32 flags u32 pool_id u64 pool_size u64
//!        log_offset u64 log_capacity u64 heap_offset u64 heap_size u64
//!        layout[64] checksum u64
//! 0x200  root record (journaled like any heap byte)
//!        root_offset u64 root_tag u64 root_size u64 checksum u64
//! ```
//!
//! The static header is never rewritten after create, so it can be
//! validated before recovery runs. The root record changes inside
//! transactions and is only trusted after recovery.

use perma_core::hash::Fnv1a;
use perma_core::{PoolError, PoolId, TypeTag};

use crate::codec::{
    read_fixed_str, read_u32_le, read_u64_le, write_fixed_str, write_u32_le, write_u64_le,
};
use crate::config::PoolConfig;

/// Bytes reserved for the header page.
pub const HEADER_SIZE: u64 = 4096;

/// Magic bytes at offset 0.
pub const MAGIC: [u8; 8] = *b"PERMAPOL";

/// On-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Maximum layout name length in bytes.
pub const LAYOUT_MAX: usize = 64;

/// Encoded size of the static header, checksum included.
pub const STATIC_HEADER_BYTES: usize = 136;

/// Offset of the root record within the header page.
pub const ROOT_RECORD_OFFSET: u64 = 0x200;

/// Encoded size of the root record.
pub const ROOT_RECORD_BYTES: u64 = 32;

/// Immutable pool geometry and identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolHeader {
    /// Reserved feature flags. Always 0 in this version.
    pub flags: u32,
    /// Identity baked into every reference into this pool.
    pub pool_id: PoolId,
    /// File size at create time.
    pub pool_size: u64,
    /// Start of the undo log.
    pub log_offset: u64,
    /// Undo log size in bytes.
    pub log_capacity: u64,
    /// Start of the first heap block.
    pub heap_offset: u64,
    /// Heap size in bytes, a multiple of the block alignment.
    pub heap_size: u64,
    /// Layout name supplied at create.
    pub layout: String,
}

impl PoolHeader {
    /// Geometry for a new pool described by `config`.
    pub fn new(pool_id: PoolId, layout: &str, config: &PoolConfig) -> Result<Self, PoolError> {
        check_layout_name(layout)?;
        let heap_offset = config.heap_offset();
        let heap_size = config.size.saturating_sub(heap_offset) & !(crate::block::BLOCK_ALIGN - 1);
        Ok(Self {
            flags: 0,
            pool_id,
            pool_size: config.size,
            log_offset: HEADER_SIZE,
            log_capacity: config.log_capacity,
            heap_offset,
            heap_size,
            layout: layout.to_owned(),
        })
    }

    /// One past the last heap byte.
    pub fn heap_end(&self) -> u64 {
        self.heap_offset + self.heap_size
    }

    /// Encode into the fixed-size on-disk form.
    pub fn encode(&self) -> Result<[u8; STATIC_HEADER_BYTES], PoolError> {
        let mut out = [0u8; STATIC_HEADER_BYTES];
        {
            let mut w: &mut [u8] = &mut out[..STATIC_HEADER_BYTES - 8];
            std::io::Write::write_all(&mut w, &MAGIC)?;
            write_u32_le(&mut w, FORMAT_VERSION)?;
            write_u32_le(&mut w, self.flags)?;
            write_u64_le(&mut w, self.pool_id.0)?;
            write_u64_le(&mut w, self.pool_size)?;
            write_u64_le(&mut w, self.log_offset)?;
            write_u64_le(&mut w, self.log_capacity)?;
            write_u64_le(&mut w, self.heap_offset)?;
            write_u64_le(&mut w, self.heap_size)?;
            write_fixed_str(&mut w, &self.layout, LAYOUT_MAX)?;
        }
        let checksum = header_checksum(&out[..STATIC_HEADER_BYTES - 8]);
        out[STATIC_HEADER_BYTES - 8..].copy_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    /// Decode and verify the static header at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, PoolError> {
        let raw = bytes
            .get(..STATIC_HEADER_BYTES)
            .ok_or_else(|| corrupt("file shorter than the pool header"))?;
        if raw[..8] != MAGIC {
            return Err(corrupt("bad magic, not a perma pool"));
        }
        let mut r = &raw[8..];
        let version = read_u32_le(&mut r)?;
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!(
                "unsupported format version {version}, expected {FORMAT_VERSION}"
            )));
        }
        let flags = read_u32_le(&mut r)?;
        let pool_id = PoolId(read_u64_le(&mut r)?);
        let pool_size = read_u64_le(&mut r)?;
        let log_offset = read_u64_le(&mut r)?;
        let log_capacity = read_u64_le(&mut r)?;
        let heap_offset = read_u64_le(&mut r)?;
        let heap_size = read_u64_le(&mut r)?;
        let layout = read_fixed_str(&mut r, LAYOUT_MAX)?;
        let stored = read_u64_le(&mut r)?;
        let computed = header_checksum(&raw[..STATIC_HEADER_BYTES - 8]);
        if stored != computed {
            return Err(corrupt(&format!(
                "header checksum mismatch: stored {stored:#018x}, computed {computed:#018x}"
            )));
        }
        Ok(Self {
            flags,
            pool_id,
            pool_size,
            log_offset,
            log_capacity,
            heap_offset,
            heap_size,
            layout,
        })
    }

    /// Check that the recorded regions are ordered and fit in `file_len`.
    pub fn validate_geometry(&self, file_len: u64) -> Result<(), PoolError> {
        if self.pool_size != file_len {
            return Err(corrupt(&format!(
                "file is {file_len} bytes, header records {}",
                self.pool_size
            )));
        }
        if self.log_offset != HEADER_SIZE {
            return Err(corrupt(&format!("log offset {:#x}", self.log_offset)));
        }
        let log_end = self.log_offset.checked_add(self.log_capacity);
        if log_end != Some(self.heap_offset) {
            return Err(corrupt("heap does not start at the end of the log"));
        }
        match self.heap_offset.checked_add(self.heap_size) {
            Some(end) if end <= self.pool_size => {}
            _ => return Err(corrupt("heap extends beyond the end of the file")),
        }
        if self.heap_offset % crate::block::BLOCK_ALIGN != 0
            || self.heap_size % crate::block::BLOCK_ALIGN != 0
            || self.heap_size < crate::block::BLOCK_HEADER_SIZE
        {
            return Err(corrupt("heap is not block aligned"));
        }
        Ok(())
    }

    /// Fail with [`PoolError::LayoutMismatch`] unless the stored layout is `expected`.
    pub fn check_layout(&self, expected: &str) -> Result<(), PoolError> {
        if self.layout != expected {
            return Err(PoolError::LayoutMismatch {
                expected: expected.to_owned(),
                found: self.layout.clone(),
            });
        }
        Ok(())
    }
}

/// Validate a layout name for storage in the header.
pub fn check_layout_name(layout: &str) -> Result<(), PoolError> {
    if layout.len() > LAYOUT_MAX {
        return Err(PoolError::LayoutNameTooLong {
            len: layout.len(),
            max: LAYOUT_MAX,
        });
    }
    if layout.as_bytes().contains(&0) {
        return Err(PoolError::InvalidConfig {
            reason: "layout name contains a NUL byte".into(),
        });
    }
    Ok(())
}

/// The pool's root object, as recorded in the header page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootRecord {
    /// Payload offset of the root object.
    pub offset: u64,
    /// Type tag of the root object.
    pub tag: TypeTag,
    /// Payload size of the root object.
    pub size: u64,
}

impl RootRecord {
    /// Encode with a trailing checksum.
    pub fn encode(&self) -> Result<[u8; ROOT_RECORD_BYTES as usize], PoolError> {
        let mut out = [0u8; ROOT_RECORD_BYTES as usize];
        {
            let mut w: &mut [u8] = &mut out[..];
            write_u64_le(&mut w, self.offset)?;
            write_u64_le(&mut w, self.tag.0)?;
            write_u64_le(&mut w, self.size)?;
        }
        let checksum = header_checksum(&out[..24]);
        out[24..].copy_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    /// Decode the root record slot. An all-zero slot means no root yet.
    pub fn decode(slot: &[u8]) -> Result<Option<Self>, PoolError> {
        let raw = slot
            .get(..ROOT_RECORD_BYTES as usize)
            .ok_or_else(|| corrupt("root record truncated"))?;
        if raw.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        let mut r = raw;
        let offset = read_u64_le(&mut r)?;
        let tag = TypeTag(read_u64_le(&mut r)?);
        let size = read_u64_le(&mut r)?;
        let stored = read_u64_le(&mut r)?;
        if stored != header_checksum(&raw[..24]) {
            return Err(corrupt("root record checksum mismatch"));
        }
        Ok(Some(Self { offset, tag, size }))
    }
}

fn header_checksum(bytes: &[u8]) -> u64 {
    let mut h = Fnv1a::new();
    h.write_bytes(bytes);
    h.finish()
}

fn corrupt(reason: &str) -> PoolError {
    PoolError::CorruptHeader {
        reason: reason.to_owned(),
    }
}
