//! Little-endian field codec for pool metadata.
//!
//! All integers are little-endian. Fixed-width strings are NUL-padded.
//! Writers take any `Write` sink (usually a `&mut [u8]` window into the
//! mapping) and readers any `Read` source, so header, block and undo-log
//! records share one set of primitives.

use std::io::{Read, Write};

use perma_core::PoolError;

// ── Primitive writers ───────────────────────────────────────────

/// Write a little-endian u32.
pub fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), PoolError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u64.
pub fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), PoolError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write `s` into a fixed `width`-byte field, NUL-padded.
///
/// The caller checks that `s` fits; an overlong string is truncated.
pub fn write_fixed_str(w: &mut dyn Write, s: &str, width: usize) -> Result<(), PoolError> {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width);
    w.write_all(&bytes[..n])?;
    w.write_all(&vec![0u8; width - n])?;
    Ok(())
}

// ── Primitive readers ───────────────────────────────────────────

/// Read a little-endian u32.
pub fn read_u32_le(r: &mut dyn Read) -> Result<u32, PoolError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64_le(r: &mut dyn Read) -> Result<u64, PoolError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a fixed `width`-byte NUL-padded UTF-8 field.
pub fn read_fixed_str(r: &mut dyn Read, width: usize) -> Result<String, PoolError> {
    let mut buf = vec![0u8; width];
    r.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(width);
    buf.truncate(end);
    String::from_utf8(buf).map_err(|e| PoolError::CorruptHeader {
        reason: format!("invalid UTF-8 in layout name: {e}"),
    })
}

/// Read a little-endian u64 at `pos` in `bytes`.
///
/// Returns `CorruptHeader` instead of panicking when `pos` is out of range.
pub fn u64_at(bytes: &[u8], pos: u64) -> Result<u64, PoolError> {
    let start = usize::try_from(pos).ok();
    let window = start
        .and_then(|s| s.checked_add(8).map(|e| (s, e)))
        .and_then(|(s, e)| bytes.get(s..e));
    match window {
        Some(mut w) => read_u64_le(&mut w),
        None => Err(PoolError::CorruptHeader {
            reason: format!("read of 8 bytes at {pos:#x} beyond end of pool"),
        }),
    }
}

/// Write a little-endian u64 at `pos` in `bytes`.
pub fn put_u64_at(bytes: &mut [u8], pos: u64, v: u64) -> Result<(), PoolError> {
    let start = usize::try_from(pos).ok();
    let window = start
        .and_then(|s| s.checked_add(8).map(|e| (s, e)))
        .and_then(|(s, e)| bytes.get_mut(s..e));
    match window {
        Some(mut w) => write_u64_le(&mut w, v),
        None => Err(PoolError::InvalidReference {
            offset: pos,
            reason: "write of 8 bytes beyond end of pool".into(),
        }),
    }
}
