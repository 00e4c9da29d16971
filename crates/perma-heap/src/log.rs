//! Undo log.
//!
//! Before a byte range of the pool is modified inside a transaction, its
//! current contents are appended to the log and made durable. Commit makes
//! the modified pool durable and then flips the log to idle; that single
//! 8-byte store is the commit point. If the process dies first, the next
//! open finds the log active and copies every pre-image back, newest first.
//!
//! ```text
//! +0x00  state u64        LOG_IDLE or LOG_ACTIVE
//! +0x08  generation u64   bumped by every begin
//! +0x40  entries          target u64, len u64, generation u64,
//!                         checksum u64, data (padded to 8 bytes)
//! ```
//!
//! There is no persistent entry count. Recovery scans entries while their
//! generation matches the header and their checksum verifies, so a torn
//! final entry (whose target was never modified) and stale entries from
//! earlier transactions are both ignored.

use std::ops::Range;

use perma_core::hash::Fnv1a;
use perma_core::PoolError;
use smallvec::SmallVec;

use crate::codec::{put_u64_at, u64_at};
use crate::region::PoolMedia;

/// Bytes before the first entry.
pub const LOG_HEADER_SIZE: u64 = 64;

/// Fixed part of every entry.
pub const ENTRY_HEADER_SIZE: u64 = 32;

/// State word of an idle log.
pub const LOG_IDLE: u64 = 0;

/// State word of a log holding an uncommitted transaction.
pub const LOG_ACTIVE: u64 = u64::from_le_bytes(*b"PLOGACTV");

/// Whether a transaction is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogState {
    /// No transaction in progress.
    Idle,
    /// A transaction is in progress (or was, when the process died).
    Active {
        /// Pre-images recorded so far.
        entries: u64,
    },
}

/// One recorded pre-image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoEntry {
    /// Pool offset the pre-image belongs to.
    pub target: u64,
    /// Length of the pre-image.
    pub len: u64,
    /// Pool offset of the saved bytes inside the log.
    pub data_pos: u64,
}

/// In-memory handle on the on-disk undo log.
#[derive(Debug)]
pub struct UndoLog {
    offset: u64,
    capacity: u64,
    generation: u64,
    active: bool,
    used: u64,
    entries: u64,
    covered: SmallVec<[Range<u64>; 8]>,
}

impl UndoLog {
    /// Write an empty, idle log at `offset`.
    pub fn format<M: PoolMedia>(media: &mut M, offset: u64, capacity: u64) -> Result<(), PoolError> {
        put_u64_at(media.bytes_mut(), offset, LOG_IDLE)?;
        put_u64_at(media.bytes_mut(), offset + 8, 0)?;
        media.flush_range(offset, LOG_HEADER_SIZE.min(capacity))
    }

    /// Read the log header at `offset`.
    pub fn load(bytes: &[u8], offset: u64, capacity: u64) -> Result<Self, PoolError> {
        if capacity < LOG_HEADER_SIZE {
            return Err(PoolError::CorruptHeader {
                reason: format!("log capacity {capacity} smaller than its header"),
            });
        }
        let state = u64_at(bytes, offset)?;
        let generation = u64_at(bytes, offset + 8)?;
        let active = match state {
            LOG_IDLE => false,
            LOG_ACTIVE => true,
            other => {
                return Err(PoolError::CorruptHeader {
                    reason: format!("undo log state word {other:#018x}"),
                })
            }
        };
        let mut log = Self {
            offset,
            capacity,
            generation,
            active,
            used: 0,
            entries: 0,
            covered: SmallVec::new(),
        };
        if active {
            let found = log.scan(bytes)?;
            log.entries = found.len() as u64;
            log.used = found
                .last()
                .map(|e| e.data_pos + pad8(e.len) - log.area_start())
                .unwrap_or(0);
        }
        Ok(log)
    }

    /// Current state.
    pub fn state(&self) -> LogState {
        if self.active {
            LogState::Active {
                entries: self.entries,
            }
        } else {
            LogState::Idle
        }
    }

    /// Whether a transaction is in flight.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Transaction counter; incremented by every [`begin`](Self::begin).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bytes left for entries in the current transaction.
    pub fn available(&self) -> u64 {
        self.capacity - LOG_HEADER_SIZE - self.used
    }

    /// Region of the pool occupied by the log.
    pub fn span(&self) -> Range<u64> {
        self.offset..self.offset + self.capacity
    }

    /// Start a transaction.
    pub fn begin<M: PoolMedia>(&mut self, media: &mut M) -> Result<(), PoolError> {
        if self.active {
            return Err(PoolError::TransactionActive);
        }
        self.generation += 1;
        put_u64_at(media.bytes_mut(), self.offset + 8, self.generation)?;
        media.flush_range(self.offset + 8, 8)?;
        put_u64_at(media.bytes_mut(), self.offset, LOG_ACTIVE)?;
        media.flush_range(self.offset, 8)?;
        self.active = true;
        self.used = 0;
        self.entries = 0;
        self.covered.clear();
        Ok(())
    }

    /// Mark `range` as already restorable, so snapshots inside it are skipped.
    ///
    /// Used for freshly allocated payloads: rolling back the allocation
    /// restores the block header, and the payload bytes stop mattering.
    pub fn cover(&mut self, range: Range<u64>) {
        if !range.is_empty() {
            self.covered.push(range);
        }
    }

    /// Whether `[start, end)` lies inside one recorded range.
    pub fn is_covered(&self, start: u64, end: u64) -> bool {
        self.covered.iter().any(|r| r.start <= start && end <= r.end)
    }

    /// Save the current bytes of `[target, target + len)`.
    ///
    /// Returns `false` if nothing needed saving. The entry is durable
    /// before this returns; only then may the caller modify the range.
    pub fn snapshot<M: PoolMedia>(
        &mut self,
        media: &mut M,
        target: u64,
        len: u64,
    ) -> Result<bool, PoolError> {
        if !self.active {
            return Err(PoolError::NotInTransaction);
        }
        let end = target
            .checked_add(len)
            .ok_or_else(|| PoolError::InvalidReference {
                offset: target,
                reason: "range overflows".into(),
            })?;
        if len == 0 || self.is_covered(target, end) {
            return Ok(false);
        }
        self.check_target(media.bytes().len() as u64, target, end)?;

        let need = ENTRY_HEADER_SIZE + pad8(len);
        if need > self.available() {
            return Err(PoolError::LogFull {
                requested: need,
                available: self.available(),
            });
        }

        let pos = self.area_start() + self.used;
        let data_pos = pos + ENTRY_HEADER_SIZE;
        let bytes = media.bytes_mut();
        bytes.copy_within(target as usize..end as usize, data_pos as usize);
        put_u64_at(bytes, pos, target)?;
        put_u64_at(bytes, pos + 8, len)?;
        put_u64_at(bytes, pos + 16, self.generation)?;
        let checksum = entry_checksum(
            target,
            len,
            self.generation,
            &bytes[data_pos as usize..(data_pos + len) as usize],
        );
        put_u64_at(bytes, pos + 24, checksum)?;
        media.flush_range(pos, need)?;

        self.used += need;
        self.entries += 1;
        self.cover(target..end);
        Ok(true)
    }

    /// Make the transaction's changes permanent.
    ///
    /// Flushes the whole pool, then marks the log idle. Returns the number
    /// of pre-images the transaction recorded.
    pub fn commit<M: PoolMedia>(&mut self, media: &mut M) -> Result<u64, PoolError> {
        if !self.active {
            return Err(PoolError::NotInTransaction);
        }
        media.flush()?;
        self.finish(media)?;
        Ok(self.entries)
    }

    /// Restore every pre-image of the current transaction, newest first.
    ///
    /// Returns the number of entries restored. A no-op on an idle log.
    pub fn rollback<M: PoolMedia>(&mut self, media: &mut M) -> Result<u64, PoolError> {
        if !self.active {
            return Ok(0);
        }
        let found = self.scan(media.bytes())?;
        let bytes = media.bytes_mut();
        for e in found.iter().rev() {
            let src = e.data_pos as usize..(e.data_pos + e.len) as usize;
            bytes.copy_within(src, e.target as usize);
        }
        media.flush()?;
        self.finish(media)?;
        Ok(found.len() as u64)
    }

    /// Entries of the current transaction as recorded on disk.
    pub fn scan(&self, bytes: &[u8]) -> Result<Vec<UndoEntry>, PoolError> {
        let mut found = Vec::new();
        let end = self.offset + self.capacity;
        let mut pos = self.area_start();
        while pos + ENTRY_HEADER_SIZE <= end {
            let target = u64_at(bytes, pos)?;
            let len = u64_at(bytes, pos + 8)?;
            let generation = u64_at(bytes, pos + 16)?;
            let stored = u64_at(bytes, pos + 24)?;
            if generation != self.generation || len == 0 {
                break;
            }
            let data_pos = pos + ENTRY_HEADER_SIZE;
            let next = match data_pos.checked_add(pad8(len)) {
                Some(next) if next <= end => next,
                _ => break,
            };
            let data = &bytes[data_pos as usize..(data_pos + len) as usize];
            if entry_checksum(target, len, generation, data) != stored {
                break;
            }
            let target_end = target
                .checked_add(len)
                .ok_or_else(|| PoolError::CorruptHeader {
                    reason: format!("undo entry at {pos:#x} overflows"),
                })?;
            self.check_target(bytes.len() as u64, target, target_end)
                .map_err(|e| PoolError::CorruptHeader {
                    reason: format!("undo entry at {pos:#x}: {e}"),
                })?;
            found.push(UndoEntry {
                target,
                len,
                data_pos,
            });
            pos = next;
        }
        Ok(found)
    }

    fn finish<M: PoolMedia>(&mut self, media: &mut M) -> Result<(), PoolError> {
        put_u64_at(media.bytes_mut(), self.offset, LOG_IDLE)?;
        media.flush_range(self.offset, 8)?;
        self.active = false;
        self.covered.clear();
        Ok(())
    }

    fn area_start(&self) -> u64 {
        self.offset + LOG_HEADER_SIZE
    }

    fn check_target(&self, pool_len: u64, start: u64, end: u64) -> Result<(), PoolError> {
        if end > pool_len {
            return Err(PoolError::InvalidReference {
                offset: start,
                reason: format!("range ends at {end:#x}, past pool end {pool_len:#x}"),
            });
        }
        let log = self.span();
        if start < log.end && log.start < end {
            return Err(PoolError::InvalidReference {
                offset: start,
                reason: "range overlaps the undo log".into(),
            });
        }
        Ok(())
    }
}

fn pad8(len: u64) -> u64 {
    (len + 7) & !7
}

fn entry_checksum(target: u64, len: u64, generation: u64, data: &[u8]) -> u64 {
    let mut h = Fnv1a::new();
    h.write_u64(target);
    h.write_u64(len);
    h.write_u64(generation);
    h.write_bytes(data);
    h.finish()
}
