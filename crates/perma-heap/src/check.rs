//! Offline consistency check.
//!
//! Reads a pool file into memory and verifies it without modifying the
//! file. If the undo log is active, recovery is replayed on the in-memory
//! copy first, so the report describes the pool as the next open would
//! see it.

use std::io;
use std::path::Path;

use perma_core::{PoolError, PoolId};
use tracing::debug;

use crate::block::{self, BlockState, BLOCK_HEADER_SIZE};
use crate::header::{PoolHeader, RootRecord, ROOT_RECORD_BYTES, ROOT_RECORD_OFFSET};
use crate::log::UndoLog;

/// Result of [`check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckReport {
    /// Id stored in the header.
    pub pool_id: PoolId,
    /// Layout stored in the header.
    pub layout: String,
    /// Whether the file was left mid-transaction.
    pub needs_recovery: bool,
    /// Pre-images recovery would restore.
    pub pending_entries: u64,
    /// Blocks in the chain.
    pub blocks: usize,
    /// Allocated blocks.
    pub live_objects: usize,
    /// Bytes in free blocks, headers included.
    pub free_bytes: u64,
    /// Payload offset of the root object, if set.
    pub root_offset: Option<u64>,
    /// Problems found. Empty for a consistent pool.
    pub problems: Vec<String>,
}

impl CheckReport {
    /// Whether no problems were found.
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Check the pool at `path` against `layout`.
///
/// Fails outright if the file is missing, the static header is invalid or
/// the layout does not match. Damage past the header is reported in
/// [`CheckReport::problems`].
pub fn check(path: &Path, layout: &str) -> Result<CheckReport, PoolError> {
    let mut image = std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PoolError::NotFound {
            path: path.to_path_buf(),
        },
        _ => PoolError::Io(e),
    })?;
    let header = PoolHeader::decode(&image)?;
    header.validate_geometry(image.len() as u64)?;
    header.check_layout(layout)?;

    let mut report = CheckReport {
        pool_id: header.pool_id,
        layout: header.layout.clone(),
        needs_recovery: false,
        pending_entries: 0,
        blocks: 0,
        live_objects: 0,
        free_bytes: 0,
        root_offset: None,
        problems: Vec::new(),
    };

    match UndoLog::load(&image, header.log_offset, header.log_capacity) {
        Ok(mut log) => {
            if log.is_active() {
                report.needs_recovery = true;
                match log.rollback(&mut image) {
                    Ok(n) => report.pending_entries = n,
                    Err(e) => report.problems.push(format!("undo log replay failed: {e}")),
                }
            }
        }
        Err(e) => report.problems.push(format!("undo log unreadable: {e}")),
    }

    let mut live = Vec::new();
    match block::walk(&image, header.heap_offset, header.heap_end()) {
        Ok(blocks) => {
            report.blocks = blocks.len();
            for (pos, b) in blocks {
                match b.state {
                    BlockState::Free => report.free_bytes += b.size,
                    BlockState::Used => {
                        report.live_objects += 1;
                        live.push((pos + BLOCK_HEADER_SIZE, b.type_tag));
                    }
                }
            }
        }
        Err(e) => report.problems.push(format!("block chain broken: {e}")),
    }

    let slot = ROOT_RECORD_OFFSET as usize..(ROOT_RECORD_OFFSET + ROOT_RECORD_BYTES) as usize;
    match RootRecord::decode(&image[slot]) {
        Ok(Some(root)) => {
            report.root_offset = Some(root.offset);
            if !live.iter().any(|&(off, tag)| off == root.offset && tag == root.tag) {
                report
                    .problems
                    .push(format!("root record names no live object at {:#x}", root.offset));
            }
        }
        Ok(None) => {}
        Err(e) => report.problems.push(format!("root record unreadable: {e}")),
    }

    debug!(
        path = %path.display(),
        problems = report.problems.len(),
        "checked pool"
    );
    Ok(report)
}
