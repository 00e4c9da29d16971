//! Memory-mapped pool files.
//!
//! This is the only module in the crate that contains `unsafe` code:
//! creating a mutable file mapping. Every other module reaches the bytes
//! through the safe slices exposed by [`PoolMedia`].

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use perma_core::PoolError;

/// Byte storage a pool lives in, with durability barriers.
///
/// Implemented by [`MappedRegion`] for real pools and by `Vec<u8>` for
/// in-memory checks and tests, where flushing is a no-op.
pub trait PoolMedia {
    /// The whole pool image.
    fn bytes(&self) -> &[u8];

    /// The whole pool image, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Make `[offset, offset + len)` durable.
    fn flush_range(&mut self, offset: u64, len: u64) -> Result<(), PoolError>;

    /// Make every byte durable.
    fn flush(&mut self) -> Result<(), PoolError>;
}

impl PoolMedia for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }

    fn flush_range(&mut self, _offset: u64, _len: u64) -> Result<(), PoolError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PoolError> {
        Ok(())
    }
}

/// A pool file mapped read-write and locked exclusively.
///
/// The advisory lock is held for the lifetime of the value and released
/// when the file handle closes.
pub struct MappedRegion {
    mmap: MmapMut,
    // Held for the lock; dropped after the mapping.
    _file: File,
    path: PathBuf,
}

impl MappedRegion {
    /// Create a file of `size` bytes at `path` and map it.
    ///
    /// Fails with `AlreadyExists` if the path exists and `force` is false.
    /// With `force`, an existing file is truncated in place after taking
    /// its lock, so a pool that is open elsewhere yields `PoolBusy`.
    pub fn create(path: &Path, size: u64, mode: u32, force: bool) -> Result<Self, PoolError> {
        let (file, locked) = match open_new(path, mode) {
            Ok(file) => (file, false),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !force {
                    return Err(PoolError::AlreadyExists {
                        path: path.to_path_buf(),
                    });
                }
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                lock(&file, path)?;
                file.set_len(0)?;
                set_mode(path, mode)?;
                (file, true)
            }
            Err(e) => return Err(PoolError::Io(e)),
        };
        if !locked {
            lock(&file, path)?;
        }
        file.set_len(size)?;
        Self::map(file, path, size)
    }

    /// Map an existing pool file.
    pub fn open(path: &Path) -> Result<Self, PoolError> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PoolError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(PoolError::Io(e)),
        };
        lock(&file, path)?;
        let len = file.metadata()?.len();
        if len < crate::header::HEADER_SIZE {
            return Err(PoolError::CorruptHeader {
                reason: format!("file is {len} bytes, smaller than the pool header"),
            });
        }
        Self::map(file, path, len)
    }

    fn map(file: File, path: &Path, len: u64) -> Result<Self, PoolError> {
        let len = usize::try_from(len).map_err(|_| PoolError::InvalidConfig {
            reason: format!("pool of {len} bytes cannot be mapped"),
        })?;
        // SAFETY: the file is locked exclusively for as long as the mapping
        // lives, so no cooperating process can resize or write it under us.
        // The mapping is only accessed through `&self`/`&mut self` slices,
        // which ties every borrow to this value.
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self {
            mmap,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Path the pool was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapping length in bytes.
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Whether the mapping is empty. Never true for a valid pool.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Address of the first mapped byte.
    pub fn base_addr(&self) -> usize {
        self.mmap.as_ptr() as usize
    }
}

impl PoolMedia for MappedRegion {
    fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    fn flush_range(&mut self, offset: u64, len: u64) -> Result<(), PoolError> {
        if len == 0 {
            return Ok(());
        }
        let offset = usize::try_from(offset).map_err(|_| PoolError::InvalidReference {
            offset,
            reason: "flush offset overflow".into(),
        })?;
        self.mmap.flush_range(offset, len as usize)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PoolError> {
        self.mmap.flush()?;
        Ok(())
    }
}

fn open_new(path: &Path, mode: u32) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    opts.open(path)
}

fn set_mode(path: &Path, mode: u32) -> Result<(), PoolError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

fn lock(file: &File, path: &Path) -> Result<(), PoolError> {
    file.try_lock_exclusive().map_err(|e| {
        if e.kind() == io::ErrorKind::WouldBlock {
            PoolError::PoolBusy {
                path: path.to_path_buf(),
            }
        } else {
            PoolError::Io(e)
        }
    })
}
