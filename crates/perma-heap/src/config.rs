//! Pool creation parameters.

use perma_core::PoolError;

use crate::header::HEADER_SIZE;

/// Parameters for creating a pool file.
///
/// The file is laid out as a 4 KiB header page, then the undo log
/// (`log_capacity` bytes), then the heap, which takes the rest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Total file size in bytes. Must be at least [`PoolConfig::MIN_POOL_SIZE`].
    pub size: u64,
    /// Bytes reserved for undo-log pre-images. Bounds how much one
    /// transaction can modify. Must be a multiple of 4096.
    pub log_capacity: u64,
    /// Unix permission bits for a newly created file.
    pub mode: u32,
    /// Overwrite an existing file at the path instead of failing.
    pub force_recreate: bool,
}

impl PoolConfig {
    /// Smallest accepted pool file.
    pub const MIN_POOL_SIZE: u64 = 8 * 1024 * 1024;
    /// Default undo-log capacity.
    pub const DEFAULT_LOG_CAPACITY: u64 = 256 * 1024;
    /// Smallest accepted undo-log capacity, and its granularity.
    pub const LOG_GRANULE: u64 = 4096;
    /// Smallest heap that must remain after the header and log.
    pub const MIN_HEAP_SIZE: u64 = 64 * 1024;
    /// Default permission bits: owner read/write.
    pub const DEFAULT_MODE: u32 = 0o600;

    /// A config for a pool of `size` bytes with default log and mode.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Set the undo-log capacity.
    pub fn with_log_capacity(mut self, log_capacity: u64) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    /// Set the permission bits of the created file.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Replace an existing file at the path on create.
    pub fn force_recreate(mut self, force: bool) -> Self {
        self.force_recreate = force;
        self
    }

    /// Offset of the first heap block.
    pub fn heap_offset(&self) -> u64 {
        HEADER_SIZE + self.log_capacity
    }

    /// Validate all parameters.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.size < Self::MIN_POOL_SIZE {
            return Err(PoolError::InsufficientSize {
                requested: self.size,
                minimum: Self::MIN_POOL_SIZE,
            });
        }
        if usize::try_from(self.size).is_err() {
            return Err(PoolError::InvalidConfig {
                reason: format!("size {} exceeds the address space", self.size),
            });
        }
        if self.log_capacity < Self::LOG_GRANULE || self.log_capacity % Self::LOG_GRANULE != 0 {
            return Err(PoolError::InvalidConfig {
                reason: format!(
                    "log_capacity must be a non-zero multiple of {}, got {}",
                    Self::LOG_GRANULE,
                    self.log_capacity
                ),
            });
        }
        let minimum = self.heap_offset().saturating_add(Self::MIN_HEAP_SIZE);
        if self.size < minimum {
            return Err(PoolError::InsufficientSize {
                requested: self.size,
                minimum,
            });
        }
        if self.mode & !0o7777 != 0 {
            return Err(PoolError::InvalidConfig {
                reason: format!("mode {:#o} has bits outside 0o7777", self.mode),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: Self::MIN_POOL_SIZE,
            log_capacity: Self::DEFAULT_LOG_CAPACITY,
            mode: Self::DEFAULT_MODE,
            force_recreate: false,
        }
    }
}
