//! Error types for the perma object pool.
//!
//! Organized by subsystem: [`PoolError`] for the durable heap, pool file
//! and persistent references, [`ContainerError`] for fixed-size container
//! access, and [`TxError`] for everything that can end a transaction.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors from pool files, the durable heap and persistent references.
#[derive(Debug)]
pub enum PoolError {
    /// A filesystem or mapping operation failed.
    Io(io::Error),
    /// `create` found an existing file and recreation was not forced.
    AlreadyExists {
        /// The pool path.
        path: PathBuf,
    },
    /// `open` could not find the pool file.
    NotFound {
        /// The pool path.
        path: PathBuf,
    },
    /// The stored layout identifier or root type differs from the expected one.
    LayoutMismatch {
        /// What the caller asked for.
        expected: String,
        /// What the pool header records.
        found: String,
    },
    /// Header, undo log or block chain failed an integrity check.
    CorruptHeader {
        /// Which check failed.
        reason: String,
    },
    /// The requested pool size is below the minimum.
    InsufficientSize {
        /// Requested size in bytes.
        requested: u64,
        /// Minimum accepted size in bytes.
        minimum: u64,
    },
    /// No free block is large enough for the request.
    OutOfMemory {
        /// Requested payload size in bytes.
        requested: u64,
        /// Largest free block payload currently available.
        largest_free: u64,
    },
    /// A heap mutation was attempted outside an active transaction.
    NotInTransaction,
    /// A reference does not name a live object of the expected type.
    InvalidReference {
        /// Offset carried by the reference.
        offset: u64,
        /// Why it was rejected.
        reason: String,
    },
    /// The pool a reference points into is not mapped in this process.
    PoolNotOpen {
        /// Id of the pool the reference belongs to.
        pool_id: u64,
    },
    /// Another handle holds the pool's lock.
    PoolBusy {
        /// The pool path.
        path: PathBuf,
    },
    /// The layout name does not fit the header field.
    LayoutNameTooLong {
        /// Length of the supplied name in bytes.
        len: usize,
        /// Maximum accepted length in bytes.
        max: usize,
    },
    /// The undo log has no room for another pre-image.
    LogFull {
        /// Bytes the new entry needs.
        requested: u64,
        /// Bytes still free in the log.
        available: u64,
    },
    /// The type's alignment exceeds what heap blocks guarantee.
    UnsupportedAlignment {
        /// Alignment of the type.
        align: usize,
        /// Largest supported alignment.
        max: usize,
    },
    /// The calling thread already owns this pool's transaction.
    TransactionActive,
    /// Pool configuration failed validation.
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists { path } => {
                write!(f, "pool already exists: {}", path.display())
            }
            Self::NotFound { path } => write!(f, "pool not found: {}", path.display()),
            Self::LayoutMismatch { expected, found } => {
                write!(f, "layout mismatch: expected {expected}, found {found}")
            }
            Self::CorruptHeader { reason } => write!(f, "corrupt pool: {reason}"),
            Self::InsufficientSize { requested, minimum } => {
                write!(
                    f,
                    "insufficient pool size: requested {requested} bytes, minimum {minimum} bytes"
                )
            }
            Self::OutOfMemory {
                requested,
                largest_free,
            } => {
                write!(
                    f,
                    "out of pool memory: requested {requested} bytes, largest free block {largest_free} bytes"
                )
            }
            Self::NotInTransaction => write!(f, "heap mutation outside a transaction"),
            Self::InvalidReference { offset, reason } => {
                write!(f, "invalid reference at offset {offset:#x}: {reason}")
            }
            Self::PoolNotOpen { pool_id } => write!(f, "pool {pool_id:#018x} is not open"),
            Self::PoolBusy { path } => {
                write!(f, "pool is locked by another handle: {}", path.display())
            }
            Self::LayoutNameTooLong { len, max } => {
                write!(f, "layout name is {len} bytes, maximum is {max}")
            }
            Self::LogFull {
                requested,
                available,
            } => {
                write!(
                    f,
                    "undo log full: entry needs {requested} bytes, {available} bytes free"
                )
            }
            Self::UnsupportedAlignment { align, max } => {
                write!(f, "alignment {align} exceeds supported maximum {max}")
            }
            Self::TransactionActive => {
                write!(f, "this thread already owns the pool's transaction")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid pool config: {reason}"),
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PoolError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors from fixed-size container construction and element access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerError {
    /// An initializer did not have exactly `N` elements.
    SizeMismatch {
        /// The container length.
        expected: usize,
        /// Number of elements supplied.
        found: usize,
    },
    /// Index outside `[0, len)`.
    OutOfRange {
        /// The requested index.
        index: usize,
        /// The container length.
        len: usize,
    },
    /// `front()` or `back()` on a zero-length container.
    EmptyContainer,
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { expected, found } => {
                write!(f, "expected {expected} elements, got {found}")
            }
            Self::OutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Self::EmptyContainer => write!(f, "container is empty"),
        }
    }
}

impl Error for ContainerError {}

/// Errors that end or escape a transaction.
///
/// Bodies passed to `run` return `Result<_, TxError>`. Any error makes the
/// outermost scope roll back and report [`TxError::Aborted`] with the
/// original error as its cause.
#[derive(Debug)]
pub enum TxError {
    /// A heap, pool or reference operation failed.
    Pool(PoolError),
    /// A container access failed.
    Container(ContainerError),
    /// The caller reported a failure from inside the body.
    Failed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// The transaction was rolled back.
    Aborted {
        /// The error that caused the rollback.
        cause: Box<TxError>,
    },
}

impl TxError {
    /// Shorthand for [`TxError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether this is an [`TxError::Aborted`] report.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// The innermost non-`Aborted` error.
    pub fn root_cause(&self) -> &TxError {
        match self {
            Self::Aborted { cause } => cause.root_cause(),
            other => other,
        }
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(e) => write!(f, "{e}"),
            Self::Container(e) => write!(f, "{e}"),
            Self::Failed { reason } => write!(f, "transaction body failed: {reason}"),
            Self::Aborted { cause } => write!(f, "transaction aborted: {cause}"),
        }
    }
}

impl Error for TxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Pool(e) => Some(e),
            Self::Container(e) => Some(e),
            Self::Aborted { cause } => Some(cause.as_ref()),
            Self::Failed { .. } => None,
        }
    }
}

impl From<PoolError> for TxError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

impl From<ContainerError> for TxError {
    fn from(e: ContainerError) -> Self {
        Self::Container(e)
    }
}
