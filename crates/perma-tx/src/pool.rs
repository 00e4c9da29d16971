//! Typed pools.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use perma_core::{PRef, Persistent, PoolError, PoolId, TxError};
use perma_heap::{Heap, HeapStats, ObjectInfo, PoolConfig};
use tracing::{error, info};

use crate::transaction::Transaction;
use crate::view::View;

/// An open pool whose root object has type `R`.
///
/// The root is allocated inside the pool at creation and its type is
/// recorded in the pool; opening the file as a different root type fails
/// with [`PoolError::LayoutMismatch`].
///
/// A `Pool` is `Sync`. Transactions and views are serialized by an
/// internal lock: a thread asking for one blocks until the current one
/// ends. A thread that already holds a transaction or view on this pool
/// gets [`PoolError::TransactionActive`] instead of deadlocking.
pub struct Pool<R: Persistent> {
    heap: Mutex<Heap>,
    owner: Mutex<Option<ThreadId>>,
    root: PRef<R>,
    pool_id: PoolId,
    layout: String,
    path: PathBuf,
}

impl<R: Persistent> Pool<R> {
    /// Create a pool file and allocate its zeroed root object.
    pub fn create(
        path: impl AsRef<Path>,
        layout: &str,
        config: &PoolConfig,
    ) -> Result<Self, PoolError> {
        let path = path.as_ref();
        let mut heap = Heap::create(path, layout, config)?;
        let root = init_root::<R>(&mut heap)?;
        Ok(Self::assemble(heap, root, path))
    }

    /// Open an existing pool file.
    ///
    /// Runs recovery first if the file was left mid-transaction. A pool
    /// whose root was never set gets a zeroed root allocated now.
    pub fn open(path: impl AsRef<Path>, layout: &str) -> Result<Self, PoolError> {
        let path = path.as_ref();
        let mut heap = Heap::open(path, layout)?;
        let root = match heap.root() {
            Some(rec) => {
                let size = mem::size_of::<R>() as u64;
                if rec.tag != R::type_tag() || rec.size != size {
                    return Err(PoolError::LayoutMismatch {
                        expected: format!(
                            "root {} ({} bytes)",
                            std::any::type_name::<R>(),
                            size
                        ),
                        found: format!("root tagged {} ({} bytes)", rec.tag, rec.size),
                    });
                }
                PRef::from_raw(heap.pool_id(), rec.offset, rec.tag)
            }
            None => init_root::<R>(&mut heap)?,
        };
        Ok(Self::assemble(heap, root, path))
    }

    fn assemble(heap: Heap, root: PRef<R>, path: &Path) -> Self {
        Self {
            pool_id: heap.pool_id(),
            layout: heap.layout().to_owned(),
            heap: Mutex::new(heap),
            owner: Mutex::new(None),
            root,
            path: path.to_path_buf(),
        }
    }

    /// Flush and close the pool.
    ///
    /// Dropping a pool closes it too; `close` additionally reports a
    /// failing final flush.
    pub fn close(self) -> Result<(), PoolError> {
        let mut heap = self.heap.into_inner().unwrap_or_else(PoisonError::into_inner);
        heap.flush()?;
        info!(path = %self.path.display(), pool_id = %self.pool_id, "closed pool");
        Ok(())
    }

    /// Reference to the root object.
    pub fn root(&self) -> PRef<R> {
        self.root
    }

    /// The pool's id.
    pub fn id(&self) -> PoolId {
        self.pool_id
    }

    /// Layout name the pool was created with.
    pub fn layout(&self) -> &str {
        &self.layout
    }

    /// Path the pool was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a transaction, blocking while another thread holds one.
    pub fn begin(&self) -> Result<Transaction<'_>, PoolError> {
        let mut lease = self.lease()?;
        lease.begin()?;
        Ok(Transaction::new(lease))
    }

    /// Run `body` in a transaction.
    ///
    /// Commits if `body` returns `Ok`. If it returns `Err`, or a nested
    /// scope inside it failed, every change is rolled back and the result
    /// is [`TxError::Aborted`] carrying the cause. A panic in `body` also
    /// rolls back, while unwinding.
    pub fn run<T, F>(&self, body: F) -> Result<T, TxError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, TxError>,
    {
        let mut tx = self.begin()?;
        match body(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(cause) => {
                if let Err(e) = tx.abort() {
                    error!(pool_id = %self.pool_id, error = %e, "rollback failed");
                    return Err(TxError::Pool(e));
                }
                Err(TxError::Aborted {
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// Read-only access to the pool.
    pub fn view(&self) -> Result<View<'_, R>, PoolError> {
        Ok(View::new(self.lease()?, self.root))
    }

    /// Occupancy figures.
    pub fn stats(&self) -> Result<HeapStats, PoolError> {
        Ok(self.lease()?.stats())
    }

    /// Every allocated object, root included, in address order.
    pub fn objects(&self) -> Result<Vec<ObjectInfo>, PoolError> {
        Ok(self.lease()?.objects().collect())
    }

    fn lease(&self) -> Result<Lease<'_>, PoolError> {
        let me = thread::current().id();
        if *lock(&self.owner) == Some(me) {
            return Err(PoolError::TransactionActive);
        }
        let guard = lock(&self.heap);
        *lock(&self.owner) = Some(me);
        Ok(Lease {
            guard,
            owner: &self.owner,
        })
    }
}

impl<R: Persistent> std::fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("path", &self.path)
            .field("pool_id", &self.pool_id)
            .field("layout", &self.layout)
            .field("root", &self.root)
            .finish()
    }
}

fn init_root<R: Persistent>(heap: &mut Heap) -> Result<PRef<R>, PoolError> {
    heap.begin()?;
    let allocated = heap
        .allocate(
            mem::size_of::<R>() as u64,
            mem::align_of::<R>(),
            R::type_tag(),
        )
        .and_then(|raw| heap.set_root(raw).map(|()| raw));
    match allocated {
        Ok(raw) => {
            heap.commit()?;
            Ok(raw.cast())
        }
        Err(e) => {
            heap.rollback()?;
            Err(e)
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive access to a pool's heap, tagged with the holding thread.
///
/// A panic while a lease is held poisons the heap lock. The poison is
/// ignored on the next acquisition: an active transaction rolls back in
/// its own `Drop` during unwinding, so the heap is consistent again by
/// the time the lock is released.
pub(crate) struct Lease<'p> {
    guard: MutexGuard<'p, Heap>,
    owner: &'p Mutex<Option<ThreadId>>,
}

impl Deref for Lease<'_> {
    type Target = Heap;

    fn deref(&self) -> &Heap {
        &self.guard
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut Heap {
        &mut self.guard
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        // Cleared before the guard is released, so the next holder's
        // claim cannot be overwritten.
        *lock(self.owner) = None;
    }
}
