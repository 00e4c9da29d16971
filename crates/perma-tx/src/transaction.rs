//! Scoped transactions.

use std::mem;

use perma_core::{PRef, Persistent, PoolError, PoolId, TxError};
use perma_heap::HeapStats;
use tracing::{debug, error, warn};

use crate::pool::Lease;

/// Lifecycle of a [`Transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Not started. Never observed on a live `Transaction`.
    Idle,
    /// Accepting mutations.
    Active,
    /// Changes are durable.
    Committed,
    /// Changes were rolled back.
    Aborted,
}

/// An active transaction on a pool.
///
/// Every mutation made through it is recorded in the pool's undo log
/// before it is applied. [`commit`](Self::commit) makes them durable;
/// [`abort`](Self::abort), or dropping the transaction while active,
/// undoes them.
///
/// Holds the pool's lock: no other transaction or view of the pool can
/// exist until this one ends.
pub struct Transaction<'p> {
    lease: Lease<'p>,
    state: TxState,
    depth: u32,
    doomed: Option<String>,
}

impl<'p> Transaction<'p> {
    pub(crate) fn new(lease: Lease<'p>) -> Self {
        Self {
            lease,
            state: TxState::Active,
            depth: 0,
            doomed: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Number of enclosing [`run`](Self::run) scopes; 0 at the outermost.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether a nested scope has failed, forcing rollback at commit.
    pub fn is_doomed(&self) -> bool {
        self.doomed.is_some()
    }

    /// Id of the pool this transaction runs against.
    pub fn pool_id(&self) -> PoolId {
        self.lease.pool_id()
    }

    /// Run `body` as a nested scope of this transaction.
    ///
    /// The scope shares this transaction's undo log: nothing is committed
    /// or rolled back when it ends. If `body` fails, the error is returned
    /// and the whole transaction is doomed, so the outermost commit rolls
    /// back even if the caller swallows the error.
    pub fn run<T, F>(&mut self, body: F) -> Result<T, TxError>
    where
        F: FnOnce(&mut Self) -> Result<T, TxError>,
    {
        self.depth += 1;
        let result = body(self);
        self.depth -= 1;
        if let Err(e) = &result {
            if self.doomed.is_none() {
                debug!(depth = self.depth + 1, error = %e, "nested scope failed, dooming transaction");
                self.doomed = Some(format!("nested scope failed: {e}"));
            }
        }
        result
    }

    /// Commit, making every change durable.
    ///
    /// If a nested scope failed, rolls back instead and returns
    /// [`TxError::Aborted`].
    pub fn commit(mut self) -> Result<(), TxError> {
        if let Some(reason) = self.doomed.take() {
            self.lease.rollback()?;
            self.state = TxState::Aborted;
            return Err(TxError::Aborted {
                cause: Box::new(TxError::Failed { reason }),
            });
        }
        self.lease.commit()?;
        self.state = TxState::Committed;
        Ok(())
    }

    /// Roll back every change made in this transaction.
    pub fn abort(mut self) -> Result<(), PoolError> {
        self.lease.rollback()?;
        self.state = TxState::Aborted;
        Ok(())
    }

    // ── Objects ─────────────────────────────────────────────────

    /// Allocate a new object holding `value`.
    pub fn alloc<T: Persistent>(&mut self, value: T) -> Result<PRef<T>, TxError> {
        let r = self.alloc_zeroed::<T>()?;
        *self.lease.object_mut(r)? = value;
        Ok(r)
    }

    /// Allocate a new all-zero object.
    pub fn alloc_zeroed<T: Persistent>(&mut self) -> Result<PRef<T>, TxError> {
        let raw = self.lease.allocate(
            mem::size_of::<T>() as u64,
            mem::align_of::<T>(),
            T::type_tag(),
        )?;
        Ok(raw.cast())
    }

    /// Free an object. The space is reusable after commit.
    pub fn free<T: Persistent>(&mut self, r: PRef<T>) -> Result<(), TxError> {
        // Type-checks the reference before releasing it.
        self.lease.object(r)?;
        self.lease.free(r.erase())?;
        Ok(())
    }

    /// Shared reference to an object.
    pub fn get<T: Persistent>(&self, r: PRef<T>) -> Result<&T, TxError> {
        Ok(self.lease.object(r)?)
    }

    /// Mutable reference to an object; the whole object is snapshotted.
    pub fn get_mut<T: Persistent>(&mut self, r: PRef<T>) -> Result<&mut T, TxError> {
        Ok(self.lease.object_mut(r)?)
    }

    /// Overwrite an object.
    pub fn set<T: Persistent>(&mut self, r: PRef<T>, value: T) -> Result<(), TxError> {
        *self.get_mut(r)? = value;
        Ok(())
    }

    /// Snapshot `len` bytes at `offset` inside an object, ahead of writes
    /// made through a reference obtained without a snapshot.
    pub fn add_range<T: Persistent>(
        &mut self,
        r: PRef<T>,
        offset: usize,
        len: usize,
    ) -> Result<(), TxError> {
        self.lease
            .add_range(r.erase(), offset as u64, len as u64)?;
        Ok(())
    }

    /// Shared reference to the `F` at `byte_offset` inside `*r`.
    pub fn field<T: Persistent, F: Persistent>(
        &self,
        r: PRef<T>,
        byte_offset: usize,
    ) -> Result<&F, TxError> {
        Ok(self.lease.field::<T, F>(r, byte_offset as u64)?)
    }

    /// Mutable reference to the `F` at `byte_offset` inside `*r`.
    ///
    /// Only the field's bytes are snapshotted, which keeps the undo log
    /// small when a large object is updated piecemeal.
    pub fn field_mut<T: Persistent, F: Persistent>(
        &mut self,
        r: PRef<T>,
        byte_offset: usize,
    ) -> Result<&mut F, TxError> {
        Ok(self.lease.field_mut::<T, F>(r, byte_offset as u64)?)
    }

    /// Occupancy figures, including this transaction's allocations.
    pub fn stats(&self) -> HeapStats {
        self.lease.stats()
    }

    /// Undo-log bytes left for this transaction.
    pub fn log_available(&self) -> u64 {
        self.lease.log_available()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TxState::Active {
            return;
        }
        match self.lease.rollback() {
            Ok(restored) => {
                warn!(
                    pool_id = %self.lease.pool_id(),
                    restored,
                    "transaction dropped while active, rolled back"
                );
            }
            Err(e) => {
                error!(
                    pool_id = %self.lease.pool_id(),
                    error = %e,
                    "rollback of dropped transaction failed; recovery will run on next open"
                );
            }
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("pool_id", &self.lease.pool_id())
            .field("state", &self.state)
            .field("depth", &self.depth)
            .field("doomed", &self.doomed)
            .finish()
    }
}
