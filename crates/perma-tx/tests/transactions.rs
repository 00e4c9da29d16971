//! Transaction semantics against real pool files.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use bytemuck::{Pod, Zeroable};
use perma_core::{PRef, PoolError, TxError};
use perma_heap::PoolConfig;
use perma_tx::{Pool, TxState};
use proptest::prelude::*;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Ledger {
    balance: u64,
    entries: u64,
    last: PRef<u64>,
}

const LAYOUT: &str = "ledger";

fn config() -> PoolConfig {
    PoolConfig::default().with_log_capacity(64 * 1024)
}

fn create(dir: &tempfile::TempDir) -> Pool<Ledger> {
    Pool::create(dir.path().join("ledger.pool"), LAYOUT, &config()).unwrap()
}

fn reopen(dir: &tempfile::TempDir) -> Pool<Ledger> {
    Pool::open(dir.path().join("ledger.pool"), LAYOUT).unwrap()
}

#[test]
fn root_starts_zeroed() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let view = pool.view().unwrap();
    let root = view.root().unwrap();
    assert_eq!(root.balance, 0);
    assert!(root.last.is_null());
}

#[test]
fn committed_changes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    pool.run(|tx| {
        let note = tx.alloc(42u64)?;
        let ledger = tx.get_mut(root)?;
        ledger.balance = 100;
        ledger.entries = 1;
        ledger.last = note;
        Ok(())
    })
    .unwrap();
    pool.close().unwrap();

    let pool = reopen(&dir);
    let view = pool.view().unwrap();
    let ledger = view.root().unwrap();
    assert_eq!(ledger.balance, 100);
    assert_eq!(*view.get(ledger.last).unwrap(), 42);
}

#[test]
fn failed_body_rolls_back_and_reports_cause() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    let before = pool.stats().unwrap();

    let err = pool
        .run(|tx| {
            tx.get_mut(root)?.balance = 999;
            tx.alloc([7u64; 16])?;
            Err::<(), _>(TxError::failed("insufficient funds"))
        })
        .unwrap_err();

    assert!(err.is_aborted());
    assert!(matches!(err.root_cause(), TxError::Failed { reason } if reason == "insufficient funds"));
    assert_eq!(pool.view().unwrap().root().unwrap().balance, 0);
    assert_eq!(pool.stats().unwrap(), before);
}

#[test]
fn nested_scopes_share_the_outer_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    pool.run(|tx| {
        tx.get_mut(root)?.balance = 1;
        tx.run(|inner| {
            assert_eq!(inner.depth(), 1);
            inner.get_mut(root)?.entries = 2;
            Ok(())
        })?;
        assert_eq!(tx.depth(), 0);
        Ok(())
    })
    .unwrap();
    let view = pool.view().unwrap();
    assert_eq!(view.root().unwrap().balance, 1);
    assert_eq!(view.root().unwrap().entries, 2);
}

#[test]
fn swallowed_nested_failure_still_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    let err = pool
        .run(|tx| {
            tx.get_mut(root)?.balance = 5;
            let inner = tx.run(|inner| {
                inner.get_mut(root)?.entries = 9;
                Err::<(), _>(TxError::failed("inner"))
            });
            assert!(inner.is_err());
            assert!(tx.is_doomed());
            Ok(())
        })
        .unwrap_err();
    assert!(err.is_aborted());
    let view = pool.view().unwrap();
    assert_eq!(view.root().unwrap().balance, 0);
    assert_eq!(view.root().unwrap().entries, 0);
}

#[test]
fn explicit_begin_commit_and_abort() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();

    let mut tx = pool.begin().unwrap();
    assert_eq!(tx.state(), TxState::Active);
    tx.get_mut(root).unwrap().balance = 10;
    tx.commit().unwrap();

    let mut tx = pool.begin().unwrap();
    tx.get_mut(root).unwrap().balance = 20;
    tx.abort().unwrap();

    assert_eq!(pool.view().unwrap().root().unwrap().balance, 10);
}

#[test]
fn dropping_active_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    {
        let mut tx = pool.begin().unwrap();
        tx.get_mut(root).unwrap().balance = 77;
    }
    assert_eq!(pool.view().unwrap().root().unwrap().balance, 0);
}

#[test]
fn panic_in_body_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = pool.run(|tx| -> Result<(), TxError> {
            tx.get_mut(root)?.balance = 13;
            panic!("body exploded");
        });
    }));
    assert!(outcome.is_err());
    assert_eq!(pool.view().unwrap().root().unwrap().balance, 0);
}

#[test]
fn same_thread_reentry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let tx = pool.begin().unwrap();
    assert!(matches!(pool.begin(), Err(PoolError::TransactionActive)));
    assert!(matches!(pool.view(), Err(PoolError::TransactionActive)));
    let err = pool.run(|_| Ok(())).unwrap_err();
    assert!(matches!(err, TxError::Pool(PoolError::TransactionActive)));
    tx.commit().unwrap();
    assert!(pool.view().is_ok());
}

#[test]
fn crash_mid_transaction_is_recovered_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    pool.run(|tx| {
        tx.get_mut(root)?.balance = 1;
        Ok(())
    })
    .unwrap();
    {
        let mut tx = pool.begin().unwrap();
        tx.get_mut(root).unwrap().balance = 2;
        let note = tx.alloc(5u64).unwrap();
        tx.get_mut(root).unwrap().last = note;
        std::mem::forget(tx);
    }
    drop(pool);

    let pool = reopen(&dir);
    let view = pool.view().unwrap();
    let ledger = view.root().unwrap();
    assert_eq!(ledger.balance, 1);
    assert!(ledger.last.is_null());
    assert_eq!(view.stats().live_objects, 1);
}

#[test]
fn wrong_root_type_is_a_layout_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    create(&dir).close().unwrap();
    let err = Pool::<[u8; 7]>::open(dir.path().join("ledger.pool"), LAYOUT).unwrap_err();
    assert!(matches!(err, PoolError::LayoutMismatch { .. }));
}

#[test]
fn freed_object_is_no_longer_readable() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let note = pool.run(|tx| tx.alloc(3u64)).unwrap();
    pool.run(|tx| tx.free(note)).unwrap();
    let view = pool.view().unwrap();
    assert!(matches!(
        view.get(note),
        Err(PoolError::InvalidReference { .. })
    ));
}

#[test]
fn field_mut_updates_one_member() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let root = pool.root();
    pool.run(|tx| {
        *tx.field_mut::<Ledger, u64>(root, 8)? = 4;
        Ok(())
    })
    .unwrap();
    let view = pool.view().unwrap();
    assert_eq!(view.root().unwrap().entries, 4);
    assert_eq!(*view.field::<Ledger, u64>(root, 8).unwrap(), 4);
}

#[test]
fn log_overflow_aborts_the_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create(&dir);
    let big = pool.run(|tx| tx.alloc_zeroed::<[u64; 16384]>()).unwrap();
    let err = pool
        .run(|tx| {
            tx.get_mut(big)?[0] = 1;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        TxError::Pool(PoolError::LogFull { .. })
    ));
}

#[test]
fn threads_serialize_on_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(create(&dir));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..25 {
                    let root = pool.root();
                    pool.run(|tx| {
                        tx.get_mut(root)?.balance += 1;
                        Ok(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(pool.view().unwrap().root().unwrap().balance, 100);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn committed_balances_match_model(
        ops in prop::collection::vec((any::<u32>(), any::<bool>()), 1..12)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create(&dir);
        let root = pool.root();
        let mut model = 0u64;
        for (amount, commit) in ops {
            let result = pool.run(|tx| {
                tx.get_mut(root)?.balance += u64::from(amount);
                if commit { Ok(()) } else { Err(TxError::failed("rejected")) }
            });
            if commit {
                prop_assert!(result.is_ok());
                model += u64::from(amount);
            } else {
                prop_assert!(result.is_err());
            }
        }
        pool.close().unwrap();
        let pool = reopen(&dir);
        prop_assert_eq!(pool.view().unwrap().root().unwrap().balance, model);
    }
}
