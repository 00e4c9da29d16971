//! Indexing, front/back and view constness of pool-resident arrays.

use perma_array::{ArrayRef, PArray, TxArrayExt, ViewArrayExt};
use perma_core::{ContainerError, PRef, PoolError, TxError};
use perma_test_utils::fixtures::{self, IndexingRoot, INDEXING_LAYOUT, INITIAL};
use perma_test_utils::{simulate_crash, TempPool};
use perma_tx::Pool;
use proptest::prelude::*;

fn populated(tp: &TempPool) -> Pool<IndexingRoot> {
    let pool = tp.create::<IndexingRoot>(INDEXING_LAYOUT).unwrap();
    let root = pool.root();
    pool.run(|tx| fixtures::populate(tx, root)).unwrap();
    pool
}

// Compiles only if every accessor on a read-only view yields `&T`.
fn read_only_accessors<T, const N: usize>(
    a: ArrayRef<'_, T, N>,
) -> [Result<&T, ContainerError>; 3] {
    [a.at(0), a.front(), a.back()]
}

// ── The four indexing cases ─────────────────────────────────────

#[test]
fn mutable_array_writes_through_index() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();

    pool.run(|tx| {
        let arr = tx.get(root)?.mutable;
        let mut view = tx.array_mut(arr)?;

        let r1: &mut f64 = view.at_mut(0)?;
        assert_eq!(*r1, 1.0);
        *r1 = 5.5;
        assert_eq!(*view.front()?, 5.5);

        let r2: &mut f64 = &mut view[2];
        assert_eq!(*r2, 3.5);
        *r2 = 7.5;
        assert_eq!(*view.back()?, 7.5);
        Ok(())
    })
    .unwrap();

    let view = pool.view().unwrap();
    let arr = view.array(view.root().unwrap().mutable).unwrap();
    assert_eq!(arr.as_slice(), &[5.5, 2.0, 7.5]);
}

#[test]
fn read_only_array_yields_shared_references() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();

    pool.run(|tx| {
        let arr: ArrayRef<'_, f64, 3> = tx.array(tx.get(root)?.constant)?;
        let r1: &f64 = &arr[0];
        assert_eq!(*r1, 1.0);
        let r2: &f64 = arr.at(2)?;
        assert_eq!(*r2, 3.5);
        Ok(())
    })
    .unwrap();

    let view = pool.view().unwrap();
    let arr = view.array(view.root().unwrap().constant).unwrap();
    let [at, front, back] = read_only_accessors(arr);
    assert_eq!((*at.unwrap(), *front.unwrap(), *back.unwrap()), (1.0, 1.0, 3.5));
}

#[test]
fn zero_length_array_rejects_every_index() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();

    pool.run(|tx| {
        let arr = tx.get(root)?.empty;
        let mut view = tx.array_mut(arr)?;
        assert_eq!(view.size(), 0);
        if view.size() > 0 {
            let _r1: &mut f64 = view.at_mut(0)?;
        }
        assert!(matches!(
            view.at_mut(0),
            Err(TxError::Container(ContainerError::OutOfRange { index: 0, len: 0 }))
        ));
        assert!(matches!(
            view.front_mut(),
            Err(TxError::Container(ContainerError::EmptyContainer))
        ));
        assert!(matches!(
            view.back(),
            Err(TxError::Container(ContainerError::EmptyContainer))
        ));
        view.fill(9.0)?;
        Ok(())
    })
    .unwrap();

    let view = pool.view().unwrap();
    let arr: ArrayRef<'_, f64, 0> = view.array(view.root().unwrap().empty).unwrap();
    assert_eq!(arr.size(), 0);
    let [at, front, back] = read_only_accessors(arr);
    assert_eq!(at, Err(ContainerError::OutOfRange { index: 0, len: 0 }));
    assert_eq!(front, Err(ContainerError::EmptyContainer));
    assert_eq!(back, Err(ContainerError::EmptyContainer));
}

#[test]
fn zero_length_read_only_array_is_read_only() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);

    let view = pool.view().unwrap();
    let arr = view.array(view.root().unwrap().empty_const).unwrap();
    let shared: Result<&f64, ContainerError> = arr.at(0);
    assert!(shared.is_err());
    assert!(arr.is_empty());
    assert_eq!(arr.iter().count(), 0);
}

#[test]
#[should_panic(expected = "index out of bounds")]
fn indexing_past_the_end_panics() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();
    let _ = pool.run(|tx| {
        let arr = tx.get(root)?.mutable;
        let view = tx.array_mut(arr)?;
        let past_end: f64 = view[3];
        assert!(past_end.is_nan());
        Ok(())
    });
}

// ── Durability ──────────────────────────────────────────────────

#[test]
fn updated_ends_survive_reopen() {
    let tp = TempPool::new("scenario.pool").unwrap();
    let pool = tp.create::<PRef<PArray<f64, 3>>>("scenario").unwrap();
    let root = pool.root();

    pool.run(|tx| {
        let arr = tx.alloc_array([1.0, 2.0, 3.5])?;
        tx.set(root, arr)
    })
    .unwrap();
    pool.run(|tx| {
        let arr = *tx.get(root)?;
        let mut view = tx.array_mut(arr)?;
        view.set(0, 5.5)?;
        view.set(2, 7.5)?;
        Ok(())
    })
    .unwrap();
    pool.close().unwrap();

    let pool = tp.open::<PRef<PArray<f64, 3>>>("scenario").unwrap();
    let view = pool.view().unwrap();
    let arr = view.array(*view.root().unwrap()).unwrap();
    assert_eq!(*arr.front().unwrap(), 5.5);
    assert_eq!(*arr.back().unwrap(), 7.5);
    assert_eq!(arr[1], 2.0);
}

#[test]
fn failed_transaction_restores_elements() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();

    let err = pool
        .run(|tx| {
            let arr = tx.get(root)?.mutable;
            let mut view = tx.array_mut(arr)?;
            view.set(1, -1.0)?;
            view.swap(0, 2)?;
            view.at(7)?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        TxError::Container(ContainerError::OutOfRange { index: 7, len: 3 })
    ));

    let view = pool.view().unwrap();
    let arr = view.array(view.root().unwrap().mutable).unwrap();
    assert_eq!(arr.into_inner(), INITIAL);
}

#[test]
fn crash_before_commit_leaves_no_trace() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();
    let before = pool.stats().unwrap();

    simulate_crash(pool, |tx| {
        let r = *tx.get(root)?;
        tx.array_mut(r.mutable)?.fill(0.25)?;
        tx.array_mut(r.constant)?.set(1, 8.0)?;
        tx.alloc_array([4u32; 16])?;
        Ok(())
    })
    .unwrap();

    let pool = tp.open::<IndexingRoot>(INDEXING_LAYOUT).unwrap();
    assert_eq!(pool.stats().unwrap(), before);
    let view = pool.view().unwrap();
    let r = view.root().unwrap();
    assert_eq!(view.array(r.mutable).unwrap().into_inner(), INITIAL);
    assert_eq!(view.array(r.constant).unwrap().into_inner(), INITIAL);
}

// ── Write barrier ───────────────────────────────────────────────

#[test]
fn element_writes_log_only_the_element() {
    let tp = TempPool::new("big.pool").unwrap();
    let pool = tp.create::<PRef<PArray<u64, 16384>>>("big").unwrap();
    let root = pool.root();
    pool.run(|tx| {
        let arr = tx.alloc_zeroed::<PArray<u64, 16384>>()?;
        tx.set(root, arr)
    })
    .unwrap();

    // The array is twice the log capacity; only element writes fit.
    pool.run(|tx| {
        let arr = *tx.get(root)?;
        let before = tx.log_available();
        let mut view = tx.array_mut(arr)?;
        view.set(100, 7)?;
        view.set(16383, 9)?;
        *view.front_mut()? = 1;
        assert!(before - tx.log_available() < 256);
        Ok(())
    })
    .unwrap();

    let err = pool
        .run(|tx| {
            let arr = *tx.get(root)?;
            tx.array_mut(arr)?.fill(3)
        })
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        TxError::Pool(PoolError::LogFull { .. })
    ));

    let view = pool.view().unwrap();
    let arr = view.array(*view.root().unwrap()).unwrap();
    assert_eq!((arr[0], arr[100], arr[16383], arr[1]), (1, 7, 9, 0));
}

#[test]
fn swap_and_fill_commit() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();

    pool.run(|tx| {
        let r = *tx.get(root)?;
        let mut view = tx.array_mut(r.mutable)?;
        view.swap(0, 2)?;
        view.swap(1, 1)?;
        assert_eq!(view.to_array()?, [3.5, 2.0, 1.0]);
        tx.array_mut(r.constant)?.fill(0.5)?;
        Ok(())
    })
    .unwrap();

    let view = pool.view().unwrap();
    let r = view.root().unwrap();
    assert_eq!(view.array(r.mutable).unwrap().into_inner(), [3.5, 2.0, 1.0]);
    assert!(view.array(r.constant).unwrap().iter().all(|&v| v == 0.5));
}

#[test]
fn wrong_length_reference_is_rejected() {
    let tp = TempPool::new("indexing.pool").unwrap();
    let pool = populated(&tp);
    let root = pool.root();
    let err = pool
        .run(|tx| {
            let arr = tx.get(root)?.mutable.cast::<PArray<f64, 4>>();
            tx.array_mut(arr)?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        TxError::Pool(PoolError::InvalidReference { .. })
    ));
}

// ── Properties ──────────────────────────────────────────────────

fn write_then_reopen<const N: usize>(index: usize, value: f64) -> Result<f64, TxError> {
    let tp = TempPool::new("prop.pool").map_err(PoolError::from)?;
    let pool = tp.create::<PRef<PArray<f64, N>>>("prop")?;
    let root = pool.root();
    pool.run(|tx| {
        let arr = tx.alloc_zeroed::<PArray<f64, N>>()?;
        tx.set(root, arr)
    })?;
    pool.run(|tx| {
        let arr = *tx.get(root)?;
        tx.array_mut(arr)?.set(index, value)
    })?;
    pool.close()?;

    let pool = tp.open::<PRef<PArray<f64, N>>>("prop")?;
    let view = pool.view()?;
    let arr = view.array(*view.root()?)?;
    Ok(*arr.at(index)?)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn written_element_survives_reopen(
        seed in any::<usize>(),
        value in -1.0e9f64..1.0e9,
    ) {
        prop_assert_eq!(write_then_reopen::<1>(seed % 1, value).unwrap(), value);
        prop_assert_eq!(write_then_reopen::<5>(seed % 5, value).unwrap(), value);
        prop_assert_eq!(write_then_reopen::<64>(seed % 64, value).unwrap(), value);
    }
}
