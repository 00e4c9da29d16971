//! Allocator invariants under random transaction sequences.

use perma_core::{RawRef, TypeTag};
use perma_heap::{check, Heap, HeapStats, PoolConfig};
use proptest::prelude::*;

const LAYOUT: &str = "heap.props";

#[derive(Clone, Debug)]
enum Op {
    Alloc(u64),
    /// Index into the objects live at that point, modulo their count.
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..2048).prop_map(Op::Alloc),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn config() -> PoolConfig {
    PoolConfig::default().with_log_capacity(64 * 1024)
}

fn offsets(heap: &Heap) -> Vec<u64> {
    heap.objects().map(|o| o.reference.offset()).collect()
}

fn tiles(stats: &HeapStats) -> bool {
    stats.used_bytes + stats.free_bytes == stats.heap_size
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn blocks_tile_the_heap_across_commits_and_rollbacks(
        txs in prop::collection::vec((prop::collection::vec(op(), 1..12), any::<bool>()), 1..8)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.pool");
        let mut heap = Heap::create(&path, LAYOUT, &config()).unwrap();
        let mut live: Vec<RawRef> = Vec::new();

        for (ops, commit) in txs {
            let before = heap.stats();
            let before_objects = offsets(&heap);
            let mut pending = live.clone();

            heap.begin().unwrap();
            for op in ops {
                match op {
                    Op::Alloc(size) => {
                        pending.push(heap.allocate(size, 8, TypeTag(7)).unwrap());
                    }
                    Op::Free(i) if !pending.is_empty() => {
                        let victim = pending.swap_remove(i % pending.len());
                        heap.free(victim).unwrap();
                    }
                    Op::Free(_) => {}
                }
            }

            if commit {
                heap.commit().unwrap();
                live = pending;
            } else {
                heap.rollback().unwrap();
                prop_assert_eq!(heap.stats(), before);
                prop_assert_eq!(offsets(&heap), before_objects);
            }

            let stats = heap.stats();
            prop_assert!(tiles(&stats), "{:?}", stats);
            prop_assert_eq!(stats.live_objects, live.len());
            let mut expected: Vec<u64> = live.iter().map(|r| r.offset()).collect();
            expected.sort_unstable();
            prop_assert_eq!(offsets(&heap), expected);
        }

        let last = heap.stats();
        drop(heap);

        let report = check(&path, LAYOUT).unwrap();
        prop_assert!(report.is_consistent(), "problems: {:?}", report.problems);
        prop_assert!(!report.needs_recovery);
        prop_assert_eq!(report.live_objects, last.live_objects);
        prop_assert_eq!(report.free_bytes, last.free_bytes);
        prop_assert_eq!(report.blocks, last.live_objects + last.free_blocks);

        let heap = Heap::open(&path, LAYOUT).unwrap();
        prop_assert_eq!(heap.stats(), last);
    }
}
