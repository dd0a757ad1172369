//! Property-based tests for allocator correctness
//!
//! Uses proptest to verify allocator invariants hold across many random
//! operation sequences.

use blockmap::{AllocatorConfig, BitAllocator, Extent, ExtentList};
use proptest::prelude::*;
use std::collections::HashSet;

/// A small geometry so random sequences exercise zone boundaries and
/// wrap-around quickly.
fn small_allocator(total: i64) -> BitAllocator {
    BitAllocator::new(
        AllocatorConfig::new(total)
            .with_zone_size(64)
            .with_span_size(4),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn prop_no_double_allocation(
        requests in prop::collection::vec(1i64..100, 1..30)
    ) {
        let alloc = small_allocator(2048);
        let mut issued = HashSet::new();

        for num in requests {
            let mut sink = ExtentList::unbounded();
            let got = alloc.allocate_reserved(num, 1, 0, &mut sink);
            prop_assert!(got <= num);
            prop_assert_eq!(got, sink.total_blocks());

            for extent in sink.extents() {
                for block in extent.start..extent.end() {
                    prop_assert!(
                        issued.insert(block),
                        "block {} issued twice", block
                    );
                }
            }
        }
        prop_assert_eq!(alloc.used_blocks() as usize, issued.len());
    }

    #[test]
    fn prop_used_matches_outstanding(
        ops in prop::collection::vec((1i64..80, any::<bool>()), 1..40)
    ) {
        let alloc = small_allocator(1024);
        let mut outstanding: Vec<Extent> = Vec::new();

        for (num, free_one) in ops {
            if free_one && !outstanding.is_empty() {
                let extent = outstanding.swap_remove(0);
                alloc.free_blocks(extent.start, extent.count);
            } else {
                let mut sink = ExtentList::unbounded();
                alloc.allocate_reserved(num, 1, 0, &mut sink);
                outstanding.extend_from_slice(sink.extents());
            }

            let live: i64 = outstanding.iter().map(|e| e.count).sum();
            prop_assert_eq!(alloc.used_blocks(), live);
        }

        // Every outstanding extent is still fully allocated.
        prop_assert!(alloc.is_allocated_extents(&outstanding));

        // Drain and verify the allocator returns to empty.
        alloc.free_blocks_distributed(&outstanding);
        prop_assert_eq!(alloc.used_blocks(), 0);
    }

    #[test]
    fn prop_extra_blocks_never_issued(
        total in 65i64..2000,
        requests in prop::collection::vec(1i64..200, 1..20)
    ) {
        let alloc = small_allocator(total);
        prop_assert_eq!(alloc.total_blocks(), total);

        let mut issued = 0;
        for num in requests {
            let mut sink = ExtentList::unbounded();
            issued += alloc.allocate_reserved(num, 1, 0, &mut sink);
            for extent in sink.extents() {
                prop_assert!(extent.start >= 0);
                prop_assert!(
                    extent.end() <= total,
                    "extent {:?} crosses the declared capacity {}", extent, total
                );
            }
        }
        prop_assert!(issued <= total);
    }

    #[test]
    fn prop_min_alloc_respected(
        min_alloc in 2i64..64,
        rounds in 1usize..10
    ) {
        let alloc = small_allocator(2048);
        for _ in 0..rounds {
            let num = min_alloc * 4;
            let mut sink = ExtentList::unbounded();
            let got = alloc.allocate_reserved(num, min_alloc, 0, &mut sink);
            prop_assert!(got <= num);
            for extent in sink.extents() {
                prop_assert!(
                    extent.count >= min_alloc,
                    "extent {:?} shorter than min_alloc {}", extent, min_alloc
                );
            }
        }
    }

    #[test]
    fn prop_free_and_reallocate_converges(
        seed in prop::collection::vec(1i64..50, 4..16)
    ) {
        let alloc = small_allocator(1024);
        let mut outstanding: Vec<Extent> = Vec::new();

        for num in &seed {
            let mut sink = ExtentList::unbounded();
            alloc.allocate_reserved(*num, 1, 0, &mut sink);
            outstanding.extend_from_slice(sink.extents());
        }

        // Free every other extent, then take the freed amount back.
        let mut freed = 0;
        let mut kept = Vec::new();
        for (i, extent) in outstanding.iter().enumerate() {
            if i % 2 == 0 {
                alloc.free_blocks(extent.start, extent.count);
                freed += extent.count;
            } else {
                kept.push(*extent);
            }
        }

        if freed > 0 {
            let mut sink = ExtentList::unbounded();
            let got = alloc.allocate_reserved(freed, 1, 0, &mut sink);
            prop_assert_eq!(got, freed);
        }
        prop_assert!(alloc.is_allocated_extents(&kept));
    }
}
