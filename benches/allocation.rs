//! Benchmarks for allocator throughput

use blockmap::{AllocMode, AllocatorConfig, BitAllocator, ExtentList};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn build(total: i64, mode: AllocMode) -> BitAllocator {
    BitAllocator::new(AllocatorConfig::new(total).with_mode(mode)).unwrap()
}

fn benchmark_allocate_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_free_cycle");

    for size in [64i64, 512, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let alloc = build(1 << 20, AllocMode::Concurrent);
            b.iter(|| {
                let mut sink = ExtentList::unbounded();
                let got = alloc.allocate_reserved(black_box(size), 1, 0, &mut sink);
                assert_eq!(got, size);
                alloc.free_blocks_distributed(sink.extents());
            });
        });
    }

    group.finish();
}

fn benchmark_contiguous_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("contiguous_runs");

    for min_alloc in [16i64, 128, 1024].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(min_alloc),
            min_alloc,
            |b, &min_alloc| {
                let alloc = build(1 << 20, AllocMode::Concurrent);
                b.iter(|| {
                    let mut sink = ExtentList::unbounded();
                    let got = alloc.allocate_reserved(min_alloc * 4, min_alloc, 0, &mut sink);
                    assert_eq!(got, min_alloc * 4);
                    alloc.free_blocks_distributed(sink.extents());
                });
            },
        );
    }

    group.finish();
}

fn benchmark_fragmented_reallocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_reallocation");

    group.bench_function("every_other_block", |b| {
        let alloc = build(1 << 16, AllocMode::Concurrent);
        // Leave every other 8-block chunk live to force scattered scans.
        let mut sink = ExtentList::unbounded();
        alloc.allocate_reserved(1 << 16, 1, 0, &mut sink);
        let mut freed = 0;
        let mut start = 0;
        while start < (1 << 16) {
            alloc.free_blocks(start, 8);
            freed += 8;
            start += 16;
        }
        b.iter(|| {
            let mut sink = ExtentList::unbounded();
            let got = alloc.allocate_reserved(freed, 1, 0, &mut sink);
            assert_eq!(got, freed);
            alloc.free_blocks_distributed(sink.extents());
        });
    });

    group.finish();
}

fn benchmark_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation_modes");

    for (name, mode) in [
        ("serial", AllocMode::Serial),
        ("concurrent", AllocMode::Concurrent),
    ] {
        group.bench_function(name, |b| {
            let alloc = build(1 << 18, mode);
            b.iter(|| {
                let mut sink = ExtentList::unbounded();
                let got = alloc.allocate_reserved(256, 1, 0, &mut sink);
                assert_eq!(got, 256);
                alloc.free_blocks_distributed(sink.extents());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_allocate_free_cycle,
    benchmark_contiguous_runs,
    benchmark_fragmented_reallocation,
    benchmark_modes
);
criterion_main!(benches);
