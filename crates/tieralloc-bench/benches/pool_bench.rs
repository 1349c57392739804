//! Pooled vs primary allocator benchmarks.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tieralloc_core::{OomPolicy, PoolAllocator, PoolConfig, PrimaryAllocator, RawAlloc};

fn report_config() -> PoolConfig {
    PoolConfig::default().with_oom_policy(OomPolicy::Report)
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[8, 32, 64, 128, 256];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("pool", size), &size, |b, &sz| {
            let mut pool = PoolAllocator::with_config(report_config());
            b.iter(|| {
                let ptr = pool.allocate(black_box(sz)).unwrap();
                unsafe { pool.deallocate(ptr, sz) };
            });
        });
        group.bench_with_input(BenchmarkId::new("primary", size), &size, |b, &sz| {
            let mut primary = PrimaryAllocator::libc(OomPolicy::Report);
            b.iter(|| {
                let ptr = primary.allocate(black_box(sz)).unwrap();
                unsafe { primary.deallocate(ptr, sz) };
            });
        });
    }
    group.finish();
}

fn bench_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst_1000x24B");

    group.bench_function("pool_warm", |b| {
        let mut pool = PoolAllocator::with_config(report_config());
        let mut held = Vec::with_capacity(1000);
        b.iter(|| {
            for _ in 0..1000 {
                held.push(pool.allocate(24).unwrap());
            }
            for ptr in held.drain(..) {
                unsafe { pool.deallocate(ptr, 24) };
            }
        });
    });

    // Fresh instance per iteration: every refill grows the pool.
    group.bench_function("pool_cold", |b| {
        b.iter(|| {
            let mut pool = PoolAllocator::with_config(report_config());
            for _ in 0..1000 {
                black_box(pool.allocate(24).unwrap());
            }
            black_box(pool.heap_size())
        });
    });

    group.bench_function("primary", |b| {
        let mut primary = PrimaryAllocator::libc(OomPolicy::Report);
        let mut held = Vec::with_capacity(1000);
        b.iter(|| {
            for _ in 0..1000 {
                held.push(primary.allocate(24).unwrap());
            }
            for ptr in held.drain(..) {
                unsafe { primary.deallocate(ptr, 24) };
            }
        });
    });

    group.finish();
}

fn bench_refill_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("refill_batch");

    for batch in [1usize, 5, 20, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &n| {
            b.iter(|| {
                let mut pool =
                    PoolAllocator::with_config(report_config().with_refill_batch(n));
                for size in (8..=128).step_by(8) {
                    for _ in 0..64 {
                        black_box(pool.allocate(size).unwrap());
                    }
                }
                black_box(pool.stats().growth_events)
            });
        });
    }
    group.finish();
}

fn bench_realloc_across_classes(c: &mut Criterion) {
    let mut group = c.benchmark_group("realloc_ladder");

    group.bench_function("8_to_128_and_back", |b| {
        let mut pool = PoolAllocator::with_config(report_config());
        b.iter(|| {
            let mut ptr = pool.allocate(8).unwrap();
            let mut size = 8;
            for next in (16..=128).step_by(8).chain((8..128).rev().step_by(8)) {
                ptr = unsafe { pool.reallocate(ptr, size, next) }.unwrap();
                size = next;
            }
            unsafe { pool.deallocate(ptr, size) };
        });
    });

    group.bench_function("small_to_large", |b| {
        let mut pool = PoolAllocator::with_config(report_config());
        b.iter(|| {
            let ptr = pool.allocate(96).unwrap();
            let grown = unsafe { pool.reallocate(ptr, 96, 4096) }.unwrap();
            let shrunk = unsafe { pool.reallocate(grown, 4096, 64) }.unwrap();
            unsafe { pool.deallocate(shrunk, 64) };
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_burst,
    bench_refill_batch,
    bench_realloc_across_classes
);
criterion_main!(benches);
