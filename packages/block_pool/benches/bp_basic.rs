//! Basic benchmarks for the `block_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::ptr::NonNull;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use alloc_tracker::Allocator;
use block_pool::{BlockAllocator, LockFreePool, LockingPool, PoolGeometry, Tracking};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const GEOMETRY: PoolGeometry = PoolGeometry::new(64, 1024, 64);

const CONTENDED_THREADS: usize = 4;

fn locking() -> LockingPool<u16> {
    LockingPool::builder()
        .geometry(GEOMETRY)
        .tracking(Tracking::Disabled)
        .build_locking()
}

fn lock_free() -> LockFreePool<u16> {
    LockFreePool::builder()
        .geometry(GEOMETRY)
        .tracking(Tracking::Disabled)
        .build_lock_free()
}

fn allocate_deallocate_one(pool: &impl BlockAllocator, iters: u64) -> Duration {
    let start = Instant::now();

    for _ in 0..iters {
        let block = black_box(pool.allocate()).unwrap();
        pool.deallocate(block);
    }

    start.elapsed()
}

fn drain_and_refill(
    pool: &impl BlockAllocator,
    iters: u64,
    held: &mut Vec<NonNull<u8>>,
) -> Duration {
    let start = Instant::now();

    for _ in 0..iters {
        while let Some(block) = pool.allocate() {
            held.push(block);
        }

        #[allow(clippy::iter_with_drain, reason = "reuses the vector capacity")]
        for block in held.drain(..) {
            pool.deallocate(block);
        }
    }

    start.elapsed()
}

/// Every thread runs `iters` allocate and deallocate pairs at the same time.
/// Returns the time of the slowest thread.
fn contended(pool: &impl BlockAllocator, iters: u64) -> Duration {
    let barrier = Barrier::new(CONTENDED_THREADS);

    thread::scope(|s| {
        let handles = (0..CONTENDED_THREADS)
            .map(|_| {
                let barrier = &barrier;

                s.spawn(move || {
                    barrier.wait();
                    allocate_deallocate_one(pool, iters)
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .max()
            .unwrap_or_default()
    })
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("bp_basic");

    let allocs_op = allocs.operation("build_locking");
    group.bench_function("build_locking", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(locking()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("build_lock_free");
    group.bench_function("build_lock_free", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(lock_free()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("locking_allocate_deallocate_one");
    group.bench_function("locking_allocate_deallocate_one", |b| {
        b.iter_custom(|iters| {
            let pool = locking();

            let _span = allocs_op.measure_thread().iterations(iters);

            allocate_deallocate_one(&pool, iters)
        });
    });

    let allocs_op = allocs.operation("lock_free_allocate_deallocate_one");
    group.bench_function("lock_free_allocate_deallocate_one", |b| {
        b.iter_custom(|iters| {
            let pool = lock_free();

            let _span = allocs_op.measure_thread().iterations(iters);

            allocate_deallocate_one(&pool, iters)
        });
    });

    group.finish();

    let mut group = c.benchmark_group("bp_slow");

    let allocs_op = allocs.operation("locking_drain_and_refill_1k");
    group.bench_function("locking_drain_and_refill_1k", |b| {
        b.iter_custom(|iters| {
            let pool = locking();
            let mut held = Vec::with_capacity(GEOMETRY.block_count());

            let _span = allocs_op.measure_thread().iterations(iters);

            drain_and_refill(&pool, iters, &mut held)
        });
    });

    let allocs_op = allocs.operation("lock_free_drain_and_refill_1k");
    group.bench_function("lock_free_drain_and_refill_1k", |b| {
        b.iter_custom(|iters| {
            let pool = lock_free();
            let mut held = Vec::with_capacity(GEOMETRY.block_count());

            let _span = allocs_op.measure_thread().iterations(iters);

            drain_and_refill(&pool, iters, &mut held)
        });
    });

    group.bench_function("locking_contended_4_threads", |b| {
        b.iter_custom(|iters| contended(&locking(), iters));
    });

    group.bench_function("lock_free_contended_4_threads", |b| {
        b.iter_custom(|iters| contended(&lock_free(), iters));
    });

    group.finish();

    allocs.print_to_stdout();
}
