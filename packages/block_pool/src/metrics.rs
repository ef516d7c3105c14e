//! Metrics for block pools.
//!
//! Every pool in the process reports into the same events. The events are per-thread
//! instances to keep observation off the shared cache lines that the pools themselves contend on.

use nm::{Event, Magnitude};

/// Histogram buckets for the number of failed compare-and-swap attempts before a lock-free
/// pool operation succeeded.
///
/// Almost all operations should succeed on the first attempt. Long tails indicate heavy
/// contention on the head of the free list.
const CAS_RETRIES_BUCKETS: &[Magnitude] = &[0, 1, 2, 4, 8, 16, 32, 64];

thread_local! {
    /// Event for a block being handed out by a pool.
    pub(crate) static ALLOCATIONS: Event = Event::builder()
        .name("block_pool_allocations")
        .build();

    /// Event for an allocation attempt that found every block of the pool in use.
    pub(crate) static EXHAUSTED: Event = Event::builder()
        .name("block_pool_exhausted")
        .build();

    /// Event for a block being returned to a pool.
    pub(crate) static DEALLOCATIONS: Event = Event::builder()
        .name("block_pool_deallocations")
        .build();

    /// Event for a completed lock-free pool operation.
    ///
    /// The magnitude is the number of times the operation had to retry its compare-and-swap.
    pub(crate) static CAS_RETRIES: Event = Event::builder()
        .name("block_pool_cas_retries")
        .histogram(CAS_RETRIES_BUCKETS)
        .build();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use nm::Report;

    use crate::{BlockAllocator, LockFreePool, LockingPool, PoolGeometry};

    // Other tests observe the same events concurrently, so we only assert lower bounds.
    fn count_of(report: &Report, name: &str) -> u64 {
        report
            .events()
            .find(|event| *event.name() == name)
            .map(|event| event.count())
            .unwrap_or_default()
    }

    #[test]
    fn pools_report_allocations_and_exhaustion() {
        let locking = LockingPool::<u8>::new(PoolGeometry::new(8, 1, 8));
        let lock_free = LockFreePool::<u8>::new(PoolGeometry::new(8, 1, 8));

        let a = locking.allocate().unwrap();
        let b = lock_free.allocate().unwrap();
        assert!(locking.allocate().is_none());
        assert!(lock_free.allocate().is_none());
        locking.deallocate(a);
        lock_free.deallocate(b);

        let report = Report::collect();

        assert!(count_of(&report, "block_pool_allocations") >= 2);
        assert!(count_of(&report, "block_pool_exhausted") >= 2);
        assert!(count_of(&report, "block_pool_deallocations") >= 2);

        // Every lock-free operation reports its retries, including the failed allocation.
        assert!(count_of(&report, "block_pool_cas_retries") >= 3);
    }
}
