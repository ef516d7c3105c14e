use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::head::{Head, HeadCodec, MIN_TAG_BITS};
use crate::{
    Arena, BlockAllocator, Error, PoolBuilder, PoolGeometry, SlotIndex, Tracking, metrics,
};

/// A pool of fixed-size memory blocks that never blocks on a lock.
///
/// The free list is a stack of block indexes whose head is a single atomic word updated with
/// compare-and-swap. The head word holds the index of the first free block, the index of the
/// block after it and a generation tag that changes on every update. A thread that read the
/// head, got preempted and lost the race to other threads that popped and pushed blocks in the
/// meantime will always see its compare-and-swap fail and retry, even if the same block is back
/// at the head of the list with the same successor.
///
/// Operations are lock-free but not wait-free: under contention, an individual call may retry
/// an unbounded number of times, but some thread always makes progress.
///
/// The pool supports up to 2<sup>24</sup> - 1 blocks, which leaves at least 16 bits of
/// generation tag in the head word.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use block_pool::{BlockAllocator, LockFreePool, PoolGeometry};
///
/// let pool = LockFreePool::<u16>::new(PoolGeometry::new(64, 8, 64));
///
/// thread::scope(|s| {
///     for value in 0..4_u8 {
///         let pool = &pool;
///
///         s.spawn(move || {
///             let block = pool.allocate().unwrap();
///
///             // SAFETY: The block is 64 bytes and we hold it exclusively.
///             unsafe {
///                 block.as_ptr().write_bytes(value, 64);
///             }
///
///             pool.deallocate(block);
///         });
///     }
/// });
///
/// assert!(pool.is_empty());
/// ```
///
/// # Thread safety
///
/// The pool is thread-safe ([`Send`] and [`Sync`]). Share it between threads via `Arc` or by
/// reference from scoped threads.
#[derive(Debug)]
pub struct LockFreePool<I: SlotIndex> {
    arena: Arena,

    /// Packed `{index, next, tag}` of the first free block. See `head.rs` for the layout.
    head: AtomicU64,

    codec: HeadCodec,

    /// One record per block plus the sentinel record at index `block_count`,
    /// which links to itself.
    records: Box<[Record<I>]>,

    tracking: Tracking,

    /// Exact whenever no operation is in flight.
    allocated_count: AtomicUsize,
}

#[derive(Debug)]
struct Record<I: SlotIndex> {
    /// Index of the next free block. Only meaningful while the block is free.
    ///
    /// Written by the thread returning the block before the block is published on the free list,
    /// read by threads popping the block before it. All access is relaxed; the head CAS orders it.
    next: I::Atomic,

    /// Whether the block is held by a caller. Only maintained when tracking is enabled.
    allocated: AtomicBool,
}

impl<I: SlotIndex> LockFreePool<I> {
    /// Creates a pool with the given geometry and the default [tracking][Tracking] level.
    ///
    /// # Panics
    ///
    /// Panics if `I` cannot represent the block count of the geometry or if the geometry has
    /// 2<sup>24</sup> or more blocks.
    #[must_use]
    pub fn new(geometry: PoolGeometry) -> Self {
        Self::new_inner(geometry, Tracking::default())
    }

    /// Starts building a pool with a customized configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::{LockFreePool, Tracking};
    ///
    /// let pool = LockFreePool::<u16>::builder()
    ///     .block_size(37)
    ///     .block_count(16)
    ///     .alignment(2)
    ///     .tracking(Tracking::Enabled)
    ///     .build_lock_free();
    /// ```
    pub fn builder() -> PoolBuilder<I> {
        PoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(geometry: PoolGeometry, tracking: Tracking) -> Self {
        let block_count = geometry.block_count();

        assert!(
            block_count <= I::MAX,
            "index type {} cannot address {block_count} blocks plus the end of list marker",
            std::any::type_name::<I>()
        );

        let codec = HeadCodec::new(block_count);
        debug_assert!(codec.tag_bits() >= MIN_TAG_BITS);

        // Block i links to block i + 1, the last block links to the sentinel
        // and the sentinel links to itself.
        let records = (0..=block_count)
            .map(|index| Record {
                next: I::new_atomic(I::from_usize(index.wrapping_add(1).min(block_count))),
                allocated: AtomicBool::new(false),
            })
            .collect();

        // With no blocks, block 0 is the sentinel and its successor is itself.
        let head = codec.encode(Head {
            index: 0,
            next: 1.min(block_count),
            tag: 0,
        });

        Self {
            arena: Arena::new(geometry),
            head: AtomicU64::new(head),
            codec,
            records,
            tracking,
            allocated_count: AtomicUsize::new(0),
        }
    }

    #[must_use]
    fn sentinel(&self) -> usize {
        self.arena.geometry().block_count()
    }

    #[must_use]
    fn record(&self, index: usize) -> &Record<I> {
        self.records
            .get(index)
            .expect("free list links only ever point to blocks or the sentinel")
    }

    /// Verifies that every block is either on the free list or allocated, but not both,
    /// and that the head word agrees with the records it summarizes.
    ///
    /// Requires exclusive access so that no operation is in flight during the check.
    ///
    /// # Panics
    ///
    /// Panics if the free list is corrupted.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub fn integrity_check(&mut self) {
        let sentinel = self.sentinel();
        let head = self.codec.decode(*self.head.get_mut());

        assert_eq!(
            head.next,
            self.record(head.index).next_relaxed(),
            "head word caches successor {} of block {} but the record links to {}",
            head.next,
            head.index,
            self.record(head.index).next_relaxed()
        );

        assert_eq!(
            self.record(sentinel).next_relaxed(),
            sentinel,
            "sentinel must link to itself"
        );

        let mut on_list = vec![false; sentinel];
        let mut free_count: usize = 0;
        let mut index = head.index;

        while index != sentinel {
            let seen = on_list
                .get_mut(index)
                .unwrap_or_else(|| panic!("free list points to out of bounds block {index}"));

            assert!(!*seen, "free list is cyclic, block {index} seen twice");
            *seen = true;

            free_count = free_count.wrapping_add(1);
            index = self.record(index).next_relaxed();
        }

        let allocated_count = *self.allocated_count.get_mut();

        assert_eq!(
            free_count.wrapping_add(allocated_count),
            sentinel,
            "free blocks {free_count} plus allocated blocks {allocated_count} do not add up to {sentinel} blocks"
        );

        if self.tracking.is_enabled() {
            for (index, free) in on_list.iter().enumerate() {
                let allocated = self.record(index).allocated.load(Ordering::Relaxed);

                assert_ne!(
                    allocated, *free,
                    "block {index} allocation flag disagrees with free list membership"
                );
            }
        }
    }
}

impl<I: SlotIndex> Record<I> {
    #[must_use]
    fn next_relaxed(&self) -> usize {
        I::load(&self.next, Ordering::Relaxed).to_usize()
    }
}

impl<I: SlotIndex> BlockAllocator for LockFreePool<I> {
    fn allocate(&self) -> Option<NonNull<u8>> {
        let sentinel = self.sentinel();
        let mut retries: usize = 0;

        // Acquire pairs with the release of whichever push published the head we observe,
        // making the link of its successor visible to us.
        let mut observed = self.head.load(Ordering::Acquire);

        let index = loop {
            let head = self.codec.decode(observed);

            if head.index == sentinel {
                metrics::EXHAUSTED.with(nm::Event::observe_once);
                metrics::CAS_RETRIES.with(|event| event.observe(retries));
                return None;
            }

            // If the head is unchanged when we CAS, nobody pushed or popped in the meantime,
            // so `head.next` is still free and its link is still what we read here. If anybody
            // did, the tag differs and the CAS fails.
            let replacement = Head {
                index: head.next,
                next: self.record(head.next).next_relaxed(),
                tag: head.tag.wrapping_add(1),
            };

            match self.head.compare_exchange_weak(
                observed,
                self.codec.encode(replacement),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break head.index,
                Err(actual) => {
                    observed = actual;
                    retries = retries.wrapping_add(1);
                }
            }
        };

        if self.tracking.is_enabled() {
            let was_allocated = self.record(index).allocated.swap(true, Ordering::Relaxed);

            assert!(
                !was_allocated,
                "block {index} is on the free list but already allocated - the free list is corrupted"
            );
        }

        self.allocated_count.fetch_add(1, Ordering::Relaxed);

        metrics::ALLOCATIONS.with(nm::Event::observe_once);
        metrics::CAS_RETRIES.with(|event| event.observe(retries));

        Some(self.arena.block_ptr(index))
    }

    fn try_deallocate(&self, ptr: NonNull<u8>) -> Result<(), Error> {
        let index = self.arena.index_of(ptr)?;
        let record = self.record(index);

        // Claiming the flag before touching the free list means that of two racing calls
        // returning the same block, only one proceeds.
        if self.tracking.is_enabled()
            && record
                .allocated
                .compare_exchange(true, false, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            return Err(Error::DoubleFree { index });
        }

        let mut retries: usize = 0;
        let mut observed = self.head.load(Ordering::Relaxed);

        loop {
            let head = self.codec.decode(observed);

            // The block is not reachable by other threads until the CAS below publishes it.
            I::store(&record.next, I::from_usize(head.index), Ordering::Relaxed);

            let replacement = Head {
                index,
                next: head.index,
                tag: head.tag.wrapping_add(1),
            };

            // Release publishes the link above together with everything the caller wrote
            // to the block to whichever thread allocates it next.
            match self.head.compare_exchange_weak(
                observed,
                self.codec.encode(replacement),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => {
                    observed = actual;
                    retries = retries.wrapping_add(1);
                }
            }
        }

        // Without tracking, a double free is undetectable and the count may drift;
        // saturate rather than wrap so the reported counts stay in range.
        _ = self
            .allocated_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                Some(count.saturating_sub(1))
            });

        metrics::DEALLOCATIONS.with(nm::Event::observe_once);
        metrics::CAS_RETRIES.with(|event| event.observe(retries));

        Ok(())
    }

    fn geometry(&self) -> PoolGeometry {
        self.arena.geometry()
    }

    fn tracking(&self) -> Tracking {
        self.tracking
    }

    fn allocated_count(&self) -> usize {
        self.allocated_count
            .load(Ordering::Relaxed)
            .min(self.sentinel())
    }

    fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.arena.contains(ptr)
    }

    fn index_of(&self, ptr: NonNull<u8>) -> Result<usize, Error> {
        self.arena.index_of(ptr)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(LockFreePool<u8>: Send, Sync, std::fmt::Debug);
    assert_impl_all!(LockFreePool<u32>: Send, Sync);

    fn pool_37_16_2() -> LockFreePool<u16> {
        LockFreePool::new_inner(PoolGeometry::new(37, 16, 2), Tracking::Enabled)
    }

    #[test]
    fn smoke_test() {
        let mut pool = pool_37_16_2();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe {
            a.as_ptr().write_bytes(1, 37);
            b.as_ptr().write_bytes(2, 37);

            assert_eq!(a.read(), 1);
            assert_eq!(b.read(), 2);
        }

        assert_eq!(pool.allocated_count(), 2);
        pool.integrity_check();

        pool.deallocate(a);
        pool.deallocate(b);

        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn initial_allocations_are_in_ascending_order() {
        let pool = pool_37_16_2();

        for expected in 0..16 {
            let block = pool.allocate().unwrap();
            assert_eq!(pool.index_of(block), Ok(expected));
        }

        assert!(pool.allocate().is_none());
    }

    #[test]
    fn exhausts_after_block_count_allocations() {
        let mut pool = pool_37_16_2();

        let blocks = (0..16)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        assert!(pool.is_exhausted());
        assert!(pool.allocate().is_none());
        assert!(pool.allocate().is_none());
        pool.integrity_check();

        let distinct = blocks.iter().copied().collect::<HashSet<_>>();
        assert_eq!(distinct.len(), 16);
    }

    #[test]
    fn freed_block_is_reused_first() {
        let mut pool = pool_37_16_2();

        let _a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let _c = pool.allocate().unwrap();

        pool.deallocate(b);
        pool.integrity_check();

        assert_eq!(pool.allocate(), Some(b));
        pool.integrity_check();
    }

    #[test]
    fn head_tag_advances_on_every_update() {
        let mut pool = pool_37_16_2();

        let tag_before = pool.codec.decode(*pool.head.get_mut()).tag;

        let block = pool.allocate().unwrap();
        pool.deallocate(block);

        let head = pool.codec.decode(*pool.head.get_mut());

        // Same block at the head with the same successor as at the start,
        // but two updates later.
        assert_eq!(head.index, 0);
        assert_eq!(head.next, 1);
        assert_eq!(head.tag, tag_before + 2);
    }

    #[test]
    fn stale_pop_fails_after_same_pair_returns_to_head() {
        let mut pool = pool_37_16_2();

        // A pop that read the head and was preempted before its compare-and-swap.
        let stale_observed = *pool.head.get_mut();
        let stale_head = pool.codec.decode(stale_observed);
        let stale_replacement = pool.codec.encode(Head {
            index: stale_head.next,
            next: pool.record(stale_head.next).next_relaxed(),
            tag: stale_head.tag.wrapping_add(1),
        });

        assert_eq!((stale_head.index, stale_head.next), (0, 1));
        assert_eq!(pool.record(1).next_relaxed(), 2);

        // Meanwhile other threads pop 0, 1 and 2, then push 1 and 0 back.
        let block_0 = pool.allocate().unwrap();
        let block_1 = pool.allocate().unwrap();
        let block_2 = pool.allocate().unwrap();
        assert_eq!(pool.index_of(block_2), Ok(2));

        pool.deallocate(block_1);
        pool.deallocate(block_0);

        // The head holds the same {index, next} pair again, but block 1 now skips the
        // allocated block 2. Installing the stale replacement would hand out block 2 twice.
        let current = pool.codec.decode(*pool.head.get_mut());
        assert_eq!((current.index, current.next), (0, 1));
        assert_eq!(pool.record(1).next_relaxed(), 3);

        let result = pool.head.compare_exchange(
            stale_observed,
            stale_replacement,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(result.is_err());

        pool.integrity_check();

        assert_eq!(pool.allocate(), Some(block_0));
        assert_eq!(pool.allocate(), Some(block_1));
        assert_eq!(pool.index_of(pool.allocate().unwrap()), Ok(3));
        pool.integrity_check();
    }

    #[test]
    fn exhaustion_does_not_update_head() {
        let mut pool = pool_37_16_2();

        while pool.allocate().is_some() {}

        let before = *pool.head.get_mut();
        assert!(pool.allocate().is_none());
        assert_eq!(*pool.head.get_mut(), before);
    }

    #[test]
    fn zero_blocks_is_always_exhausted() {
        let mut pool = LockFreePool::<u8>::new(PoolGeometry::new(8, 0, 8));

        assert!(pool.allocate().is_none());
        assert!(pool.is_empty());
        assert!(pool.is_exhausted());
        pool.integrity_check();
    }

    #[test]
    fn single_block_pool() {
        let mut pool = LockFreePool::<u8>::new_inner(PoolGeometry::new(8, 1, 8), Tracking::Enabled);

        let block = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());
        pool.integrity_check();

        pool.deallocate(block);
        pool.integrity_check();

        assert_eq!(pool.allocate(), Some(block));
    }

    #[test]
    #[should_panic]
    fn deallocate_foreign_pointer_panics() {
        let pool = pool_37_16_2();
        let foreign = Box::new(0_u8);

        pool.deallocate(NonNull::from(&*foreign));
    }

    #[test]
    #[should_panic]
    fn deallocate_misaligned_pointer_panics() {
        let pool = pool_37_16_2();
        let block = pool.allocate().unwrap();

        pool.deallocate(unsafe { block.byte_add(1) });
    }

    #[test]
    #[should_panic]
    fn double_free_panics_when_tracking() {
        let pool = pool_37_16_2();
        let block = pool.allocate().unwrap();

        pool.deallocate(block);
        pool.deallocate(block);
    }

    #[test]
    fn try_deallocate_reports_errors_without_changing_state() {
        let mut pool = pool_37_16_2();
        let block = pool.allocate().unwrap();
        let head_before = *pool.head.get_mut();

        assert!(matches!(
            pool.try_deallocate(unsafe { block.byte_add(3) }),
            Err(Error::Misaligned {
                offset: 3,
                stride: 38
            })
        ));

        let foreign = Box::new(0_u8);
        assert!(matches!(
            pool.try_deallocate(NonNull::from(&*foreign)),
            Err(Error::OutOfBounds { pool_len: 608, .. })
        ));

        assert_eq!(*pool.head.get_mut(), head_before);
        assert_eq!(pool.allocated_count(), 1);
        pool.integrity_check();

        assert_eq!(pool.try_deallocate(block), Ok(()));
        assert_eq!(
            pool.try_deallocate(block),
            Err(Error::DoubleFree { index: 0 })
        );

        pool.integrity_check();
    }

    #[test]
    fn double_free_is_not_detected_without_tracking() {
        let pool = LockFreePool::<u16>::new_inner(PoolGeometry::new(37, 16, 2), Tracking::Disabled);
        let block = pool.allocate().unwrap();

        pool.deallocate(block);
        assert_eq!(pool.try_deallocate(block), Ok(()));

        // The count saturates instead of wrapping around.
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    #[should_panic]
    fn index_type_too_narrow_panics() {
        let _pool = LockFreePool::<u8>::new(PoolGeometry::new(1, 256, 1));
    }

    #[test]
    #[should_panic]
    fn too_many_blocks_for_head_word_panics() {
        let _pool = LockFreePool::<u32>::new(PoolGeometry::new(1, 1 << 24, 1));
    }

    #[test]
    fn multithreaded_via_arc() {
        let pool = Arc::new(pool_37_16_2());

        let handles = (0..4_u8)
            .map(|value| {
                let pool = Arc::clone(&pool);

                thread::spawn(move || {
                    for _ in 0..1000 {
                        let block = pool.allocate().unwrap();

                        unsafe {
                            block.as_ptr().write_bytes(value, 37);

                            for offset in 0..37 {
                                assert_eq!(block.byte_add(offset).read(), value);
                            }
                        }

                        pool.deallocate(block);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut pool = Arc::into_inner(pool).unwrap();
        assert!(pool.is_empty());
        pool.integrity_check();
    }
}
