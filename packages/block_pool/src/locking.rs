use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::{
    Arena, BlockAllocator, Error, FreeList, PoolBuilder, PoolGeometry, SlotIndex, Tracking, metrics,
};

/// A pool of fixed-size memory blocks that serializes allocation through a mutex.
///
/// Every [`allocate()`][BlockAllocator::allocate] and
/// [`deallocate()`][BlockAllocator::deallocate] call takes the same lock, giving a total order
/// over all operations on the pool. Callers may block while another thread holds the lock; there
/// is no timeout.
///
/// The index type `I` stores the free-list links and must be able to represent the number of
/// blocks in the pool.
///
/// # Examples
///
/// ```
/// use block_pool::{BlockAllocator, LockingPool, PoolGeometry};
///
/// let pool = LockingPool::<u16>::new(PoolGeometry::new(37, 16, 2));
///
/// let block = pool.allocate().unwrap();
/// assert_eq!(pool.index_of(block), Ok(0));
/// assert_eq!(pool.free_count(), 15);
///
/// pool.deallocate(block);
/// assert_eq!(pool.free_count(), 16);
/// ```
///
/// # Thread safety
///
/// The pool is thread-safe ([`Send`] and [`Sync`]). Share it between threads via `Arc` or by
/// reference from scoped threads.
#[derive(Debug)]
pub struct LockingPool<I: SlotIndex> {
    arena: Arena,
    free_list: Mutex<FreeList<I>>,
    tracking: Tracking,
}

impl<I: SlotIndex> LockingPool<I> {
    /// Creates a pool with the given geometry and the default [tracking][Tracking] level.
    ///
    /// # Panics
    ///
    /// Panics if `I` cannot represent the block count of the geometry.
    #[must_use]
    pub fn new(geometry: PoolGeometry) -> Self {
        Self::new_inner(geometry, Tracking::default())
    }

    /// Starts building a pool with a customized configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::{LockingPool, Tracking};
    ///
    /// let pool = LockingPool::<u32>::builder()
    ///     .block_size(100)
    ///     .block_count(1000)
    ///     .tracking(Tracking::Disabled)
    ///     .build_locking();
    /// ```
    pub fn builder() -> PoolBuilder<I> {
        PoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(geometry: PoolGeometry, tracking: Tracking) -> Self {
        let free_list = FreeList::new(geometry.block_count(), tracking);

        Self {
            arena: Arena::new(geometry),
            free_list: Mutex::new(free_list),
            tracking,
        }
    }

    /// Verifies that every block is either on the free list or allocated, but not both.
    ///
    /// Requires exclusive access so that no operation is in flight during the check.
    ///
    /// # Panics
    ///
    /// Panics if the free list is corrupted.
    pub fn integrity_check(&mut self) {
        self.free_list.get_mut().integrity_check();
    }
}

impl<I: SlotIndex> BlockAllocator for LockingPool<I> {
    fn allocate(&self) -> Option<NonNull<u8>> {
        let popped = self.free_list.lock().pop();

        let Some(index) = popped else {
            metrics::EXHAUSTED.with(nm::Event::observe_once);
            return None;
        };

        metrics::ALLOCATIONS.with(nm::Event::observe_once);

        Some(self.arena.block_ptr(index))
    }

    fn try_deallocate(&self, ptr: NonNull<u8>) -> Result<(), Error> {
        let index = self.arena.index_of(ptr)?;

        self.free_list.lock().push(index)?;

        metrics::DEALLOCATIONS.with(nm::Event::observe_once);

        Ok(())
    }

    fn geometry(&self) -> PoolGeometry {
        self.arena.geometry()
    }

    fn tracking(&self) -> Tracking {
        self.tracking
    }

    fn allocated_count(&self) -> usize {
        self.free_list.lock().allocated_count()
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

    assert_impl_all!(LockingPool<u8>: Send, Sync, std::fmt::Debug);
    assert_impl_all!(LockingPool<u32>: Send, Sync);

    fn pool_37_16_2() -> LockingPool<u16> {
        LockingPool::new_inner(PoolGeometry::new(37, 16, 2), Tracking::Enabled)
    }

    #[test]
    fn smoke_test() {
        let pool = pool_37_16_2();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe {
            a.as_ptr().write_bytes(1, 37);
            b.as_ptr().write_bytes(2, 37);

            assert_eq!(a.read(), 1);
            assert_eq!(b.read(), 2);
        }

        assert_eq!(pool.allocated_count(), 2);

        pool.deallocate(a);
        pool.deallocate(b);

        assert!(pool.is_empty());
    }

    #[test]
    fn exhausts_after_block_count_allocations() {
        let pool = pool_37_16_2();

        let blocks = (0..16)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        assert!(pool.is_exhausted());
        assert!(pool.allocate().is_none());
        assert!(pool.allocate().is_none());

        let distinct = blocks.iter().copied().collect::<HashSet<_>>();
        assert_eq!(distinct.len(), 16);
    }

    #[test]
    fn exhaustion_does_not_change_state() {
        let mut pool = pool_37_16_2();

        let blocks = (0..16)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        assert!(pool.allocate().is_none());
        assert_eq!(pool.allocated_count(), 16);
        pool.integrity_check();

        for block in blocks {
            pool.deallocate(block);
        }

        pool.integrity_check();
    }

    #[test]
    fn freed_block_is_reused_first() {
        let pool = pool_37_16_2();

        let _a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let _c = pool.allocate().unwrap();

        pool.deallocate(b);

        assert_eq!(pool.allocate(), Some(b));
    }

    #[test]
    fn zero_blocks_is_always_exhausted() {
        let pool = LockingPool::<u8>::new(PoolGeometry::new(8, 0, 8));

        assert!(pool.allocate().is_none());
        assert!(pool.is_empty());
        assert!(pool.is_exhausted());
    }

    #[test]
    fn block_contents_start_zeroed() {
        let pool = pool_37_16_2();

        while let Some(block) = pool.allocate() {
            for offset in 0..38 {
                assert_eq!(unsafe { block.byte_add(offset).read() }, 0);
            }
        }
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
        let pool = LockingPool::<u16>::new_inner(PoolGeometry::new(37, 16, 2), Tracking::Disabled);
        let block = pool.allocate().unwrap();

        pool.deallocate(block);
        assert_eq!(pool.try_deallocate(block), Ok(()));
    }

    #[test]
    fn invalid_pointer_is_detected_without_tracking() {
        let pool = LockingPool::<u16>::new_inner(PoolGeometry::new(37, 16, 2), Tracking::Disabled);
        let block = pool.allocate().unwrap();

        assert!(matches!(
            pool.try_deallocate(unsafe { block.byte_add(37) }),
            Err(Error::Misaligned { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn index_type_too_narrow_panics() {
        let _pool = LockingPool::<u8>::new(PoolGeometry::new(1, 256, 1));
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
