use std::ptr::NonNull;

use crate::{Error, PoolGeometry, Tracking};

/// Hands out and takes back fixed-size memory blocks from a preallocated pool.
///
/// Implemented by [`LockingPool`][crate::LockingPool], which serializes all operations through
/// a mutex, and [`LockFreePool`][crate::LockFreePool], which uses compare-and-swap on the head
/// of its free list. Both provide the same contract:
///
/// * Every block returned by [`allocate()`][Self::allocate] lies inside the pool, starts at a
///   multiple of the pool [stride][PoolGeometry::stride] and is aligned to the pool
///   [alignment][PoolGeometry::alignment].
/// * No block is handed out again until it has been returned via
///   [`deallocate()`][Self::deallocate].
/// * Returned blocks are reused in last in, first out order.
///
/// The pool only synchronizes its own bookkeeping. Once a block has been handed out, the holder
/// is responsible for synchronizing any access to the block contents from multiple threads.
/// Block contents are zero when the pool is created and are never modified by the pool.
///
/// # Examples
///
/// ```
/// use block_pool::{BlockAllocator, LockingPool, PoolGeometry};
///
/// let pool = LockingPool::<u8>::new(PoolGeometry::new(37, 2, 2));
///
/// let a = pool.allocate().unwrap();
/// let b = pool.allocate().unwrap();
/// assert!(pool.allocate().is_none());
///
/// // SAFETY: The block is 37 bytes and we hold it exclusively.
/// unsafe {
///     a.as_ptr().write_bytes(0xAA, 37);
/// }
///
/// pool.deallocate(a);
/// pool.deallocate(b);
/// assert!(pool.is_empty());
/// ```
pub trait BlockAllocator: Send + Sync {
    /// Takes a block from the pool, returning a pointer to its first byte.
    ///
    /// Returns `None` if every block is currently allocated. This is an expected outcome,
    /// not an error; the pool is unchanged and a later call may succeed.
    ///
    /// # Panics
    ///
    /// Panics if allocation state [tracking][Tracking] is enabled and the pool detects that the
    /// block it is about to hand out is already allocated, which indicates memory corruption.
    #[must_use]
    fn allocate(&self) -> Option<NonNull<u8>>;

    /// Returns a block to the pool, making it available to the next [`allocate()`][1] call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] or [`Error::Misaligned`] if `ptr` is not the start of a
    /// block of this pool and, when allocation state [tracking][Tracking] is enabled,
    /// [`Error::DoubleFree`] if the block is not currently allocated. The pool is unchanged
    /// when an error is returned.
    ///
    /// [1]: Self::allocate
    fn try_deallocate(&self, ptr: NonNull<u8>) -> Result<(), Error>;

    /// Returns a block to the pool, making it available to the next [`allocate()`][1] call.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not the start of a block of this pool and, when allocation state
    /// [tracking][Tracking] is enabled, if the block is not currently allocated.
    ///
    /// [1]: Self::allocate
    fn deallocate(&self, ptr: NonNull<u8>) {
        if let Err(error) = self.try_deallocate(ptr) {
            panic!("invalid block returned to pool: {error}");
        }
    }

    /// The memory geometry the pool was created with.
    #[must_use]
    fn geometry(&self) -> PoolGeometry;

    /// Whether the pool tracks the allocation state of its blocks.
    #[must_use]
    fn tracking(&self) -> Tracking;

    /// The number of blocks currently allocated.
    ///
    /// For pools shared between threads, the value may be stale by the time it is returned.
    #[must_use]
    fn allocated_count(&self) -> usize;

    /// The number of blocks in the pool.
    #[must_use]
    fn capacity(&self) -> usize {
        self.geometry().block_count()
    }

    /// The number of blocks currently available for allocation.
    #[must_use]
    fn free_count(&self) -> usize {
        self.capacity().saturating_sub(self.allocated_count())
    }

    /// Whether no blocks are currently allocated.
    #[must_use]
    fn is_empty(&self) -> bool {
        self.allocated_count() == 0
    }

    /// Whether every block is currently allocated.
    #[must_use]
    fn is_exhausted(&self) -> bool {
        self.free_count() == 0
    }

    /// Whether `ptr` points anywhere inside the memory of the pool.
    ///
    /// This does not require `ptr` to point to the start of a block.
    #[must_use]
    fn contains(&self, ptr: NonNull<u8>) -> bool;

    /// Returns the index of the block that starts at `ptr`.
    ///
    /// Block indexes are in the range `0..capacity()` and are stable for the lifetime of the
    /// pool. This does not check whether the block is currently allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] or [`Error::Misaligned`] if `ptr` is not the start of a
    /// block of this pool.
    fn index_of(&self, ptr: NonNull<u8>) -> Result<usize, Error>;
}
