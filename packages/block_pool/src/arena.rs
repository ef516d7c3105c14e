use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::num::NonZero;
use std::ptr::{self, NonNull};

use crate::{Error, PoolGeometry, Result};

/// The memory of a block pool: one zero-initialized allocation carved into `block_count` blocks
/// of `stride` bytes each, with every block aligned to the pool alignment.
///
/// The arena never reads or writes block contents after initialization and does not create
/// references to them, so it is valid for callers to access block memory via pointers from
/// any thread while the arena is shared.
#[derive(Debug)]
pub(crate) struct Arena {
    geometry: PoolGeometry,

    /// Same as `geometry.stride()`, kept in non-zero form for infallible division.
    stride: NonZero<usize>,

    /// First byte of the first block. For a pool without blocks, this is a dangling pointer
    /// that is still aligned to the pool alignment.
    start: NonNull<u8>,

    /// Layout of the allocation backing the arena. `None` if the arena has no blocks,
    /// in which case nothing was allocated.
    layout: Option<Layout>,
}

impl Arena {
    /// # Panics
    ///
    /// Panics if the memory cannot be allocated.
    #[must_use]
    pub(crate) fn new(geometry: PoolGeometry) -> Self {
        let stride = NonZero::new(geometry.stride()).expect("PoolGeometry guarantees stride > 0");

        if geometry.pool_len() == 0 {
            let start = NonNull::new(ptr::without_provenance_mut::<u8>(geometry.alignment()))
                .expect("PoolGeometry guarantees alignment is a power of two, so never zero");

            return Self {
                geometry,
                stride,
                start,
                layout: None,
            };
        }

        let layout = Layout::from_size_align(geometry.pool_len(), geometry.alignment())
            .expect("PoolGeometry guarantees a valid size and alignment");

        // SAFETY: The layout is not zero-sized (guarded by the early return above).
        let start = NonNull::new(unsafe { alloc_zeroed(layout) }).expect(
            "we do not intend to handle allocation failure as a real possibility - OOM is panic",
        );

        Self {
            geometry,
            stride,
            start,
            layout: Some(layout),
        }
    }

    #[must_use]
    pub(crate) fn geometry(&self) -> PoolGeometry {
        self.geometry
    }

    /// Returns a pointer to the first byte of the block with the given index.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    #[must_use]
    pub(crate) fn block_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.geometry.block_count(),
            "block {index} index out of bounds in pool of {} blocks",
            self.geometry.block_count()
        );

        // SAFETY: Guarded by bounds check above, so the offset stays within our allocation.
        unsafe { self.start.byte_add(self.geometry.offset_of(index)) }
    }

    /// Returns `true` if the pointer points anywhere inside the arena memory.
    #[must_use]
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        ptr.as_ptr()
            .addr()
            .checked_sub(self.start.as_ptr().addr())
            .is_some_and(|offset| offset < self.geometry.pool_len())
    }

    /// Maps a pointer to the start of a block back to the index of that block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the pointer is outside the arena and
    /// [`Error::Misaligned`] if it is inside the arena but not at the start of a block.
    pub(crate) fn index_of(&self, ptr: NonNull<u8>) -> Result<usize> {
        let address = ptr.as_ptr().addr();
        let pool_start = self.start.as_ptr().addr();

        let offset = address
            .checked_sub(pool_start)
            .filter(|offset| *offset < self.geometry.pool_len())
            .ok_or(Error::OutOfBounds {
                address,
                pool_start,
                pool_len: self.geometry.pool_len(),
            })?;

        if offset % self.stride != 0 {
            return Err(Error::Misaligned {
                offset,
                stride: self.stride.get(),
            });
        }

        #[allow(
            clippy::integer_division,
            reason = "the remainder is known to be zero, checked above"
        )]
        let index = offset / self.stride;

        Ok(index)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: We allocated this memory in `new()` with the same layout and nothing
            // else deallocates it.
            unsafe {
                dealloc(self.start.as_ptr(), layout);
            }
        }
    }
}

// SAFETY: The arena owns its allocation and never accesses block contents after initialization,
// so moving it to another thread cannot introduce a data race.
unsafe impl Send for Arena {}

// SAFETY: All methods taking `&self` only perform address arithmetic on the base pointer and
// never touch the memory behind it. Synchronizing access to block contents is the
// responsibility of whoever holds the block.
unsafe impl Sync for Arena {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_zeroed() {
        let arena = Arena::new(PoolGeometry::new(37, 16, 2));

        for index in 0..16 {
            let block = arena.block_ptr(index);

            for byte in 0..38 {
                assert_eq!(unsafe { block.byte_add(byte).read() }, 0);
            }
        }
    }

    #[test]
    fn blocks_are_aligned_and_spaced_by_stride() {
        let arena = Arena::new(PoolGeometry::new(37, 16, 8));
        let start = arena.block_ptr(0).as_ptr().addr();

        assert_eq!(start % 8, 0);

        for index in 0..16 {
            let address = arena.block_ptr(index).as_ptr().addr();

            assert_eq!(address - start, index * 40);
            assert_eq!(address % 8, 0);
        }
    }

    #[test]
    fn index_of_block_ptr_round_trips() {
        let arena = Arena::new(PoolGeometry::new(37, 16, 2));

        for index in 0..16 {
            assert_eq!(arena.index_of(arena.block_ptr(index)), Ok(index));
        }
    }

    #[test]
    fn index_of_misaligned_is_error() {
        let arena = Arena::new(PoolGeometry::new(37, 16, 2));
        let inside = unsafe { arena.block_ptr(3).byte_add(1) };

        assert_eq!(
            arena.index_of(inside),
            Err(Error::Misaligned {
                offset: 3 * 38 + 1,
                stride: 38
            })
        );
    }

    #[test]
    fn index_of_out_of_bounds_is_error() {
        let arena = Arena::new(PoolGeometry::new(37, 16, 2));
        let start = arena.block_ptr(0);

        // One past the end is the first address that is not part of the pool.
        let past_end = unsafe { arena.block_ptr(15).byte_add(38) };
        assert!(matches!(
            arena.index_of(past_end),
            Err(Error::OutOfBounds { pool_len: 608, .. })
        ));

        let before_start = start.as_ptr().wrapping_sub(38);
        assert!(matches!(
            arena.index_of(NonNull::new(before_start).unwrap()),
            Err(Error::OutOfBounds { .. })
        ));

        let unrelated = Box::new(0_u8);
        assert!(matches!(
            arena.index_of(NonNull::from(&*unrelated)),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn contains() {
        let arena = Arena::new(PoolGeometry::new(37, 16, 2));

        assert!(arena.contains(arena.block_ptr(0)));
        assert!(arena.contains(unsafe { arena.block_ptr(15).byte_add(37) }));
        assert!(!arena.contains(unsafe { arena.block_ptr(15).byte_add(38) }));
    }

    #[test]
    fn empty_arena_contains_nothing() {
        let arena = Arena::new(PoolGeometry::new(8, 0, 16));

        assert_eq!(arena.start.as_ptr().addr() % 16, 0);
        assert!(!arena.contains(arena.start));
        assert!(matches!(
            arena.index_of(arena.start),
            Err(Error::OutOfBounds { pool_len: 0, .. })
        ));
    }

    #[test]
    #[should_panic]
    fn block_ptr_out_of_bounds_panics() {
        let arena = Arena::new(PoolGeometry::new(37, 16, 2));
        let _block = arena.block_ptr(16);
    }
}
