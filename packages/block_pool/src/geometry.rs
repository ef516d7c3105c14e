/// Describes how the memory of a block pool is carved up into slots.
///
/// The geometry is fixed for the lifetime of a pool. Every block starts at a multiple of
/// [`stride()`][Self::stride] bytes from the start of the pool, where the stride is the
/// requested block size rounded up to the requested alignment.
///
/// The constructor is a `const fn`, so declaring the geometry as a constant moves parameter
/// validation to compile time:
///
/// ```
/// use block_pool::PoolGeometry;
///
/// const GEOMETRY: PoolGeometry = PoolGeometry::new(37, 16, 2);
///
/// assert_eq!(GEOMETRY.stride(), 38);
/// assert_eq!(GEOMETRY.pool_len(), 608);
/// ```
///
/// ```compile_fail
/// use block_pool::PoolGeometry;
///
/// // Alignment must be a power of two.
/// const GEOMETRY: PoolGeometry = PoolGeometry::new(37, 16, 3);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PoolGeometry {
    block_size: usize,
    block_count: usize,
    alignment: usize,

    /// `block_size` rounded up to a multiple of `alignment`. Distance between adjacent blocks.
    stride: usize,

    /// Total size of the pool memory in bytes, `stride * block_count`.
    pool_len: usize,
}

impl PoolGeometry {
    /// Validates the parameters and derives the block stride and total pool size.
    ///
    /// A `block_count` of zero is permitted and produces a pool that is always exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero, if `alignment` is not a power of two or if the total
    /// pool size would exceed `isize::MAX` bytes. When evaluated in a `const` context, these
    /// conditions are compile errors instead.
    #[must_use]
    pub const fn new(block_size: usize, block_count: usize, alignment: usize) -> Self {
        assert!(block_size > 0, "block pool must have non-zero block size");
        assert!(
            alignment.is_power_of_two(),
            "block pool alignment must be a power of two"
        );

        let stride = round_up(block_size, alignment);

        let Some(pool_len) = stride.checked_mul(block_count) else {
            panic!("block pool size overflows usize");
        };

        // Same as isize::MAX.
        let max_pool_len = usize::MAX >> 1;

        assert!(
            pool_len <= max_pool_len,
            "block pool size must not exceed isize::MAX bytes"
        );

        Self {
            block_size,
            block_count,
            alignment,
            stride,
            pool_len,
        }
    }

    /// The number of bytes requested for each block, before alignment padding.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// The number of blocks in the pool.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    /// The alignment of the start address of every block.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// The distance in bytes between the start addresses of adjacent blocks.
    ///
    /// This is the block size rounded up to the nearest multiple of the alignment.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// The total size of the pool memory in bytes.
    #[must_use]
    pub const fn pool_len(&self) -> usize {
        self.pool_len
    }

    /// Byte offset of the block with the given index from the start of the pool.
    ///
    /// The caller is responsible for `index` being in bounds; an out of bounds index yields an
    /// offset that is past the end of the pool.
    #[must_use]
    pub(crate) const fn offset_of(&self, index: usize) -> usize {
        // Cannot overflow for in-bounds indexes because `pool_len` was checked in the ctor.
        index.wrapping_mul(self.stride)
    }
}

/// Rounds `size` up to the nearest multiple of `alignment`, which must be a power of two.
const fn round_up(size: usize, alignment: usize) -> usize {
    let mask = alignment.wrapping_sub(1);

    let Some(padded) = size.checked_add(mask) else {
        panic!("block size overflows usize when rounded up to alignment");
    };

    padded & !mask
}
