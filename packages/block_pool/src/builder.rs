use std::marker::PhantomData;

use crate::{LockFreePool, LockingPool, PoolGeometry, SlotIndex, Tracking};

/// Builder for creating an instance of [`LockingPool`] or [`LockFreePool`].
///
/// You only need to use this builder if you want to customize the pool configuration beyond
/// its [geometry][PoolGeometry]. Pools created via [`LockingPool::new()`][1] or
/// [`LockFreePool::new()`][2] use the default [tracking][Tracking] level.
///
/// The block size and block count are mandatory, either set individually or together with the
/// alignment via [`geometry()`][Self::geometry]. The alignment defaults to the alignment of
/// `usize`.
///
/// # Examples
///
/// ```
/// use block_pool::{BlockAllocator, LockFreePool, Tracking};
///
/// let pool = LockFreePool::<u16>::builder()
///     .block_size(48)
///     .block_count(1024)
///     .alignment(16)
///     .tracking(Tracking::Enabled)
///     .build_lock_free();
///
/// assert_eq!(pool.geometry().stride(), 48);
/// assert_eq!(pool.capacity(), 1024);
/// ```
///
/// [1]: LockingPool::new
/// [2]: LockFreePool::new
#[must_use]
pub struct PoolBuilder<I: SlotIndex> {
    block_size: Option<usize>,
    block_count: Option<usize>,
    alignment: usize,
    tracking: Tracking,

    _index: PhantomData<I>,
}

impl<I: SlotIndex> std::fmt::Debug for PoolBuilder<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder")
            .field(
                "index_type",
                &std::format_args!("{}", std::any::type_name::<I>()),
            )
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("alignment", &self.alignment)
            .field("tracking", &self.tracking)
            .finish()
    }
}

impl<I: SlotIndex> PoolBuilder<I> {
    /// Creates a builder with no block size or block count set yet.
    pub fn new() -> Self {
        Self {
            block_size: None,
            block_count: None,
            alignment: align_of::<usize>(),
            tracking: Tracking::default(),
            _index: PhantomData,
        }
    }

    /// Sets the block size, block count and alignment all at once.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::{LockingPool, PoolGeometry};
    ///
    /// const GEOMETRY: PoolGeometry = PoolGeometry::new(37, 16, 2);
    ///
    /// let pool = LockingPool::<u8>::builder().geometry(GEOMETRY).build_locking();
    /// ```
    pub fn geometry(mut self, geometry: PoolGeometry) -> Self {
        self.block_size = Some(geometry.block_size());
        self.block_count = Some(geometry.block_count());
        self.alignment = geometry.alignment();
        self
    }

    /// Sets the number of bytes usable in each block. Must be nonzero.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Sets the number of blocks in the pool.
    ///
    /// Zero is permitted; such a pool is always exhausted.
    pub fn block_count(mut self, block_count: usize) -> Self {
        self.block_count = Some(block_count);
        self
    }

    /// Sets the alignment of each block. Must be a power of two.
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Sets whether the pool tracks the allocation state of each block.
    pub fn tracking(mut self, tracking: Tracking) -> Self {
        self.tracking = tracking;
        self
    }

    fn build_geometry(&self) -> PoolGeometry {
        let block_size = self
            .block_size
            .expect("block size must be set before building a block pool");
        let block_count = self
            .block_count
            .expect("block count must be set before building a block pool");

        PoolGeometry::new(block_size, block_count, self.alignment)
    }

    /// Builds a [`LockingPool`] with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the block size or block count has not been set, if the resulting geometry is
    /// invalid (see [`PoolGeometry::new()`]) or if `I` cannot represent the block count.
    #[must_use]
    pub fn build_locking(self) -> LockingPool<I> {
        LockingPool::new_inner(self.build_geometry(), self.tracking)
    }

    /// Builds a [`LockFreePool`] with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the block size or block count has not been set, if the resulting geometry is
    /// invalid (see [`PoolGeometry::new()`]), if `I` cannot represent the block count or if the
    /// block count is 2<sup>24</sup> or more.
    #[must_use]
    pub fn build_lock_free(self) -> LockFreePool<I> {
        LockFreePool::new_inner(self.build_geometry(), self.tracking)
    }
}

impl<I: SlotIndex> Default for PoolBuilder<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::BlockAllocator;

    assert_impl_all!(PoolBuilder<u8>: Send, Sync, std::fmt::Debug, Default);

    #[test]
    fn defaults_alignment_to_usize() {
        let pool = PoolBuilder::<u8>::new()
            .block_size(3)
            .block_count(4)
            .build_locking();

        assert_eq!(pool.geometry().alignment(), align_of::<usize>());
        assert_eq!(pool.geometry().stride(), align_of::<usize>().max(3));
        assert_eq!(pool.tracking(), Tracking::default());
    }

    #[test]
    fn geometry_sets_all_dimensions() {
        let geometry = PoolGeometry::new(37, 16, 2);

        let locking = PoolBuilder::<u16>::new().geometry(geometry).build_locking();
        let lock_free = PoolBuilder::<u16>::new().geometry(geometry).build_lock_free();

        assert_eq!(locking.geometry(), geometry);
        assert_eq!(lock_free.geometry(), geometry);
    }

    #[test]
    fn individual_setters_override_geometry() {
        let pool = PoolBuilder::<u16>::new()
            .geometry(PoolGeometry::new(37, 16, 2))
            .block_count(5)
            .tracking(Tracking::Disabled)
            .build_lock_free();

        assert_eq!(pool.geometry(), PoolGeometry::new(37, 5, 2));
        assert_eq!(pool.tracking(), Tracking::Disabled);
    }

    #[test]
    #[should_panic]
    fn missing_block_size_panics() {
        let _pool = PoolBuilder::<u8>::new().block_count(1).build_locking();
    }

    #[test]
    #[should_panic]
    fn missing_block_count_panics() {
        let _pool = PoolBuilder::<u8>::new().block_size(1).build_lock_free();
    }

    #[test]
    #[should_panic]
    fn invalid_alignment_panics() {
        let _pool = PoolBuilder::<u8>::new()
            .block_size(8)
            .block_count(1)
            .alignment(3)
            .build_locking();
    }

    #[test]
    fn debug_names_index_type() {
        let builder = PoolBuilder::<u32>::new().block_size(8);

        let debug = format!("{builder:?}");
        assert!(debug.contains("u32"));
        assert!(debug.contains("block_size: Some(8)"));
    }
}
