/// Determines whether a pool remembers which blocks are currently allocated.
///
/// With tracking enabled, the pool keeps one flag per block and uses it to detect double frees
/// (and internal corruption that would hand out the same block twice). Without tracking, the
/// pool trusts the caller to only return blocks it currently holds; returning a block twice
/// silently corrupts the free list.
///
/// Pointer validation (bounds and block alignment) is performed regardless of this setting.
///
/// By default, tracking is enabled in debug builds and disabled in release builds.
///
/// # Examples
///
/// ```
/// use block_pool::{BlockAllocator, PoolBuilder, Tracking};
///
/// let pool = PoolBuilder::<u16>::new()
///     .block_size(64)
///     .block_count(128)
///     .alignment(8)
///     .tracking(Tracking::Enabled)
///     .build_lock_free();
///
/// assert_eq!(pool.tracking(), Tracking::Enabled);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Tracking {
    /// The pool tracks the allocation state of every block and panics on double free.
    Enabled,

    /// The pool does not track allocation state.
    Disabled,
}

impl Tracking {
    #[must_use]
    pub(crate) fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl Default for Tracking {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}
