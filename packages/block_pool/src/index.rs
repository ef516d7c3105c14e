use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, Ordering};

/// An unsigned integer type used to store free-list links between pool slots.
///
/// The width of the index type determines how much metadata the pool keeps per slot and the
/// maximum number of slots a pool can have: the type must be able to represent every slot index
/// plus one extra value that marks the end of the free list.
///
/// Implemented for `u8`, `u16` and `u32`. This trait is sealed.
pub trait SlotIndex: Copy + Debug + Eq + Send + Sync + Sealed + 'static {
    /// The atomic counterpart of the index type, used by the lock-free pool.
    #[doc(hidden)]
    type Atomic: Debug + Send + Sync;

    /// The largest value representable by the index type.
    const MAX: usize;

    /// Converts a slot index to the index type.
    ///
    /// # Panics
    ///
    /// Panics if the value does not fit. Pools verify at construction time that every index
    /// they produce fits, so this only fires on internal corruption.
    #[doc(hidden)]
    #[must_use]
    fn from_usize(value: usize) -> Self;

    #[doc(hidden)]
    #[must_use]
    fn to_usize(self) -> usize;

    #[doc(hidden)]
    #[must_use]
    fn new_atomic(value: Self) -> Self::Atomic;

    #[doc(hidden)]
    #[must_use]
    fn load(atomic: &Self::Atomic, ordering: Ordering) -> Self;

    #[doc(hidden)]
    fn store(atomic: &Self::Atomic, value: Self, ordering: Ordering);
}

trait Sealed {}

macro_rules! slot_index {
    ($index:ty, $atomic:ty) => {
        impl Sealed for $index {}

        impl SlotIndex for $index {
            type Atomic = $atomic;

            #[allow(
                clippy::cast_lossless,
                reason = "From is not usable in const context and this is a widening cast"
            )]
            const MAX: usize = <$index>::MAX as usize;

            #[inline]
            fn from_usize(value: usize) -> Self {
                <$index>::try_from(value).expect(
                    "slot index out of range for index type - pool construction guarantees it fits",
                )
            }

            #[inline]
            fn to_usize(self) -> usize {
                usize::try_from(self).expect("slot index types are never wider than usize")
            }

            #[inline]
            fn new_atomic(value: Self) -> Self::Atomic {
                <$atomic>::new(value)
            }

            #[inline]
            fn load(atomic: &Self::Atomic, ordering: Ordering) -> Self {
                atomic.load(ordering)
            }

            #[inline]
            fn store(atomic: &Self::Atomic, value: Self, ordering: Ordering) {
                atomic.store(value, ordering);
            }
        }
    };
}

slot_index!(u8, AtomicU8);
slot_index!(u16, AtomicU16);
slot_index!(u32, AtomicU32);

const _: () = assert!(size_of::<usize>() >= size_of::<u32>());

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn max_matches_integer_max() {
        assert_eq!(<u8 as SlotIndex>::MAX, 255);
        assert_eq!(<u16 as SlotIndex>::MAX, 65_535);
        assert_eq!(<u32 as SlotIndex>::MAX, 4_294_967_295);
    }

    #[test]
    fn usize_conversion() {
        assert_eq!(<u16 as SlotIndex>::from_usize(1234), 1234_u16);
        assert_eq!(SlotIndex::to_usize(1234_u16), 1234);
        assert_eq!(<u8 as SlotIndex>::from_usize(255), 255_u8);
    }

    #[test]
    #[should_panic]
    fn from_usize_out_of_range_panics() {
        let _index = <u8 as SlotIndex>::from_usize(256);
    }

    #[test]
    fn atomic_store_and_load() {
        let atomic = <u32 as SlotIndex>::new_atomic(5);
        assert_eq!(<u32 as SlotIndex>::load(&atomic, Ordering::Relaxed), 5);

        <u32 as SlotIndex>::store(&atomic, 6, Ordering::Relaxed);
        assert_eq!(<u32 as SlotIndex>::load(&atomic, Ordering::Relaxed), 6);
    }
}
