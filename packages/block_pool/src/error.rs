use thiserror::Error;

/// Contract violations detected when a block is returned to a pool.
///
/// [`deallocate()`][crate::BlockAllocator::deallocate] treats all of these as fatal and panics.
/// [`try_deallocate()`][crate::BlockAllocator::try_deallocate] reports them to the caller
/// instead, leaving the pool unchanged.
///
/// Running out of blocks is not an error: allocation simply returns `None`.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The pointer does not point into the memory of the pool.
    #[error(
        "pointer {address:#x} is outside the pool memory at {pool_start:#x} of {pool_len} bytes"
    )]
    OutOfBounds {
        /// The address that was returned to the pool.
        address: usize,

        /// The address of the first byte of the pool memory.
        pool_start: usize,

        /// The size of the pool memory in bytes.
        pool_len: usize,
    },

    /// The pointer points into the pool memory but not to the start of a block.
    #[error("pointer at pool offset {offset} is not at the start of a block of stride {stride}")]
    Misaligned {
        /// Byte offset of the pointer from the start of the pool memory.
        offset: usize,

        /// Distance in bytes between the start addresses of adjacent blocks.
        stride: usize,
    },

    /// The block was returned to the pool while it was not allocated.
    ///
    /// Only detected when allocation state [tracking][crate::Tracking] is enabled.
    #[error("block {index} was returned to the pool but it is not allocated")]
    DoubleFree {
        /// Index of the block in the pool.
        index: usize,
    },
}

/// A specialized `Result` type for block pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
