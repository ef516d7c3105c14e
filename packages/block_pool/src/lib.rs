#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity pool of equally sized, aligned memory blocks.
//!
//! A block pool reserves one contiguous, zero-initialized memory region at creation and carves it
//! into `block_count` blocks of `block_size` bytes each, every block starting at a multiple of
//! the pool alignment. Allocating and deallocating a block never touches the system allocator;
//! both are constant-time operations on a free list of block indexes.
//!
//! Two variants are provided, with the same contract expressed by the [`BlockAllocator`] trait:
//!
//! * [`LockingPool`] serializes all operations through a mutex.
//! * [`LockFreePool`] updates the head of its free list with compare-and-swap and never blocks.
//!
//! Both reuse returned blocks in last in, first out order, so the most recently freed (and most
//! likely cached) block is handed out next. Exhaustion is an expected condition signaled by
//! [`allocate()`][BlockAllocator::allocate] returning `None`.
//!
//! # Example
//!
//! ```
//! use block_pool::{BlockAllocator, LockFreePool, PoolGeometry};
//!
//! // 16 blocks of 37 bytes, each aligned to 2 bytes. The stride between blocks is 38 bytes.
//! let pool = LockFreePool::<u16>::new(PoolGeometry::new(37, 16, 2));
//!
//! let block = pool.allocate().unwrap();
//! assert_eq!(block.as_ptr() as usize % 2, 0);
//!
//! // SAFETY: The block is 37 bytes and we hold it exclusively.
//! unsafe {
//!     block.as_ptr().write_bytes(0xFF, 37);
//! }
//!
//! pool.deallocate(block);
//!
//! // The block we just returned is the next one handed out.
//! assert_eq!(pool.allocate(), Some(block));
//! ```
//!
//! # Index type
//!
//! The pools are generic over the [`SlotIndex`] type used to store free-list links: `u8`, `u16`
//! or `u32`. A narrower index type reduces the bookkeeping overhead per block. The index type
//! must be able to represent the block count itself, which serves as the end of list marker, so
//! a `u8` pool holds at most 255 blocks.
//!
//! # Allocation state tracking
//!
//! With [`Tracking::Enabled`], the pool remembers which blocks are allocated and detects blocks
//! being returned twice. Pointers that do not point to the start of a block of the pool are
//! always detected. See [`Tracking`].
//!
//! # Metrics
//!
//! The pools report the following events via the [`nm`] crate:
//!
//! * `block_pool_allocations` - a block was handed out.
//! * `block_pool_exhausted` - an allocation found no free block.
//! * `block_pool_deallocations` - a block was returned.
//! * `block_pool_cas_retries` - histogram of compare-and-swap retries per lock-free operation.

mod allocator;
mod arena;
mod builder;
mod error;
mod free_list;
mod geometry;
mod head;
mod index;
mod lock_free;
mod locking;
mod metrics;
mod tracking;

pub use allocator::*;
pub(crate) use arena::*;
pub use builder::*;
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use free_list::*;
pub use geometry::*;
pub use index::SlotIndex;
pub use lock_free::*;
pub use locking::*;
pub use tracking::*;
