//! End-to-end behavior of both pool variants on a pool of 16 blocks of 37 bytes aligned to 2.

use std::collections::HashSet;
use std::num::NonZero;
use std::ptr::NonNull;

use block_pool::{
    BlockAllocator, Error, LockFreePool, LockingPool, PoolBuilder, PoolGeometry, Tracking,
};

const GEOMETRY: PoolGeometry = PoolGeometry::new(37, 16, 2);

fn pools() -> Vec<(&'static str, Box<dyn BlockAllocator>)> {
    vec![
        (
            "locking",
            Box::new(
                PoolBuilder::<u16>::new()
                    .geometry(GEOMETRY)
                    .tracking(Tracking::Enabled)
                    .build_locking(),
            ),
        ),
        (
            "lock_free",
            Box::new(
                PoolBuilder::<u16>::new()
                    .geometry(GEOMETRY)
                    .tracking(Tracking::Enabled)
                    .build_lock_free(),
            ),
        ),
    ]
}

fn drain(pool: &dyn BlockAllocator) -> Vec<NonNull<u8>> {
    let mut blocks = Vec::new();

    while let Some(block) = pool.allocate() {
        blocks.push(block);
    }

    blocks
}

#[test]
fn geometry_rounds_stride_up_to_alignment() {
    assert_eq!(GEOMETRY.stride(), 38);
    assert_eq!(GEOMETRY.pool_len(), 608);
}

#[test]
fn sixteen_distinct_blocks_spaced_by_stride() {
    for (name, pool) in pools() {
        let blocks = drain(&*pool);
        assert_eq!(blocks.len(), 16, "{name}");

        let addresses = blocks
            .iter()
            .map(|block| block.addr().get())
            .collect::<Vec<_>>();

        let distinct = addresses.iter().copied().collect::<HashSet<_>>();
        assert_eq!(distinct.len(), 16, "{name}");

        let start = *addresses.iter().min().unwrap();
        let end = *addresses.iter().max().unwrap();

        assert_eq!(start % 2, 0, "{name}");
        assert_eq!(end - start, 15 * 38, "{name}");

        for address in &addresses {
            assert_eq!((address - start) % 38, 0, "{name}");
            assert!(*address + 37 <= start + 608, "{name}");
        }

        for block in &blocks {
            assert!(pool.contains(*block), "{name}");
        }
    }
}

#[test]
fn seventeenth_allocation_is_unavailable() {
    for (name, pool) in pools() {
        let _blocks = drain(&*pool);

        assert!(pool.allocate().is_none(), "{name}");
        assert!(pool.is_exhausted(), "{name}");
        assert_eq!(pool.allocated_count(), 16, "{name}");
        assert_eq!(pool.free_count(), 0, "{name}");
    }
}

#[test]
fn full_cycle_can_be_repeated() {
    for (name, pool) in pools() {
        let first_round = drain(&*pool);

        for block in &first_round {
            pool.deallocate(*block);
        }

        assert!(pool.is_empty(), "{name}");
        assert_eq!(pool.free_count(), 16, "{name}");

        let second_round = drain(&*pool);
        assert_eq!(second_round.len(), 16, "{name}");

        // The same blocks come back, in whatever order.
        let first = first_round.into_iter().collect::<HashSet<_>>();
        let second = second_round.into_iter().collect::<HashSet<_>>();
        assert_eq!(first, second, "{name}");
    }
}

#[test]
fn index_of_round_trips_block_addresses() {
    for (name, pool) in pools() {
        let blocks = drain(&*pool);

        let mut indexes = blocks
            .iter()
            .map(|block| pool.index_of(*block).unwrap())
            .collect::<Vec<_>>();
        indexes.sort_unstable();

        assert_eq!(indexes, (0..16).collect::<Vec<_>>(), "{name}");
    }
}

#[test]
fn invalid_pointers_are_rejected() {
    for (name, pool) in pools() {
        let block = pool.allocate().unwrap();

        // One past the end of the pool memory.
        let start = block.addr().get() - pool.index_of(block).unwrap() * 38;
        let past_end = block.with_addr(NonZero::new(start + 608).unwrap());

        assert!(!pool.contains(past_end), "{name}");
        assert!(
            matches!(
                pool.try_deallocate(past_end),
                Err(Error::OutOfBounds { pool_len: 608, .. })
            ),
            "{name}"
        );

        // SAFETY: Offsetting within the same block.
        let inside = unsafe { block.byte_add(20) };
        assert!(pool.contains(inside), "{name}");
        assert_eq!(
            pool.try_deallocate(inside),
            Err(Error::Misaligned {
                offset: pool.index_of(block).unwrap() * 38 + 20,
                stride: 38
            }),
            "{name}"
        );

        pool.deallocate(block);
        assert_eq!(
            pool.try_deallocate(block),
            Err(Error::DoubleFree {
                index: pool.index_of(block).unwrap()
            }),
            "{name}"
        );
        assert!(pool.is_empty(), "{name}");
    }
}

#[test]
fn fresh_blocks_are_zeroed() {
    for (name, pool) in pools() {
        for block in drain(&*pool) {
            // SAFETY: We hold the block and it is 37 bytes.
            let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 37) };
            assert!(bytes.iter().all(|b| *b == 0), "{name}");
        }
    }
}

#[test]
#[should_panic]
fn locking_deallocate_past_end_panics() {
    let pool = LockingPool::<u16>::new(GEOMETRY);
    let block = pool.allocate().unwrap();

    // SAFETY: Only used as an address; never dereferenced.
    pool.deallocate(unsafe { block.byte_add(608) });
}

#[test]
#[should_panic]
fn lock_free_deallocate_past_end_panics() {
    let pool = LockFreePool::<u16>::new(GEOMETRY);
    let block = pool.allocate().unwrap();

    // SAFETY: Only used as an address; never dereferenced.
    pool.deallocate(unsafe { block.byte_add(608) });
}
