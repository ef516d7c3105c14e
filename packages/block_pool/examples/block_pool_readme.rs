//! Example that demonstrates the basic usage of both block pool variants.
//!
//! Blocks are handed out as raw pointers to zeroed memory. The pool does not know what you store
//! in them; it only guarantees that no block is handed out twice until it is returned.

use std::thread;

use block_pool::{BlockAllocator, LockFreePool, LockingPool, PoolGeometry};

/// 16 blocks of 37 bytes aligned to 2 bytes, so consecutive blocks are 38 bytes apart.
const GEOMETRY: PoolGeometry = PoolGeometry::new(37, 16, 2);

fn main() {
    println!("=== Block Pool README Example ===");

    let pool = LockingPool::<u8>::new(GEOMETRY);

    let first = pool.allocate().expect("fresh pool has free blocks");
    let second = pool.allocate().expect("fresh pool has free blocks");

    println!(
        "Allocated blocks {} and {}, {} bytes apart",
        pool.index_of(first).unwrap(),
        pool.index_of(second).unwrap(),
        second.addr().get() - first.addr().get()
    );

    // SAFETY: We hold the block exclusively and it is 37 bytes.
    unsafe {
        first.as_ptr().write_bytes(0x42, 37);
    }

    pool.deallocate(first);
    pool.deallocate(second);

    // Exhaustion is not an error, it is just an empty result.
    let held = (0..GEOMETRY.block_count())
        .map(|_| pool.allocate().expect("all blocks were returned"))
        .collect::<Vec<_>>();

    assert!(pool.allocate().is_none());
    println!("Pool exhausted after {} allocations", held.len());

    for block in held {
        pool.deallocate(block);
    }

    // The lock-free variant can be shared between threads without any lock.
    let pool = LockFreePool::<u8>::new(GEOMETRY);

    thread::scope(|s| {
        for value in 1..=4_u8 {
            let pool = &pool;

            s.spawn(move || {
                for _ in 0..1000 {
                    let block = pool.allocate().expect("4 threads never hold more than 16 blocks");

                    // SAFETY: We hold the block exclusively and it is 37 bytes.
                    unsafe {
                        block.as_ptr().write_bytes(value, 37);
                        assert_eq!(block.as_ptr().add(36).read(), value);
                    }

                    pool.deallocate(block);
                }
            });
        }
    });

    println!(
        "Lock-free pool has {} of {} blocks free after the threads finished",
        pool.free_count(),
        pool.capacity()
    );

    println!("README example completed successfully!");
}
