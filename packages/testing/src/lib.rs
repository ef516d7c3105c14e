#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing, benchmarks and examples of the block pool.

use std::ptr::NonNull;
use std::sync::{Barrier, mpsc};
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// If the test takes longer than the timeout to complete, the test fails instead of blocking
/// CI forever. A pool with a broken free list typically manifests as a thread spinning on a
/// compare-and-swap that can never succeed, which this turns into a visible failure.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under
/// Miri, where thread synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog
/// is disabled and the test function is executed directly. This allows mutation
/// testing to properly detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode).
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {timeout:?} timeout");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Runs `f` on `thread_count` threads at once, passing each its thread number
/// in `0..thread_count`.
///
/// All threads wait on a barrier before calling `f`, so the calls overlap as much as the
/// operating system allows. Returns after every thread has finished. A panic on any thread
/// is propagated to the caller.
pub fn run_on_threads<F>(thread_count: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    let barrier = Barrier::new(thread_count);

    thread::scope(|s| {
        for thread_index in 0..thread_count {
            let barrier = &barrier;
            let f = &f;

            s.spawn(move || {
                barrier.wait();
                f(thread_index);
            });
        }
    });
}

/// The byte a test thread writes to a block it holds in a given iteration.
///
/// Never zero. Differs between threads in the same iteration (for up to 255 threads)
/// and between iterations of the same thread that are less than 255 apart.
#[must_use]
pub fn stamp(thread_index: usize, iteration: usize) -> u8 {
    let mixed = thread_index.wrapping_mul(31).wrapping_add(iteration);

    // Range 1..=255, keeping zero for blocks nobody has written to.
    u8::try_from(mixed % 255)
        .expect("remainder of division by 255 always fits in u8")
        .wrapping_add(1)
}

/// Fills `len` bytes starting at `ptr` with `value`.
///
/// # Safety
///
/// The caller must have exclusive access to `len` writable bytes starting at `ptr`.
pub unsafe fn fill_block(ptr: NonNull<u8>, len: usize, value: u8) {
    // SAFETY: Forwarding guarantees from the caller.
    unsafe {
        ptr.as_ptr().write_bytes(value, len);
    }
}

/// Asserts that all `len` bytes starting at `ptr` are equal to `value`.
///
/// # Panics
///
/// Panics with the offset of the first mismatching byte if any byte differs.
///
/// # Safety
///
/// The caller must guarantee that `len` bytes starting at `ptr` are readable and that
/// nobody writes to them for the duration of the call.
pub unsafe fn assert_block_filled(ptr: NonNull<u8>, len: usize, value: u8) {
    // SAFETY: Forwarding guarantees from the caller.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };

    if let Some(offset) = bytes.iter().position(|b| *b != value) {
        panic!(
            "block at {ptr:?} has byte {:#04x} at offset {offset}, expected {value:#04x}",
            bytes.get(offset).copied().unwrap_or_default()
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn watchdog_allows_fast_tests() {
        let result = with_watchdog(|| 42);
        assert_eq!(result, 42);
    }

    #[test]
    fn watchdog_returns_correct_value() {
        let result = with_watchdog(|| "hello world");
        assert_eq!(result, "hello world");
    }

    #[test]
    fn run_on_threads_runs_every_index_once() {
        let seen = AtomicUsize::new(0);

        run_on_threads(5, |index| {
            seen.fetch_or(1 << index, Ordering::Relaxed);
        });

        assert_eq!(seen.load(Ordering::Relaxed), 0b1_1111);
    }

    #[test]
    fn stamp_is_never_zero() {
        for thread_index in 0..8 {
            for iteration in 0..1000 {
                assert_ne!(stamp(thread_index, iteration), 0);
            }
        }
    }

    #[test]
    fn stamp_differs_between_threads() {
        assert_ne!(stamp(0, 7), stamp(1, 7));
        assert_ne!(stamp(2, 7), stamp(3, 7));
    }

    #[test]
    fn fill_then_assert() {
        let mut buffer = [0_u8; 16];
        let ptr = NonNull::from(&mut buffer).cast::<u8>();

        // SAFETY: We own the buffer and it is 16 bytes.
        unsafe {
            fill_block(ptr, 16, 0xAB);
            assert_block_filled(ptr, 16, 0xAB);
        }
    }

    #[test]
    #[should_panic]
    fn assert_detects_mismatch() {
        let mut buffer = [7_u8; 4];
        buffer[2] = 8;
        let ptr = NonNull::from(&mut buffer).cast::<u8>();

        // SAFETY: We own the buffer and it is 4 bytes.
        unsafe {
            assert_block_filled(ptr, 4, 7);
        }
    }
}
