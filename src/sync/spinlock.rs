//! Adaptive test-and-test-and-set spinlock.
//!
//! Built as a [`lock_api::RawMutex`] so it gets the same guard-based API as
//! the `parking_lot` locks used elsewhere in the crate. The lock spins with
//! exponential backoff on the *read* of the flag (TTAS) and only attempts
//! the atomic swap when the flag was observed clear, which keeps the cache
//! line in shared state under contention. After the spin budget is exhausted
//! it yields to the OS scheduler between attempts.
//!
//! Intended for critical sections of a few dozen instructions, such as the
//! worker stack's push/pop. Anything that can block for longer uses
//! `parking_lot::Mutex` instead.
//!
//! # Examples
//!
//! ```
//! use poolx::sync::SpinLock;
//!
//! let lock = SpinLock::new(0u32);
//! *lock.lock() += 1;
//! assert_eq!(*lock.lock(), 1);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use lock_api::{GuardSend, RawMutex};

use super::backoff::Backoff;

/// Raw TTAS lock state; use through [`SpinLock`].
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

unsafe impl RawMutex for RawSpinLock {
    // lock_api requires this associated const as the initializer.
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        let mut backoff = Backoff::new();
        loop {
            if self.try_lock() {
                return;
            }
            // Wait on loads only; the swap above is retried once the line
            // is observed unlocked.
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    fn try_lock(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Spinlock-protected value with RAII guards.
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// Guard returned by [`SpinLock::lock`].
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock() {
        let lock = SpinLock::new(5);
        {
            let mut guard = lock.lock();
            *guard = 10;
        }
        assert_eq!(*lock.lock(), 10);
    }

    #[test]
    fn test_try_lock_contended() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_concurrent_increments() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = vec![];

        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    *lock.lock() += 1;
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), 80_000);
    }
}
