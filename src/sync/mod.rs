//! Low-level concurrency primitives underpinning the pool.
//!
//! Everything here is independent of the engine: cache-line padding and the
//! CPU pause hint, adaptive backoff, a TTAS spinlock, a sharded counter for
//! write-heavy metrics, a bounded MPMC ring queue, and a Chase-Lev
//! work-stealing deque. The pool composes these; applications may use them
//! directly as well.

pub mod backoff;
pub mod deque;
pub mod pad;
pub mod ring;
pub mod sharded;
pub mod spinlock;

pub use backoff::Backoff;
pub use deque::WorkStealingDeque;
pub use pad::{spin_pause, CachePadded};
pub use ring::BoundedQueue;
pub use sharded::ShardedCounter;
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
