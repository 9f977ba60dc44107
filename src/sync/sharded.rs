//! Sharded counter for write-heavy, read-rarely accumulation.
//!
//! A single atomic counter updated from every worker thread turns into a
//! cache-line ping-pong under load. This counter spreads increments across
//! 32 padded shards and only pays the full fan-in cost on [`load`], which
//! metric snapshots call a few times per second at most.
//!
//! [`load`]: ShardedCounter::load

use std::sync::atomic::{AtomicU64, Ordering};

use super::pad::CachePadded;

const SHARD_COUNT: usize = 32;

/// A 32-shard cache-line-padded accumulator.
///
/// `load` sums the shards without a global snapshot, so concurrent adds may
/// or may not be visible; the total is monotonic, which is all the metric
/// consumers need.
#[derive(Debug)]
pub struct ShardedCounter {
    shards: Box<[CachePadded<AtomicU64>]>,
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedCounter {
    /// Create a counter with all shards at zero.
    #[must_use]
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    // A stack-local's address is a cheap proxy for which core is running us:
    // each thread's stack occupies distinct pages, so the high address bits
    // spread threads across shards with no TLS lookup.
    #[inline]
    fn shard_index() -> usize {
        let probe = 0u8;
        (std::ptr::addr_of!(probe) as usize >> 7) & (SHARD_COUNT - 1)
    }

    /// Add `n` to the shard owned by the calling thread.
    #[inline]
    pub fn add(&self, n: u64) {
        self.shards[Self::shard_index()]
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Increment by one.
    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    /// Sum all shards. Not a point-in-time snapshot, but monotonic.
    #[must_use]
    pub fn load(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .fold(0u64, u64::wrapping_add)
    }

    /// Zero every shard. Callers must ensure no concurrent writers care
    /// about increments lost across the reset (reboot does this under the
    /// pool lock with all workers stopped).
    pub fn reset(&self) {
        for shard in self.shards.iter() {
            shard.store(0, Ordering::Relaxed);
        }
    }
}
