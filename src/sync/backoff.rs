//! Adaptive backoff for contended spin loops.
//!
//! Starts with exponentially increasing bursts of CPU pauses, then falls back
//! to yielding the thread to the OS scheduler once spinning has clearly lost.
//! Every spin site in the crate (spinlock, ring queue, deque) goes through
//! this type rather than open-coding pause loops.

use std::thread;

use super::pad::spin_pause;

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;

/// Exponential backoff state for one acquisition attempt.
///
/// # Examples
///
/// ```
/// use poolx::sync::Backoff;
///
/// let mut backoff = Backoff::new();
/// while backoff.snooze() {
///     // retry the contended operation
///     break;
/// }
/// ```
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    /// Fresh backoff with zero accumulated contention history.
    #[must_use]
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    /// Reset to the initial state after a successful acquisition.
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Spin for `2^step` pauses without ever yielding.
    ///
    /// For waits that are expected to resolve within a few cycles, such as a
    /// ring-queue slot whose sequence number lags by one generation.
    pub fn spin(&mut self) {
        for _ in 0..1u32 << self.step.min(SPIN_LIMIT) {
            spin_pause();
        }
        if self.step <= SPIN_LIMIT {
            self.step += 1;
        }
    }

    /// Spin while cheap, then yield to the OS scheduler.
    ///
    /// Returns `true` while another round of snoozing is still reasonable;
    /// once it returns `false` the caller should park on a real blocking
    /// primitive instead of burning CPU.
    pub fn snooze(&mut self) -> bool {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                spin_pause();
            }
        } else {
            thread::yield_now();
        }
        if self.step <= YIELD_LIMIT {
            self.step += 1;
        }
        self.step <= YIELD_LIMIT
    }

    /// Whether the backoff has escalated past spinning into yields.
    #[must_use]
    pub const fn is_yielding(&self) -> bool {
        self.step > SPIN_LIMIT
    }
}
