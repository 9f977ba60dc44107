//! Wall-clock helpers for timestamps on metrics and hook payloads.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Used for coarse timestamps (worker `last_active`, hook payloads); all
/// duration arithmetic on the hot path uses `Instant` instead.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        // Sanity: we are past 2020.
        assert!(a > 1_577_836_800_000);
    }
}
