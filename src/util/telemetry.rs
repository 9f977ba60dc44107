//! Telemetry bootstrap for structured logging.
//!
//! Pool construction funnels through [`init_tracing`] so lifecycle events
//! (creation with the instance id, worker start/stop, release) are visible
//! even when the host application never set up `tracing` itself. An
//! application that installed its own subscriber always wins; this helper
//! backs off as soon as a dispatcher exists.

use tracing::debug;

/// Install a default env-filtered fmt subscriber if none is set.
///
/// Returns true when this call installed the subscriber, false when a
/// dispatcher was already in place. Safe to call from every pool
/// constructor; only the first caller in the process does any work.
pub fn init_tracing() -> bool {
    if tracing::dispatcher::has_been_set() {
        return false;
    }
    let installed = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .is_ok();
    if installed {
        debug!(
            engine = env!("CARGO_PKG_NAME"),
            version = env!("CARGO_PKG_VERSION"),
            "default telemetry subscriber installed"
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        assert!(tracing::dispatcher::has_been_set());
        // A dispatcher now exists, so a repeat call must back off.
        assert!(!init_tracing());
        assert!(!init_tracing());
    }
}
