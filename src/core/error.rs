//! Error types for pool operations.

use thiserror::Error;

/// Errors produced by the pool engine.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is in the closed state; the operation cannot proceed.
    #[error("pool is closed")]
    PoolClosed,
    /// Non-blocking mode or the blocking-submitter cap rejected the task.
    #[error("pool is overloaded")]
    PoolOverload,
    /// A bounded wait (release, future get) elapsed.
    #[error("operation timed out")]
    Timeout,
    /// The future was canceled before its task produced a result.
    #[error("future was canceled")]
    FutureCanceled,
    /// The future's bounded get elapsed before completion.
    #[error("future timed out")]
    FutureTimeout,
    /// A caller-supplied argument was unusable.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    /// The task panicked; the payload message is attached.
    #[error("task failed: {0}")]
    TaskFailed(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(PoolError::PoolClosed.to_string(), "pool is closed");
        assert_eq!(PoolError::PoolOverload.to_string(), "pool is overloaded");
        assert_eq!(
            PoolError::InvalidArg("empty future list".into()).to_string(),
            "invalid argument: empty future list"
        );
        assert_eq!(
            PoolError::InvalidConfig("max_workers must be greater than 0".into()).to_string(),
            "invalid configuration: max_workers must be greater than 0"
        );
    }
}
