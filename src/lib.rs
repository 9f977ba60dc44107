//! # poolx
//!
//! An in-process worker pool engine: a bounded set of reusable worker
//! threads multiplexed over submitted closures, with a LIFO worker cache,
//! per-worker work-stealing deques, priority admission, and an EMA-driven
//! autoscaler.
//!
//! ## Core mechanisms
//!
//! - **Worker LIFO cache**: idle workers park on a spinlock-guarded stack;
//!   the hottest worker is reused first, and stale workers are reclaimed by
//!   an idle-expiry loop (never below `min_workers`).
//! - **Work stealing**: each worker can carry a Chase-Lev deque; after its
//!   own work drains, a worker steals once from a rotating victim before
//!   parking.
//! - **Priority admission**: an optional thread-safe binary heap orders
//!   tasks by `(priority desc, submitted asc)`; a dispatcher thread hands
//!   them to workers in that order.
//! - **Autoscaling**: an exponential moving average over
//!   `(active + blocking) / max` steps the worker count up and down under
//!   hysteresis and a cooldown.
//! - **Hooks & metrics**: eleven typed lifecycle hooks observe every
//!   transition without blocking the fast path; atomic counters and peaks
//!   feed derived snapshots.
//!
//! ## Quick example
//!
//! ```no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use poolx::{Pool, PoolOptions};
//! use poolx::config::PoolConfig;
//!
//! let pool = Pool::new(
//!     "workers",
//!     PoolOptions::with_config(PoolConfig::new().with_max_workers(4)),
//! ).unwrap();
//!
//! let counter = Arc::new(AtomicU64::new(0));
//! for _ in 0..100 {
//!     let counter = Arc::clone(&counter);
//!     pool.submit(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }).unwrap();
//! }
//!
//! pool.release().unwrap();
//! assert_eq!(counter.load(Ordering::Relaxed), 100);
//! ```
//!
//! Per-task timeouts are soft: the engine reports the expiry through the
//! `OnTimeout` hook and moves on, but it cannot stop a running closure.
//! Closures needing hard cancellation should check a token they capture.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Builders to construct pools from configuration maps.
pub mod builders;
/// Configuration models and validation.
pub mod config;
/// The pool engine: pools, workers, hooks, metrics, futures.
pub mod core;
/// Low-level concurrency primitives (spinlock, ring queue, deque, padding).
pub mod sync;
/// Shared utilities: clock and telemetry helpers.
pub mod util;

pub use self::core::future;
pub use self::core::registry;
pub use self::core::{
    await_all, await_any, await_first, must_get, AppResult, DispatchStrategy, HookEvent, HookKind,
    Hooks, HooksBuilder, MetricsSnapshot, MultiPool, PanicHandler, Pool, PoolError, PoolOptions,
    PoolWithFunc, Promise, ScaleInfo, TaskFuture, TaskInfo, TaskOptions, WorkerInfo,
};
