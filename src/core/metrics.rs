//! Pool metrics: atomic counters, peak tracking, and derived snapshots.
//!
//! Counters and gauges are plain atomics updated alongside the state change
//! they describe. The two per-task accumulators (total wait, total exec) run
//! through [`ShardedCounter`] because every completed task writes them.
//! Snapshots derive averages, throughput, and success rate at read time.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::sync::ShardedCounter;

#[derive(Debug)]
pub(crate) struct Metrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    stolen: AtomicU64,
    queued: AtomicI64,
    blocking: AtomicI64,
    peak_workers: AtomicI64,
    peak_queued: AtomicI64,
    total_wait_ns: ShardedCounter,
    total_exec_ns: ShardedCounter,
    started_at: Mutex<Instant>,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            stolen: AtomicU64::new(0),
            queued: AtomicI64::new(0),
            blocking: AtomicI64::new(0),
            peak_workers: AtomicI64::new(0),
            peak_queued: AtomicI64::new(0),
            total_wait_ns: ShardedCounter::new(),
            total_exec_ns: ShardedCounter::new(),
            started_at: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_stolen(&self) {
        self.stolen.fetch_add(1, Ordering::Relaxed);
    }

    /// Track the worker-count peak; called with the count after a start.
    pub(crate) fn worker_started(&self, running: i64) {
        self.peak_workers.fetch_max(running, Ordering::Relaxed);
    }

    pub(crate) fn queued_inc(&self) {
        let now = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_queued.fetch_max(now, Ordering::Relaxed);
    }

    pub(crate) fn queued_dec(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn blocking_inc(&self) {
        self.blocking.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn blocking_dec(&self) {
        self.blocking.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn blocking(&self) -> i64 {
        self.blocking.load(Ordering::Relaxed)
    }

    pub(crate) fn add_wait(&self, wait: Duration) {
        self.total_wait_ns.add(wait.as_nanos() as u64);
    }

    pub(crate) fn add_exec(&self, exec: Duration) {
        self.total_exec_ns.add(exec.as_nanos() as u64);
    }

    /// Zero everything; reboot calls this with all workers stopped.
    pub(crate) fn reset(&self) {
        self.submitted.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.stolen.store(0, Ordering::Relaxed);
        self.queued.store(0, Ordering::Relaxed);
        self.blocking.store(0, Ordering::Relaxed);
        self.peak_workers.store(0, Ordering::Relaxed);
        self.peak_queued.store(0, Ordering::Relaxed);
        self.total_wait_ns.reset();
        self.total_exec_ns.reset();
        *self.started_at.lock() = Instant::now();
    }

    /// Build a snapshot. `running` and `idle` are read live from the pool so
    /// the gauge invariant (`running == workerCount`) holds by construction.
    pub(crate) fn snapshot(&self, running: i64, idle: i64) -> MetricsSnapshot {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let finished = completed + failed;
        let total_wait = Duration::from_nanos(self.total_wait_ns.load());
        let total_exec = Duration::from_nanos(self.total_exec_ns.load());
        let uptime = self.started_at.lock().elapsed();
        let secs = uptime.as_secs_f64();

        MetricsSnapshot {
            submitted,
            completed,
            failed,
            rejected,
            stolen: self.stolen.load(Ordering::Relaxed),
            in_flight: submitted.saturating_sub(completed + failed + rejected),
            running_workers: running,
            idle_workers: idle,
            queued_tasks: self.queued.load(Ordering::Relaxed),
            blocking_tasks: self.blocking.load(Ordering::Relaxed),
            peak_workers: self.peak_workers.load(Ordering::Relaxed),
            peak_queued: self.peak_queued.load(Ordering::Relaxed),
            total_wait,
            total_exec,
            avg_wait: if completed > 0 {
                total_wait / completed as u32
            } else {
                Duration::ZERO
            },
            avg_exec: if completed > 0 {
                total_exec / completed as u32
            } else {
                Duration::ZERO
            },
            throughput: if secs > 0.0 {
                completed as f64 / secs
            } else {
                0.0
            },
            success_rate: if finished > 0 {
                completed as f64 / finished as f64
            } else {
                1.0
            },
            uptime,
        }
    }
}

/// Point-in-time view of pool activity with derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Tasks accepted by a submit path.
    pub submitted: u64,
    /// Tasks whose closure returned normally.
    pub completed: u64,
    /// Tasks whose closure panicked.
    pub failed: u64,
    /// Tasks refused by admission control.
    pub rejected: u64,
    /// Tasks taken from another worker's deque.
    pub stolen: u64,
    /// Submitted minus completed, failed, and rejected.
    pub in_flight: u64,
    /// Live worker count.
    pub running_workers: i64,
    /// Workers parked on the idle stack.
    pub idle_workers: i64,
    /// Tasks waiting in the priority queue.
    pub queued_tasks: i64,
    /// Submitters currently blocked waiting for a worker.
    pub blocking_tasks: i64,
    /// Highest worker count observed.
    pub peak_workers: i64,
    /// Highest queue depth observed.
    pub peak_queued: i64,
    /// Accumulated submit-to-start wait across completed tasks.
    pub total_wait: Duration,
    /// Accumulated execution time across completed tasks.
    pub total_exec: Duration,
    /// `total_wait / completed`.
    pub avg_wait: Duration,
    /// `total_exec / completed`.
    pub avg_exec: Duration,
    /// Completed tasks per second since creation or reboot.
    pub throughput: f64,
    /// `completed / (completed + failed)`; 1.0 before any finish.
    pub success_rate: f64,
    /// Time since creation or reboot.
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_flow_into_snapshot() {
        let metrics = Metrics::new();
        for _ in 0..10 {
            metrics.inc_submitted();
        }
        for _ in 0..6 {
            metrics.inc_completed();
        }
        metrics.inc_failed();
        metrics.inc_rejected();
        metrics.add_wait(Duration::from_millis(60));
        metrics.add_exec(Duration::from_millis(120));

        let snap = metrics.snapshot(3, 1);
        assert_eq!(snap.submitted, 10);
        assert_eq!(snap.completed, 6);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.in_flight, 2);
        assert_eq!(snap.running_workers, 3);
        assert_eq!(snap.idle_workers, 1);
        assert_eq!(snap.avg_wait, Duration::from_millis(10));
        assert_eq!(snap.avg_exec, Duration::from_millis(20));
        assert!((snap.success_rate - 6.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_peaks() {
        let metrics = Metrics::new();
        metrics.worker_started(2);
        metrics.worker_started(5);
        metrics.worker_started(3);
        metrics.queued_inc();
        metrics.queued_inc();
        metrics.queued_dec();

        let snap = metrics.snapshot(3, 0);
        assert_eq!(snap.peak_workers, 5);
        assert_eq!(snap.peak_queued, 2);
        assert_eq!(snap.queued_tasks, 1);
    }

    #[test]
    fn test_success_rate_defaults_to_one() {
        let metrics = Metrics::new();
        let snap = metrics.snapshot(0, 0);
        assert!((snap.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(snap.avg_wait, Duration::ZERO);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.inc_submitted();
        metrics.queued_inc();
        metrics.reset();
        let snap = metrics.snapshot(0, 0);
        assert_eq!(snap.submitted, 0);
        assert_eq!(snap.queued_tasks, 0);
        assert_eq!(snap.peak_queued, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        let snap = metrics.snapshot(1, 1);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"running_workers\":1"));
    }
}
