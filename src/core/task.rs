//! Task record, per-task options, and the process-wide task cache.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::sync::BoundedQueue;

/// Boxed closure executed by a worker.
pub(crate) type TaskFn = Box<dyn FnOnce() + Send + 'static>;

// Upper bound on recycled task records kept around between bursts.
const MAX_IDLE_TASKS: usize = 1024;

/// Internal task record. Owned by exactly one worker from hand-off until
/// release back into the cache.
pub(crate) struct Task {
    pub(crate) id: u64,
    pub(crate) closure: Option<TaskFn>,
    pub(crate) priority: i32,
    pub(crate) timeout: Option<Duration>,
    /// `None` on the fast path; the wait-time metric then reads as zero.
    pub(crate) submitted_at: Option<Instant>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}

/// Per-submission options for [`submit_with_options`].
///
/// [`submit_with_options`]: crate::Pool::submit_with_options
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use poolx::TaskOptions;
///
/// let opts = TaskOptions::new()
///     .with_priority(10)
///     .with_timeout(Duration::from_secs(2));
/// assert_eq!(opts.priority, 10);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    /// Heap ordering key; higher runs first when the priority queue is on.
    pub priority: i32,
    /// Soft execution deadline; `None` disables timeout signaling.
    pub timeout: Option<Duration>,
    /// Explicit task id; auto-generated when `None`.
    pub id: Option<u64>,
}

impl TaskOptions {
    /// Options with default priority, no timeout, auto id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scheduling priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the soft execution deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Pin the task id instead of drawing from the pool's generator.
    #[must_use]
    pub const fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Process-wide recycler for task records, so steady-state submission does
/// not allocate a fresh `Task` per call. The free list is the lock-free
/// MPMC ring: submitters and workers on different threads recycle records
/// without sharing a lock.
pub(crate) struct TaskCache {
    free: BoundedQueue<Box<Task>>,
}

fn blank_task() -> Box<Task> {
    Box::new(Task {
        id: 0,
        closure: None,
        priority: 0,
        timeout: None,
        submitted_at: None,
    })
}

impl TaskCache {
    fn new() -> Self {
        Self {
            free: BoundedQueue::new(MAX_IDLE_TASKS),
        }
    }

    /// Take a recycled record or allocate one, filling every field.
    pub(crate) fn acquire(
        &self,
        id: u64,
        closure: TaskFn,
        priority: i32,
        timeout: Option<Duration>,
        submitted_at: Option<Instant>,
    ) -> Box<Task> {
        let mut task = self.free.pop().unwrap_or_else(blank_task);
        task.id = id;
        task.closure = Some(closure);
        task.priority = priority;
        task.timeout = timeout;
        task.submitted_at = submitted_at;
        task
    }

    /// Zero the record and return it to the free list; dropped when the
    /// list is already full.
    pub(crate) fn release(&self, mut task: Box<Task>) {
        task.closure = None;
        task.id = 0;
        task.priority = 0;
        task.timeout = None;
        task.submitted_at = None;
        let _ = self.free.push(task);
    }

    /// Pre-populate the free list with `n` records.
    pub(crate) fn warm(&self, n: usize) {
        while self.free.len() < n.min(MAX_IDLE_TASKS) {
            if self.free.push(blank_task()).is_err() {
                break;
            }
        }
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.free.len()
    }
}

/// The shared cache instance.
pub(crate) fn task_cache() -> &'static TaskCache {
    static CACHE: OnceLock<TaskCache> = OnceLock::new();
    CACHE.get_or_init(TaskCache::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_recycles() {
        let cache = TaskCache::new();
        let task = cache.acquire(1, Box::new(|| {}), 5, None, Some(Instant::now()));
        assert_eq!(task.id, 1);
        assert_eq!(task.priority, 5);
        cache.release(task);
        assert_eq!(cache.idle(), 1);

        let task = cache.acquire(2, Box::new(|| {}), 0, None, None);
        assert_eq!(task.id, 2);
        assert_eq!(cache.idle(), 0);
        cache.release(task);
    }

    #[test]
    fn test_release_zeroes_fields() {
        let cache = TaskCache::new();
        let task = cache.acquire(
            9,
            Box::new(|| {}),
            3,
            Some(Duration::from_secs(1)),
            Some(Instant::now()),
        );
        cache.release(task);
        let task = cache.free.pop().unwrap();
        assert_eq!(task.id, 0);
        assert!(task.closure.is_none());
        assert!(task.timeout.is_none());
        assert!(task.submitted_at.is_none());
    }

    #[test]
    fn test_warm() {
        let cache = TaskCache::new();
        cache.warm(16);
        assert_eq!(cache.idle(), 16);
    }

    #[test]
    fn test_options_builder() {
        let opts = TaskOptions::new()
            .with_priority(7)
            .with_timeout(Duration::from_millis(100))
            .with_id(42);
        assert_eq!(opts.priority, 7);
        assert_eq!(opts.timeout, Some(Duration::from_millis(100)));
        assert_eq!(opts.id, Some(42));
    }
}
