//! Worker handle, recycling cache, and the run loop.
//!
//! A worker is a long-lived OS thread that block-receives on a bounded
//! inbox; `None` is the shutdown sentinel. After each task it drains its
//! inbox backlog and local deque, attempts one steal, stamps `last_active`,
//! and re-parks on the pool's idle stack. Exited workers donate their inbox
//! channel and deque back to the cache so a later create skips the
//! allocations.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use super::hooks::{HookEvent, HookKind, TaskInfo, WorkerInfo};
use super::pool::PoolInner;
use super::scheduler::TaskDeque;
use super::stack::IdleWorker;
use super::task::{task_cache, Task, TaskFn};
use crate::sync::BoundedQueue;
use crate::util::clock::now_ms;

/// Inbox depth: room for the hand-off task plus a small backlog, so a send
/// to a just-retrieved worker never suspends.
const INBOX_CAPACITY: usize = 4;

// Recycled channel/deque pairs kept after worker exits.
const MAX_IDLE_WORKERS: usize = 256;

pub(crate) type WorkerMsg = Option<Box<Task>>;

/// Reusable execution context. The handle lives on the idle stack or with
/// the submitter that retrieved it; the paired `Receiver` is owned by the
/// run loop.
pub(crate) struct Worker {
    pub(crate) id: i32,
    pub(crate) inbox: Sender<WorkerMsg>,
    last_active_ms: AtomicU64,
    pub(crate) deque: Option<Arc<TaskDeque>>,
}

impl Worker {
    pub(crate) fn new(id: i32, stealing: bool) -> (Arc<Self>, Receiver<WorkerMsg>) {
        let (inbox, rx) = crossbeam_channel::bounded(INBOX_CAPACITY);
        let worker = Arc::new(Self {
            id,
            inbox,
            last_active_ms: AtomicU64::new(now_ms()),
            deque: stealing.then(|| Arc::new(TaskDeque::new())),
        });
        (worker, rx)
    }

    pub(crate) fn touch(&self) {
        self.last_active_ms.store(now_ms(), Ordering::Relaxed);
    }
}

impl IdleWorker for Worker {
    fn last_active_ms(&self) -> u64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }
}

/// Pool-scoped recycler for worker channel/deque pairs, backed by the
/// lock-free MPMC ring so exiting workers and creating submitters never
/// share a lock. Entries past the ring's capacity are simply dropped.
pub(crate) struct WorkerCache {
    free: BoundedQueue<(Arc<Worker>, Receiver<WorkerMsg>)>,
}

impl WorkerCache {
    pub(crate) fn new() -> Self {
        Self {
            free: BoundedQueue::new(MAX_IDLE_WORKERS),
        }
    }

    pub(crate) fn get(&self) -> Option<(Arc<Worker>, Receiver<WorkerMsg>)> {
        self.free.pop()
    }

    pub(crate) fn put(&self, worker: Arc<Worker>, rx: Receiver<WorkerMsg>) {
        let _ = self.free.push((worker, rx));
    }

    pub(crate) fn warm(&self, n: usize, id_gen: &AtomicI32, stealing: bool) {
        while self.free.len() < n.min(MAX_IDLE_WORKERS) {
            let pair = Worker::new(id_gen.fetch_add(1, Ordering::Relaxed), stealing);
            if self.free.push(pair).is_err() {
                break;
            }
        }
    }

    pub(crate) fn clear(&self) {
        while self.free.pop().is_some() {}
    }
}

thread_local! {
    // (pool identity, deque) of the worker running on this thread, if any.
    static CURRENT_DEQUE: RefCell<Option<(usize, Arc<TaskDeque>)>> = const { RefCell::new(None) };
}

/// If the calling thread is one of `inner`'s workers with a local deque,
/// push the task there; the owner drains it after its current task and
/// siblings can steal it meanwhile. This is also what keeps a recursive
/// submit from deadlocking a saturated pool.
pub(crate) fn try_push_local(inner: &Arc<PoolInner>, task: Box<Task>) -> Result<(), Box<Task>> {
    CURRENT_DEQUE.with(|current| {
        let current = current.borrow();
        match current.as_ref() {
            // The thread-local pair is only set on the owning worker
            // thread, so push_bottom upholds the single-owner contract.
            Some((pool, deque)) if *pool == Arc::as_ptr(inner) as usize => {
                deque.push_bottom(task);
                Ok(())
            }
            _ => Err(task),
        }
    })
}

/// Render a panic payload for logs and hook payloads.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panic".to_string()
    }
}

/// The worker run loop. Exits on the shutdown sentinel, a disconnected
/// inbox, or a failed re-park (pool closed or stack shrunk).
pub(crate) fn run_worker(inner: Arc<PoolInner>, worker: Arc<Worker>, rx: Receiver<WorkerMsg>) {
    let running = inner.worker_count.load(Ordering::Acquire);
    inner.metrics.worker_started(i64::from(running));
    if inner.hooks.has(HookKind::OnWorkerStart) {
        inner.hooks.trigger(
            HookKind::OnWorkerStart,
            &HookEvent::Worker(WorkerInfo {
                id: worker.id,
                running,
            }),
        );
    }
    if let (Some(scheduler), Some(deque)) = (&inner.steal, &worker.deque) {
        scheduler.register(worker.id, Arc::clone(deque));
        let pool_id = Arc::as_ptr(&inner) as usize;
        CURRENT_DEQUE.with(|current| {
            *current.borrow_mut() = Some((pool_id, Arc::clone(deque)));
        });
    }
    debug!(pool = %inner.name, worker_id = worker.id, "worker started");

    'outer: loop {
        let task = match rx.recv() {
            Ok(Some(task)) => task,
            // Sentinel or channel closed: clean exit.
            Ok(None) | Err(_) => break,
        };
        execute_task(&inner, task);

        // Drain the inbox backlog before parking.
        loop {
            match rx.try_recv() {
                Ok(Some(task)) => execute_task(&inner, task),
                Ok(None) => break 'outer,
                Err(_) => break,
            }
        }

        // Drain the local deque, then try one steal from a victim.
        if let Some(deque) = &worker.deque {
            while let Some(task) = deque.pop_bottom() {
                execute_task(&inner, task);
            }
        }
        if let Some(scheduler) = &inner.steal {
            if let Some(task) = scheduler.steal(worker.id, worker.deque.as_deref()) {
                inner.metrics.inc_stolen();
                execute_task(&inner, task);
                // A batched steal may have left work in our own deque.
                if let Some(deque) = &worker.deque {
                    while let Some(task) = deque.pop_bottom() {
                        execute_task(&inner, task);
                    }
                }
            }
        }

        worker.touch();
        if !inner.revert_worker(&worker) {
            break;
        }
    }

    if let Some(scheduler) = &inner.steal {
        scheduler.deregister(worker.id);
        CURRENT_DEQUE.with(|current| {
            *current.borrow_mut() = None;
        });
    }
    if inner.hooks.has(HookKind::OnWorkerStop) {
        inner.hooks.trigger(
            HookKind::OnWorkerStop,
            &HookEvent::Worker(WorkerInfo {
                id: worker.id,
                running: inner.worker_count.load(Ordering::Acquire),
            }),
        );
    }
    debug!(pool = %inner.name, worker_id = worker.id, "worker exiting");

    let still_running = inner.is_running();
    inner.worker_count.fetch_sub(1, Ordering::AcqRel);
    if still_running {
        inner.cache.put(worker, rx);
    }
    // A freed slot may unblock a waiting submitter or the dispatcher.
    let _guard = inner.lock.lock();
    inner.cond.notify_all();
}

/// Run one task: wait-time accounting, `BeforeTask`, execution with panic
/// recovery (optionally under a soft deadline), and completion accounting.
fn execute_task(inner: &Arc<PoolInner>, mut task: Box<Task>) {
    let task_id = task.id;
    let priority = task.priority;
    let timeout = task.timeout;
    let submitted_at = task.submitted_at;
    let closure = task.closure.take();
    task_cache().release(task);
    let Some(closure) = closure else {
        return;
    };

    let started = Instant::now();
    let wait = submitted_at
        .map(|s| started.saturating_duration_since(s))
        .unwrap_or_default();
    inner.metrics.add_wait(wait);
    if inner.hooks.has(HookKind::BeforeTask) {
        inner.hooks.trigger(
            HookKind::BeforeTask,
            &HookEvent::Task(TaskInfo {
                id: task_id,
                priority,
                wait: Some(wait),
                ..TaskInfo::default()
            }),
        );
    }

    match timeout {
        None => run_closure(inner, closure, task_id, priority, wait, started),
        Some(limit) => {
            // Run on a helper thread and wait out the deadline. The engine
            // cannot stop the closure; past the deadline it reports the
            // event and moves on while the helper finishes the accounting
            // whenever the closure returns.
            let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
            let helper_inner = Arc::clone(inner);
            let spawned = thread::Builder::new()
                .name(format!("poolx-deadline-{task_id}"))
                .spawn(move || {
                    run_closure(&helper_inner, closure, task_id, priority, wait, started);
                    let _ = done_tx.send(());
                });
            match spawned {
                Ok(_) => {
                    if done_rx.recv_timeout(limit).is_err() {
                        warn!(
                            pool = %inner.name,
                            task_id,
                            timeout_ms = limit.as_millis() as u64,
                            "task exceeded timeout; closure continues in background"
                        );
                        if inner.hooks.has(HookKind::OnTimeout) {
                            inner.hooks.trigger(
                                HookKind::OnTimeout,
                                &HookEvent::Task(TaskInfo {
                                    id: task_id,
                                    priority,
                                    wait: Some(wait),
                                    ..TaskInfo::default()
                                }),
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(pool = %inner.name, task_id, error = %e, "failed to spawn deadline helper");
                    inner.metrics.inc_failed();
                }
            }
        }
    }
}

fn run_closure(
    inner: &Arc<PoolInner>,
    closure: TaskFn,
    task_id: u64,
    priority: i32,
    wait: std::time::Duration,
    started: Instant,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(closure));
    let exec = started.elapsed();
    inner.metrics.add_exec(exec);

    match result {
        Ok(()) => {
            inner.metrics.inc_completed();
            if inner.hooks.has(HookKind::AfterTask) {
                inner.hooks.trigger(
                    HookKind::AfterTask,
                    &HookEvent::Task(TaskInfo {
                        id: task_id,
                        priority,
                        wait: Some(wait),
                        exec: Some(exec),
                        panic_message: None,
                    }),
                );
            }
        }
        Err(payload) => {
            inner.metrics.inc_failed();
            let message = panic_message(payload.as_ref());
            warn!(pool = %inner.name, task_id, panic = %message, "task panicked; worker recovered");
            if let Some(handler) = &inner.panic_handler {
                let handler = Arc::clone(handler);
                if panic::catch_unwind(AssertUnwindSafe(|| handler(payload.as_ref()))).is_err() {
                    warn!(pool = %inner.name, "panic handler panicked");
                }
            }
            if inner.hooks.has(HookKind::OnPanic) {
                inner.hooks.trigger(
                    HookKind::OnPanic,
                    &HookEvent::Task(TaskInfo {
                        id: task_id,
                        priority,
                        wait: Some(wait),
                        exec: Some(exec),
                        panic_message: Some(message),
                    }),
                );
            }
        }
    }
}
