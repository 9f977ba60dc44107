//! The pool core: admission paths, worker retrieve/revert, and lifecycle.
//!
//! A [`Pool`] multiplexes a bounded set of reusable worker threads over
//! submitted closures. Idle workers park on a LIFO stack; submitters pop
//! the hottest one, create a new worker while under the cap, or block on
//! the pool condition variable. With the priority queue enabled, admission
//! goes through a binary heap drained by a dedicated dispatcher thread in
//! `(priority desc, submitted asc)` order.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use poolx::{Pool, PoolOptions};
//!
//! let pool = Pool::new("example", PoolOptions::new()).unwrap();
//! let counter = Arc::new(AtomicU64::new(0));
//! for _ in 0..100 {
//!     let counter = Arc::clone(&counter);
//!     pool.submit(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }).unwrap();
//! }
//! pool.release().unwrap();
//! assert_eq!(counter.load(Ordering::Relaxed), 100);
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::autoscale::run_autoscaler;
use super::error::PoolError;
use super::future::{Promise, TaskFuture};
use super::hooks::{HookEvent, HookKind, Hooks, TaskInfo};
use super::metrics::{Metrics, MetricsSnapshot};
use super::queue::PriorityTaskQueue;
use super::registry;
use super::scheduler::StealScheduler;
use super::stack::WorkerStack;
use super::task::{task_cache, Task, TaskOptions};
use super::worker::{panic_message, run_worker, try_push_local, Worker, WorkerCache};
use crate::config::PoolConfig;
use crate::util::clock::now_ms;

pub(crate) const STATE_RUNNING: u32 = 0;
pub(crate) const STATE_CLOSED: u32 = 1;

/// User callback invoked with the payload of a recovered task panic.
pub type PanicHandler = Arc<dyn Fn(&(dyn Any + Send)) + Send + Sync + 'static>;

/// How a submit path treats saturation.
#[derive(Clone, Copy)]
pub(crate) enum Admission {
    /// Follow the pool's `non_blocking` / `max_blocking_tasks` settings.
    Configured,
    /// Reject immediately when no worker is available (`try_submit`).
    NonBlocking,
    /// Always block for a worker (`submit_batch` remainder).
    Blocking,
}

/// Construction-time options: the serde config plus the runtime-only hook
/// table and panic handler.
#[derive(Default)]
pub struct PoolOptions {
    pub(crate) config: PoolConfig,
    pub(crate) hooks: Hooks,
    pub(crate) panic_handler: Option<PanicHandler>,
}

impl PoolOptions {
    /// Options with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options wrapping an existing configuration.
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a hook table.
    #[must_use]
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Install a panic handler, invoked under its own recovery guard.
    #[must_use]
    pub fn panic_handler(
        mut self,
        handler: impl Fn(&(dyn Any + Send)) + Send + Sync + 'static,
    ) -> Self {
        self.panic_handler = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolOptions")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}

pub(crate) struct PoolGuarded {
    pub(crate) heartbeat: Option<Sender<()>>,
    pub(crate) aux_handles: Vec<JoinHandle<()>>,
}

pub(crate) struct PoolInner {
    pub(crate) name: String,
    pub(crate) instance: Uuid,
    pub(crate) config: PoolConfig,
    pub(crate) state: AtomicU32,
    pub(crate) worker_count: AtomicI32,
    pub(crate) max_workers: AtomicI32,
    pub(crate) worker_id_gen: AtomicI32,
    pub(crate) task_id_gen: AtomicU64,
    /// Guards the heartbeat and auxiliary thread handles; paired with
    /// `cond` for blocking submitters and the dispatcher. Never held across
    /// task execution.
    pub(crate) lock: Mutex<PoolGuarded>,
    pub(crate) cond: Condvar,
    pub(crate) stack: WorkerStack<Worker>,
    pub(crate) cache: WorkerCache,
    pub(crate) handles: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) metrics: Metrics,
    pub(crate) hooks: Hooks,
    pub(crate) panic_handler: Option<PanicHandler>,
    pub(crate) pq: Option<PriorityTaskQueue>,
    pub(crate) steal: Option<StealScheduler>,
    pub(crate) created_at: Instant,
}

impl PoolInner {
    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        self.task_id_gen.fetch_add(1, Ordering::Relaxed)
    }

    /// Pop the hottest idle worker, or create one under the cap.
    pub(crate) fn retrieve_worker(self: &Arc<Self>) -> Option<Arc<Worker>> {
        if let Some(worker) = self.stack.pop() {
            return Some(worker);
        }
        self.create_worker()
    }

    /// CAS-loop a slot under `max_workers`, then spawn (or recycle) a worker.
    pub(crate) fn create_worker(self: &Arc<Self>) -> Option<Arc<Worker>> {
        loop {
            let count = self.worker_count.load(Ordering::Acquire);
            if count >= self.max_workers.load(Ordering::Acquire) {
                return None;
            }
            if self
                .worker_count
                .compare_exchange(count, count + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let (worker, inbox_rx) = self.cache.get().unwrap_or_else(|| {
            Worker::new(
                self.worker_id_gen.fetch_add(1, Ordering::Relaxed),
                self.config.enable_work_stealing,
            )
        });
        let inner = Arc::clone(self);
        let for_loop = Arc::clone(&worker);
        let spawned = thread::Builder::new()
            .name(format!("poolx-worker-{}", worker.id))
            .spawn(move || run_worker(inner, for_loop, inbox_rx));

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                Some(worker)
            }
            Err(e) => {
                self.worker_count.fetch_sub(1, Ordering::AcqRel);
                error!(pool = %self.name, error = %e, "failed to spawn worker thread");
                None
            }
        }
    }

    /// Create a worker and park it directly on the idle stack (preheat and
    /// autoscale both go through here).
    pub(crate) fn spawn_idle_worker(self: &Arc<Self>) -> bool {
        let Some(worker) = self.create_worker() else {
            return false;
        };
        match self.stack.push(worker) {
            Ok(()) => {
                self.cond.notify_one();
                true
            }
            Err(worker) => {
                // Stack shrank under us (tune); retire the fresh worker.
                let _ = worker.inbox.send(None);
                false
            }
        }
    }

    /// Park a worker after task completion. Returns false when the pool is
    /// closed or the stack is full, in which case the worker exits.
    pub(crate) fn revert_worker(&self, worker: &Arc<Worker>) -> bool {
        worker.touch();
        let guard = self.lock.lock();
        if !self.is_running() {
            return false;
        }
        match self.stack.push(Arc::clone(worker)) {
            Ok(()) => {
                self.cond.notify_one();
                drop(guard);
                true
            }
            Err(_) => false,
        }
    }

    fn task_info(task: &Task) -> TaskInfo {
        TaskInfo {
            id: task.id,
            priority: task.priority,
            ..TaskInfo::default()
        }
    }

    fn reject_task(&self, task: Box<Task>) -> PoolError {
        self.metrics.inc_rejected();
        if self.hooks.has(HookKind::OnReject) {
            self.hooks
                .trigger(HookKind::OnReject, &HookEvent::Task(Self::task_info(&task)));
        }
        debug!(pool = %self.name, task_id = task.id, "task rejected");
        task_cache().release(task);
        PoolError::PoolOverload
    }

    fn hand_off(&self, worker: &Arc<Worker>, task: Box<Task>) -> Result<(), PoolError> {
        if let Err(e) = worker.inbox.send(Some(task)) {
            // Only possible when the worker thread died mid-release.
            if let Some(task) = e.into_inner() {
                task_cache().release(task);
            }
            error!(pool = %self.name, worker_id = worker.id, "worker inbox disconnected");
            return Err(PoolError::PoolClosed);
        }
        Ok(())
    }

    /// Shared admission skeleton for every submit path.
    pub(crate) fn submit_task(
        self: &Arc<Self>,
        mut task: Box<Task>,
        admission: Admission,
    ) -> Result<(), PoolError> {
        if !self.is_running() {
            task_cache().release(task);
            return Err(PoolError::PoolClosed);
        }
        self.metrics.inc_submitted();
        if self.hooks.has(HookKind::BeforeSubmit) {
            self.hooks.trigger(
                HookKind::BeforeSubmit,
                &HookEvent::Task(Self::task_info(&task)),
            );
        }

        // Priority admission: everything goes through the heap; the
        // dispatcher thread performs the worker hand-off in heap order.
        if let Some(pq) = &self.pq {
            let info = Self::task_info(&task);
            return match pq.push(task) {
                Ok(()) => {
                    self.metrics.queued_inc();
                    if self.hooks.has(HookKind::AfterSubmit) {
                        self.hooks
                            .trigger(HookKind::AfterSubmit, &HookEvent::Task(info));
                    }
                    Ok(())
                }
                Err(task) => Err(self.reject_task(task)),
            };
        }

        if let Some(worker) = self.retrieve_worker() {
            // AfterSubmit precedes the hand-off so the per-task hook order
            // stays fixed relative to BeforeTask.
            if self.hooks.has(HookKind::AfterSubmit) {
                self.hooks
                    .trigger(HookKind::AfterSubmit, &HookEvent::Task(Self::task_info(&task)));
            }
            return self.hand_off(&worker, task);
        }

        // Saturated. A submit arriving from one of our own worker threads
        // goes to that worker's local deque instead of blocking: the owner
        // drains it after its current task and siblings can steal it.
        if self.steal.is_some() {
            let info = Self::task_info(&task);
            match try_push_local(self, task) {
                Ok(()) => {
                    if self.hooks.has(HookKind::AfterSubmit) {
                        self.hooks
                            .trigger(HookKind::AfterSubmit, &HookEvent::Task(info));
                    }
                    return Ok(());
                }
                Err(returned) => task = returned,
            }
        }

        let non_blocking = match admission {
            Admission::NonBlocking => true,
            Admission::Blocking => false,
            Admission::Configured => self.config.non_blocking,
        };
        let cap_hit = !matches!(admission, Admission::Blocking)
            && self.config.max_blocking_tasks > 0
            && self.metrics.blocking() >= self.config.max_blocking_tasks as i64;
        if non_blocking || cap_hit {
            return Err(self.reject_task(task));
        }

        // Blocking wait: re-check state under the lock, grab a worker or
        // sleep until a revert or exit signals capacity.
        self.metrics.blocking_inc();
        let worker = loop {
            let mut guard = self.lock.lock();
            if !self.is_running() {
                drop(guard);
                self.metrics.blocking_dec();
                task_cache().release(task);
                return Err(PoolError::PoolClosed);
            }
            if let Some(worker) = self.stack.pop() {
                break worker;
            }
            if let Some(worker) = self.create_worker() {
                break worker;
            }
            self.cond.wait(&mut guard);
        };
        self.metrics.blocking_dec();
        if self.hooks.has(HookKind::AfterSubmit) {
            self.hooks
                .trigger(HookKind::AfterSubmit, &HookEvent::Task(Self::task_info(&task)));
        }
        self.hand_off(&worker, task)
    }

    /// Start the heartbeat and the expiry / autoscaler / dispatcher threads.
    pub(crate) fn start_background(self: &Arc<Self>, guarded: &mut PoolGuarded) {
        let (beat_tx, beat_rx) = crossbeam_channel::bounded::<()>(0);
        guarded.heartbeat = Some(beat_tx);

        let expiry_inner = Arc::clone(self);
        let expiry_rx = beat_rx.clone();
        match thread::Builder::new()
            .name(format!("poolx-expiry-{}", self.name))
            .spawn(move || run_expiry(expiry_inner, expiry_rx))
        {
            Ok(handle) => guarded.aux_handles.push(handle),
            Err(e) => warn!(pool = %self.name, error = %e, "failed to spawn expiry thread"),
        }

        if self.config.enable_auto_scale {
            let scaler_inner = Arc::clone(self);
            let scaler_rx = beat_rx.clone();
            match thread::Builder::new()
                .name(format!("poolx-scaler-{}", self.name))
                .spawn(move || run_autoscaler(scaler_inner, scaler_rx))
            {
                Ok(handle) => guarded.aux_handles.push(handle),
                Err(e) => warn!(pool = %self.name, error = %e, "failed to spawn autoscaler"),
            }
        }

        if self.pq.is_some() {
            let dispatch_inner = Arc::clone(self);
            match thread::Builder::new()
                .name(format!("poolx-dispatch-{}", self.name))
                .spawn(move || run_dispatcher(dispatch_inner))
            {
                Ok(handle) => guarded.aux_handles.push(handle),
                Err(e) => warn!(pool = %self.name, error = %e, "failed to spawn dispatcher"),
            }
        }
    }

    pub(crate) fn preheat(self: &Arc<Self>) {
        for _ in 0..self.config.min_workers {
            if !self.spawn_idle_worker() {
                break;
            }
        }
    }

    pub(crate) fn release_with_deadline(
        &self,
        deadline: Option<Instant>,
    ) -> Result<(), PoolError> {
        if self
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }
        info!(pool = %self.name, "releasing pool");

        if let Some(pq) = &self.pq {
            pq.mark_done();
            while let Some(task) = pq.pop() {
                self.metrics.queued_dec();
                task_cache().release(task);
            }
        }

        // Dropping the heartbeat sender unblocks the expiry and autoscaler
        // loops; the broadcast wakes blocked submitters and the dispatcher.
        let aux = {
            let mut guarded = self.lock.lock();
            guarded.heartbeat.take();
            self.cond.notify_all();
            std::mem::take(&mut guarded.aux_handles)
        };

        // Busy workers re-park on completion, so keep draining until the
        // count reaches zero.
        loop {
            while let Some(worker) = self.stack.pop() {
                let _ = worker.inbox.send(None);
            }
            let remaining = self.worker_count.load(Ordering::Acquire);
            if remaining == 0 {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    warn!(pool = %self.name, remaining, "release timed out with workers still running");
                    return Err(PoolError::Timeout);
                }
            }
            thread::sleep(Duration::from_millis(1));
        }

        for handle in aux {
            let _ = handle.join();
        }
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
        self.cache.clear();
        registry::unregister(&self.name);
        info!(pool = %self.name, "pool released");
        Ok(())
    }
}

/// Idle-expiry loop: every `worker_expiry`, reclaim workers idle past the
/// deadline, clamped so the pool never drops below `min_workers`.
fn run_expiry(inner: Arc<PoolInner>, heartbeat: Receiver<()>) {
    let expiry = inner.config.worker_expiry;
    loop {
        match heartbeat.recv_timeout(expiry) {
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                let min = inner.config.min_workers as i32;
                let count = inner.worker_count.load(Ordering::Acquire);
                let reclaimable = count.saturating_sub(min).max(0) as usize;
                let expired = inner.stack.retrieve_expiry(expiry, now_ms(), reclaimable);
                if !expired.is_empty() {
                    debug!(
                        pool = %inner.name,
                        reclaimed = expired.len(),
                        "reclaiming idle workers"
                    );
                    for worker in expired {
                        let _ = worker.inbox.send(None);
                    }
                }
            }
            // Heartbeat dropped: the pool is releasing.
            _ => return,
        }
    }
}

/// Priority dispatcher: waits for an open worker slot, pops the
/// highest-priority task, and hands it off. Waiting for the slot *before*
/// popping lets a burst of submissions settle into heap order.
fn run_dispatcher(inner: Arc<PoolInner>) {
    let Some(pq) = inner.pq.as_ref() else {
        return;
    };
    debug!(pool = %inner.name, "priority dispatcher started");
    'outer: loop {
        {
            let mut guard = inner.lock.lock();
            loop {
                if !inner.is_running() {
                    break 'outer;
                }
                let has_slot = inner.stack.len() > 0
                    || inner.worker_count.load(Ordering::Acquire)
                        < inner.max_workers.load(Ordering::Acquire);
                if has_slot {
                    break;
                }
                inner.cond.wait(&mut guard);
            }
        }

        let Some(task) = pq.pop_wait() else {
            // Done flag set: pool is releasing.
            break;
        };
        inner.metrics.queued_dec();

        let mut pending = Some(task);
        let worker = loop {
            if !inner.is_running() {
                if let Some(task) = pending.take() {
                    task_cache().release(task);
                }
                break 'outer;
            }
            if let Some(worker) = inner.retrieve_worker() {
                break worker;
            }
            let mut guard = inner.lock.lock();
            let saturated = inner.stack.len() == 0
                && inner.worker_count.load(Ordering::Acquire)
                    >= inner.max_workers.load(Ordering::Acquire);
            if saturated && inner.is_running() {
                inner.cond.wait(&mut guard);
            }
        };
        let task = pending.take().expect("task pending");
        let _ = inner.hand_off(&worker, task);
    }
    debug!(pool = %inner.name, "priority dispatcher exiting");
}

/// A handle to a worker pool. Cheap to clone; all clones drive the same
/// engine. The pool stays registered under its name until [`release`].
///
/// [`release`]: Pool::release
#[derive(Clone)]
pub struct Pool {
    pub(crate) inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool, register it under `name`, and preheat `min_workers`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when validation fails; `InvalidArg` when the name is
    /// already registered.
    pub fn new(name: impl Into<String>, options: PoolOptions) -> Result<Self, PoolError> {
        crate::util::telemetry::init_tracing();
        let name = name.into();
        let PoolOptions {
            config,
            hooks,
            panic_handler,
        } = options;
        config.validate().map_err(PoolError::InvalidConfig)?;

        let inner = Arc::new(PoolInner {
            instance: Uuid::new_v4(),
            state: AtomicU32::new(STATE_RUNNING),
            worker_count: AtomicI32::new(0),
            max_workers: AtomicI32::new(config.max_workers as i32),
            worker_id_gen: AtomicI32::new(0),
            task_id_gen: AtomicU64::new(0),
            lock: Mutex::new(PoolGuarded {
                heartbeat: None,
                aux_handles: Vec::new(),
            }),
            cond: Condvar::new(),
            stack: WorkerStack::new(config.max_workers),
            cache: WorkerCache::new(),
            handles: Mutex::new(Vec::new()),
            metrics: Metrics::new(),
            hooks,
            panic_handler,
            pq: config
                .enable_priority_queue
                .then(|| PriorityTaskQueue::new(config.queue_size)),
            steal: config
                .enable_work_stealing
                .then(|| StealScheduler::new(config.steal_batch_size)),
            created_at: Instant::now(),
            name,
            config,
        });

        let pool = Pool {
            inner: Arc::clone(&inner),
        };
        if !registry::register(&inner.name, pool.clone()) {
            return Err(PoolError::InvalidArg(format!(
                "pool name `{}` already registered",
                inner.name
            )));
        }

        if inner.config.pre_alloc {
            task_cache().warm(inner.config.queue_size);
            inner.cache.warm(
                inner.config.max_workers,
                &inner.worker_id_gen,
                inner.config.enable_work_stealing,
            );
        }

        {
            let mut guarded = inner.lock.lock();
            inner.start_background(&mut guarded);
        }
        inner.preheat();

        info!(
            pool = %inner.name,
            instance = %inner.instance,
            max_workers = inner.config.max_workers,
            min_workers = inner.config.min_workers,
            "pool created"
        );
        Ok(pool)
    }

    /// The registered pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn needs_eager_timestamp(&self) -> bool {
        self.inner.pq.is_some()
            || !self.inner.hooks.is_empty()
            || self.inner.config.max_blocking_tasks > 0
            || self.inner.config.non_blocking
    }

    /// Submit a closure for execution.
    ///
    /// # Errors
    ///
    /// `PoolClosed` after release; `PoolOverload` in non-blocking mode or
    /// when the blocking cap is hit.
    pub fn submit<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        // Fast path skips the timestamp when nothing will read it.
        let submitted_at = self.needs_eager_timestamp().then(Instant::now);
        let task = task_cache().acquire(
            self.inner.next_task_id(),
            Box::new(f),
            0,
            None,
            submitted_at,
        );
        self.inner.submit_task(task, Admission::Configured)
    }

    /// Submit with per-task priority, timeout, or pinned id.
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit).
    pub fn submit_with_options<F>(&self, f: F, options: TaskOptions) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = options.id.unwrap_or_else(|| self.inner.next_task_id());
        let task = task_cache().acquire(
            id,
            Box::new(f),
            options.priority,
            options.timeout,
            Some(Instant::now()),
        );
        self.inner.submit_task(task, Admission::Configured)
    }

    /// Submit without ever blocking; false on rejection or closed pool.
    pub fn try_submit<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let submitted_at = self.needs_eager_timestamp().then(Instant::now);
        let task = task_cache().acquire(
            self.inner.next_task_id(),
            Box::new(f),
            0,
            None,
            submitted_at,
        );
        self.inner
            .submit_task(task, Admission::NonBlocking)
            .is_ok()
    }

    /// Submit a batch, blocking for capacity even in non-blocking mode.
    ///
    /// # Errors
    ///
    /// Stops at the first failure (in practice `PoolClosed`); tasks already
    /// submitted keep running.
    pub fn submit_batch<F>(&self, closures: Vec<F>) -> Result<usize, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut submitted = 0;
        for f in closures {
            let task = task_cache().acquire(
                self.inner.next_task_id(),
                Box::new(f),
                0,
                None,
                Some(Instant::now()),
            );
            self.inner.submit_task(task, Admission::Blocking)?;
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Submit and block until the closure has finished (or its panic has
    /// been recovered).
    ///
    /// # Errors
    ///
    /// Admission errors as [`submit`](Self::submit); `TaskFailed` when the
    /// closure panicked.
    pub fn submit_wait<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_future(f)?.get()
    }

    /// Submit a closure returning a value, observed through a
    /// [`TaskFuture`].
    ///
    /// # Errors
    ///
    /// Admission errors as [`submit`](Self::submit).
    pub fn submit_future<T, F>(&self, f: F) -> Result<TaskFuture<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (promise, future) = Promise::new();
        self.submit(move || {
            if promise.is_canceled() {
                return;
            }
            match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    promise.complete(value);
                }
                Err(payload) => {
                    promise.fail(panic_message(&payload));
                    // Re-raise so the worker's recovery path records the
                    // failure and runs the panic hooks.
                    panic::resume_unwind(payload);
                }
            }
        })?;
        Ok(future)
    }

    /// Live worker count.
    #[must_use]
    pub fn running(&self) -> i32 {
        self.inner.worker_count.load(Ordering::Acquire)
    }

    /// Workers parked on the idle stack.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.stack.len()
    }

    /// Remaining worker slots under the current cap.
    #[must_use]
    pub fn free(&self) -> i32 {
        (self.cap() - self.running()).max(0)
    }

    /// Current `max_workers` value.
    #[must_use]
    pub fn cap(&self) -> i32 {
        self.inner.max_workers.load(Ordering::Acquire)
    }

    /// Whether the pool has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.inner.is_running()
    }

    /// Point-in-time metrics with derived rates.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner
            .metrics
            .snapshot(self.running() as i64, self.idle() as i64)
    }

    /// Resize the worker cap. Shrinking terminates idle workers until the
    /// count fits; active workers finish their task first and exit when
    /// they fail to re-park on the smaller stack.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when `new_cap` is zero.
    pub fn tune(&self, new_cap: usize) -> Result<(), PoolError> {
        if new_cap == 0 {
            return Err(PoolError::InvalidArg("tune cap must be positive".into()));
        }
        let inner = &self.inner;
        let guard = inner.lock.lock();
        let new = new_cap as i32;
        let old = inner.max_workers.swap(new, Ordering::AcqRel);
        let evicted = inner.stack.set_capacity(new_cap);
        // Signaled workers exit asynchronously; count them so the drain
        // below does not overshoot past the new cap.
        let mut signaled = evicted.len() as i32;
        for worker in evicted {
            let _ = worker.inbox.send(None);
        }
        while inner.worker_count.load(Ordering::Acquire) - signaled > new {
            match inner.stack.pop() {
                Some(worker) => {
                    let _ = worker.inbox.send(None);
                    signaled += 1;
                }
                None => break,
            }
        }
        if new > old {
            inner.cond.notify_all();
        }
        drop(guard);
        debug!(pool = %inner.name, from = old, to = new, "pool tuned");
        Ok(())
    }

    /// Close the pool, terminate all workers, and unregister the name.
    /// Idempotent; blocks until every worker thread has exited.
    ///
    /// # Errors
    ///
    /// None in practice; the signature matches [`release_timeout`].
    ///
    /// [`release_timeout`]: Self::release_timeout
    pub fn release(&self) -> Result<(), PoolError> {
        self.inner.release_with_deadline(None)
    }

    /// As [`release`](Self::release), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// `Timeout` when workers are still running at the deadline; the pool
    /// stays closed and stragglers exit as they finish.
    pub fn release_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.inner
            .release_with_deadline(Some(Instant::now() + timeout))
    }

    /// Reopen a released pool: fresh metrics, queue, and preheated workers.
    /// Observationally equivalent to a new pool except for `created_at`.
    ///
    /// # Errors
    ///
    /// None in practice; idempotent on a running pool.
    pub fn reboot(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(
                STATE_CLOSED,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }
        {
            let mut guarded = inner.lock.lock();
            inner.metrics.reset();
            let _ = inner
                .stack
                .set_capacity(inner.max_workers.load(Ordering::Acquire) as usize);
            if let Some(pq) = &inner.pq {
                pq.reset();
            }
            inner.start_background(&mut guarded);
        }
        if !registry::register(&inner.name, self.clone()) {
            warn!(pool = %inner.name, "name re-registered by another pool; reboot continues unregistered");
        }
        inner.preheat();
        info!(pool = %inner.name, "pool rebooted");
        Ok(())
    }

    /// Uptime since construction (not reset by reboot).
    #[must_use]
    pub fn created_at_elapsed(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    pub(crate) fn load_score(&self) -> i64 {
        self.running() as i64 + self.inner.metrics.blocking()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("running", &self.running())
            .field("idle", &self.idle())
            .field("cap", &self.cap())
            .field("closed", &self.is_closed())
            .finish()
    }
}
