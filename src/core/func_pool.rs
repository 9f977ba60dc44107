//! Pool variant specialized to a single handler closure.
//!
//! `PoolWithFunc` fixes the handler at construction; callers submit only an
//! argument, which travels over the worker's arg channel with no per-task
//! record at all. Metrics and hooks follow the same contracts as [`Pool`];
//! autoscaling, the priority queue, and work stealing are not supported in
//! this variant.
//!
//! [`Pool`]: crate::Pool

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::error::PoolError;
use super::hooks::{HookEvent, HookKind, Hooks, TaskInfo, WorkerInfo};
use super::metrics::{Metrics, MetricsSnapshot};
use super::pool::{PanicHandler, PoolOptions, STATE_CLOSED, STATE_RUNNING};
use super::stack::{IdleWorker, WorkerStack};
use super::worker::panic_message;
use crate::config::PoolConfig;
use crate::util::clock::now_ms;

const INBOX_CAPACITY: usize = 4;

struct FuncWorker<A> {
    id: i32,
    inbox: Sender<Option<A>>,
    last_active_ms: AtomicU64,
}

impl<A> FuncWorker<A> {
    fn new(id: i32) -> (Arc<Self>, Receiver<Option<A>>) {
        let (inbox, rx) = crossbeam_channel::bounded(INBOX_CAPACITY);
        (
            Arc::new(Self {
                id,
                inbox,
                last_active_ms: AtomicU64::new(now_ms()),
            }),
            rx,
        )
    }

    fn touch(&self) {
        self.last_active_ms.store(now_ms(), Ordering::Relaxed);
    }
}

impl<A> IdleWorker for FuncWorker<A> {
    fn last_active_ms(&self) -> u64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }
}

struct FuncGuarded {
    heartbeat: Option<Sender<()>>,
    aux_handles: Vec<JoinHandle<()>>,
}

struct FuncInner<A: Send + 'static> {
    name: String,
    config: PoolConfig,
    handler: Arc<dyn Fn(A) + Send + Sync + 'static>,
    state: AtomicU32,
    worker_count: AtomicI32,
    max_workers: AtomicI32,
    worker_id_gen: AtomicI32,
    task_id_gen: AtomicU64,
    lock: Mutex<FuncGuarded>,
    cond: Condvar,
    stack: WorkerStack<FuncWorker<A>>,
    cache: Mutex<Vec<(Arc<FuncWorker<A>>, Receiver<Option<A>>)>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    metrics: Metrics,
    hooks: Hooks,
    panic_handler: Option<PanicHandler>,
}

impl<A: Send + 'static> FuncInner<A> {
    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    fn retrieve_worker(self: &Arc<Self>) -> Option<Arc<FuncWorker<A>>> {
        if let Some(worker) = self.stack.pop() {
            return Some(worker);
        }
        self.create_worker()
    }

    fn create_worker(self: &Arc<Self>) -> Option<Arc<FuncWorker<A>>> {
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

        let (worker, rx) = self
            .cache
            .lock()
            .pop()
            .unwrap_or_else(|| FuncWorker::new(self.worker_id_gen.fetch_add(1, Ordering::Relaxed)));
        let inner = Arc::clone(self);
        let for_loop = Arc::clone(&worker);
        let spawned = thread::Builder::new()
            .name(format!("poolx-func-worker-{}", worker.id))
            .spawn(move || run_func_worker(inner, for_loop, rx));

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                Some(worker)
            }
            Err(e) => {
                self.worker_count.fetch_sub(1, Ordering::AcqRel);
                warn!(pool = %self.name, error = %e, "failed to spawn worker thread");
                None
            }
        }
    }

    fn revert_worker(&self, worker: &Arc<FuncWorker<A>>) -> bool {
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

    fn reject(&self, task_id: u64) -> PoolError {
        self.metrics.inc_rejected();
        if self.hooks.has(HookKind::OnReject) {
            self.hooks.trigger(
                HookKind::OnReject,
                &HookEvent::Task(TaskInfo {
                    id: task_id,
                    ..TaskInfo::default()
                }),
            );
        }
        PoolError::PoolOverload
    }

    fn submit_arg(self: &Arc<Self>, arg: A, non_blocking: bool) -> Result<(), PoolError> {
        if !self.is_running() {
            return Err(PoolError::PoolClosed);
        }
        self.metrics.inc_submitted();
        let task_id = self.task_id_gen.fetch_add(1, Ordering::Relaxed);
        if self.hooks.has(HookKind::BeforeSubmit) {
            self.hooks.trigger(
                HookKind::BeforeSubmit,
                &HookEvent::Task(TaskInfo {
                    id: task_id,
                    ..TaskInfo::default()
                }),
            );
        }

        let worker = if let Some(worker) = self.retrieve_worker() {
            worker
        } else if non_blocking
            || self.config.non_blocking
            || (self.config.max_blocking_tasks > 0
                && self.metrics.blocking() >= self.config.max_blocking_tasks as i64)
        {
            return Err(self.reject(task_id));
        } else {
            self.metrics.blocking_inc();
            let worker = loop {
                let mut guard = self.lock.lock();
                if !self.is_running() {
                    drop(guard);
                    self.metrics.blocking_dec();
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
            worker
        };

        // AfterSubmit precedes the hand-off so the per-task hook order
        // stays fixed relative to BeforeTask.
        if self.hooks.has(HookKind::AfterSubmit) {
            self.hooks.trigger(
                HookKind::AfterSubmit,
                &HookEvent::Task(TaskInfo {
                    id: task_id,
                    ..TaskInfo::default()
                }),
            );
        }
        if worker.inbox.send(Some(arg)).is_err() {
            return Err(PoolError::PoolClosed);
        }
        Ok(())
    }
}

fn run_func_worker<A: Send + 'static>(
    inner: Arc<FuncInner<A>>,
    worker: Arc<FuncWorker<A>>,
    rx: Receiver<Option<A>>,
) {
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
    debug!(pool = %inner.name, worker_id = worker.id, "worker started");

    'outer: loop {
        let arg = match rx.recv() {
            Ok(Some(arg)) => arg,
            Ok(None) | Err(_) => break,
        };
        invoke_handler(&inner, arg);

        loop {
            match rx.try_recv() {
                Ok(Some(arg)) => invoke_handler(&inner, arg),
                Ok(None) => break 'outer,
                Err(_) => break,
            }
        }

        worker.touch();
        if !inner.revert_worker(&worker) {
            break;
        }
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
        let mut cache = inner.cache.lock();
        cache.push((worker, rx));
    }
    let _guard = inner.lock.lock();
    inner.cond.notify_all();
}

fn invoke_handler<A: Send + 'static>(inner: &Arc<FuncInner<A>>, arg: A) {
    // Args travel without a task record, so task-level hook payloads carry
    // timings only.
    if inner.hooks.has(HookKind::BeforeTask) {
        inner
            .hooks
            .trigger(HookKind::BeforeTask, &HookEvent::Task(TaskInfo::default()));
    }
    let handler = Arc::clone(&inner.handler);
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(move || handler(arg)));
    let exec = started.elapsed();
    inner.metrics.add_exec(exec);

    match result {
        Ok(()) => {
            inner.metrics.inc_completed();
            if inner.hooks.has(HookKind::AfterTask) {
                inner.hooks.trigger(
                    HookKind::AfterTask,
                    &HookEvent::Task(TaskInfo {
                        exec: Some(exec),
                        ..TaskInfo::default()
                    }),
                );
            }
        }
        Err(payload) => {
            inner.metrics.inc_failed();
            let message = panic_message(payload.as_ref());
            warn!(pool = %inner.name, panic = %message, "handler panicked; worker recovered");
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
                        exec: Some(exec),
                        panic_message: Some(message),
                        ..TaskInfo::default()
                    }),
                );
            }
        }
    }
}

fn run_func_expiry<A: Send + 'static>(inner: Arc<FuncInner<A>>, heartbeat: Receiver<()>) {
    let expiry = inner.config.worker_expiry;
    loop {
        match heartbeat.recv_timeout(expiry) {
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                let min = inner.config.min_workers as i32;
                let count = inner.worker_count.load(Ordering::Acquire);
                let reclaimable = count.saturating_sub(min).max(0) as usize;
                let expired = inner.stack.retrieve_expiry(expiry, now_ms(), reclaimable);
                for worker in expired {
                    let _ = worker.inbox.send(None);
                }
            }
            _ => return,
        }
    }
}

/// A pool whose workers all run one fixed handler; submissions carry only
/// the argument.
///
/// # Examples
///
/// ```no_run
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
/// use poolx::{PoolOptions, PoolWithFunc};
///
/// let sum = Arc::new(AtomicU64::new(0));
/// let sum2 = Arc::clone(&sum);
/// let pool = PoolWithFunc::new("adder", PoolOptions::new(), move |n: u64| {
///     sum2.fetch_add(n, Ordering::Relaxed);
/// }).unwrap();
///
/// for n in 1..=10 {
///     pool.invoke(n).unwrap();
/// }
/// pool.release().unwrap();
/// assert_eq!(sum.load(Ordering::Relaxed), 55);
/// ```
pub struct PoolWithFunc<A: Send + 'static> {
    inner: Arc<FuncInner<A>>,
}

impl<A: Send + 'static> Clone for PoolWithFunc<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Send + 'static> PoolWithFunc<A> {
    /// Create a func pool with `handler` fixed for the pool's lifetime.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when validation fails.
    pub fn new(
        name: impl Into<String>,
        options: PoolOptions,
        handler: impl Fn(A) + Send + Sync + 'static,
    ) -> Result<Self, PoolError> {
        crate::util::telemetry::init_tracing();
        let name = name.into();
        let PoolOptions {
            config,
            hooks,
            panic_handler,
        } = options;
        config.validate().map_err(PoolError::InvalidConfig)?;
        if config.enable_auto_scale || config.enable_priority_queue || config.enable_work_stealing
        {
            warn!(pool = %name, "autoscale/priority/stealing options are ignored by PoolWithFunc");
        }

        let inner = Arc::new(FuncInner {
            handler: Arc::new(handler),
            state: AtomicU32::new(STATE_RUNNING),
            worker_count: AtomicI32::new(0),
            max_workers: AtomicI32::new(config.max_workers as i32),
            worker_id_gen: AtomicI32::new(0),
            task_id_gen: AtomicU64::new(0),
            lock: Mutex::new(FuncGuarded {
                heartbeat: None,
                aux_handles: Vec::new(),
            }),
            cond: Condvar::new(),
            stack: WorkerStack::new(config.max_workers),
            cache: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            metrics: Metrics::new(),
            hooks,
            panic_handler,
            name,
            config,
        });

        inner.start_background();
        for _ in 0..inner.config.min_workers {
            let Some(worker) = inner.create_worker() else {
                break;
            };
            if inner.stack.push(worker).is_err() {
                break;
            }
        }
        info!(pool = %inner.name, max_workers = inner.config.max_workers, "func pool created");
        Ok(Self { inner })
    }

    /// Submit an argument to the fixed handler.
    ///
    /// # Errors
    ///
    /// `PoolClosed` / `PoolOverload` per the admission rules.
    pub fn invoke(&self, arg: A) -> Result<(), PoolError> {
        self.inner.submit_arg(arg, false)
    }

    /// Submit without ever blocking; false on rejection or closed pool.
    pub fn try_invoke(&self, arg: A) -> bool {
        self.inner.submit_arg(arg, true).is_ok()
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

    /// Remaining worker slots under the cap.
    #[must_use]
    pub fn free(&self) -> i32 {
        (self.inner.max_workers.load(Ordering::Acquire) - self.running()).max(0)
    }

    /// Whether the pool has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.inner.is_running()
    }

    /// Point-in-time metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner
            .metrics
            .snapshot(i64::from(self.running()), self.idle() as i64)
    }

    /// Resize the worker cap, terminating surplus idle workers.
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
        Ok(())
    }

    /// Close the pool and wait for every worker to exit. Idempotent.
    ///
    /// # Errors
    ///
    /// None in practice; the signature matches [`release_timeout`].
    ///
    /// [`release_timeout`]: Self::release_timeout
    pub fn release(&self) -> Result<(), PoolError> {
        self.release_with_deadline(None)
    }

    /// As [`release`](Self::release), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// `Timeout` when workers are still running at the deadline.
    pub fn release_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.release_with_deadline(Some(Instant::now() + timeout))
    }

    fn release_with_deadline(&self, deadline: Option<Instant>) -> Result<(), PoolError> {
        let inner = &self.inner;
        if inner
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
        info!(pool = %inner.name, "releasing func pool");
        let aux = {
            let mut guarded = inner.lock.lock();
            guarded.heartbeat.take();
            inner.cond.notify_all();
            std::mem::take(&mut guarded.aux_handles)
        };
        loop {
            while let Some(worker) = inner.stack.pop() {
                let _ = worker.inbox.send(None);
            }
            if inner.worker_count.load(Ordering::Acquire) == 0 {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    return Err(PoolError::Timeout);
                }
            }
            thread::sleep(Duration::from_millis(1));
        }
        for handle in aux {
            let _ = handle.join();
        }
        let handles: Vec<_> = std::mem::take(&mut *inner.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
        inner.cache.lock().clear();
        info!(pool = %inner.name, "func pool released");
        Ok(())
    }

    /// Reopen a released func pool with fresh metrics and preheated workers.
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
        inner.metrics.reset();
        let _ = inner
            .stack
            .set_capacity(inner.max_workers.load(Ordering::Acquire) as usize);
        inner.start_background();
        for _ in 0..inner.config.min_workers {
            let Some(worker) = inner.create_worker() else {
                break;
            };
            if inner.stack.push(worker).is_err() {
                break;
            }
        }
        info!(pool = %inner.name, "func pool rebooted");
        Ok(())
    }
}

impl<A: Send + 'static> FuncInner<A> {
    fn start_background(self: &Arc<Self>) {
        let (beat_tx, beat_rx) = crossbeam_channel::bounded::<()>(0);
        let mut guarded = self.lock.lock();
        guarded.heartbeat = Some(beat_tx);
        let inner = Arc::clone(self);
        match thread::Builder::new()
            .name(format!("poolx-expiry-{}", self.name))
            .spawn(move || run_func_expiry(inner, beat_rx))
        {
            Ok(handle) => guarded.aux_handles.push(handle),
            Err(e) => warn!(pool = %self.name, error = %e, "failed to spawn expiry thread"),
        }
    }
}

impl<A: Send + 'static> std::fmt::Debug for PoolWithFunc<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolWithFunc")
            .field("name", &self.inner.name)
            .field("running", &self.running())
            .field("idle", &self.idle())
            .field("closed", &self.is_closed())
            .finish()
    }
}
