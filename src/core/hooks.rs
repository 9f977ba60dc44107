//! Lifecycle hook registry with typed payloads and safe invocation.
//!
//! Eleven event kinds cover the full task and worker lifecycle. Hooks run
//! synchronously at the transition that triggers them, wrapped in panic
//! recovery so a faulty callback cannot take a worker down;
//! [`Hooks::trigger_async`] is available for sinks that do not care about
//! ordering. The pool guards every dispatch with [`Hooks::has`], so an empty
//! registry costs one branch on the hot path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Lifecycle events a hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// A task passed the state check and is about to be admitted.
    BeforeSubmit,
    /// A task was handed to a worker or queued for dispatch.
    AfterSubmit,
    /// A worker is about to run a task's closure.
    BeforeTask,
    /// A task's closure returned normally.
    AfterTask,
    /// A task's closure panicked; the worker recovered.
    OnPanic,
    /// A task was rejected by admission control.
    OnReject,
    /// A task exceeded its soft deadline; the closure keeps running.
    OnTimeout,
    /// A worker run loop started.
    OnWorkerStart,
    /// A worker run loop exited.
    OnWorkerStop,
    /// The autoscaler added workers.
    OnScaleUp,
    /// The autoscaler retired workers.
    OnScaleDown,
}

pub(crate) const HOOK_KIND_COUNT: usize = 11;

impl HookKind {
    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Payload for task-scoped events.
#[derive(Debug, Clone, Default)]
pub struct TaskInfo {
    /// Task identifier.
    pub id: u64,
    /// Scheduling priority.
    pub priority: i32,
    /// Queue wait time, when measured for this event.
    pub wait: Option<Duration>,
    /// Execution time, for `AfterTask`/`OnPanic`.
    pub exec: Option<Duration>,
    /// Rendered panic payload, for `OnPanic`.
    pub panic_message: Option<String>,
}

/// Payload for worker-scoped events.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    /// Worker identifier.
    pub id: i32,
    /// Worker count at the time of the event.
    pub running: i32,
}

/// Payload for autoscaler events.
#[derive(Debug, Clone)]
pub struct ScaleInfo {
    /// Worker count before the scaling step.
    pub from: i32,
    /// Worker count after the scaling step.
    pub to: i32,
    /// Smoothed load estimate that triggered the step.
    pub load: f64,
}

/// A typed hook payload.
#[derive(Debug, Clone)]
pub enum HookEvent {
    /// Task lifecycle payload.
    Task(TaskInfo),
    /// Worker lifecycle payload.
    Worker(WorkerInfo),
    /// Autoscaler payload.
    Scale(ScaleInfo),
}

type HookFn = Arc<dyn Fn(&HookEvent) + Send + Sync + 'static>;

/// Immutable hook table, built once via [`HooksBuilder`] and installed at
/// pool construction.
#[derive(Clone)]
pub struct Hooks {
    table: [Vec<HookFn>; HOOK_KIND_COUNT],
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            table: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<usize> = self.table.iter().map(Vec::len).collect();
        f.debug_struct("Hooks").field("registered", &counts).finish()
    }
}

impl Hooks {
    /// Start building a hook table.
    #[must_use]
    pub fn builder() -> HooksBuilder {
        HooksBuilder::default()
    }

    /// Whether any hook is registered for `kind`. This is the hot-path guard:
    /// callers skip payload construction entirely when it returns false.
    #[inline]
    #[must_use]
    pub fn has(&self, kind: HookKind) -> bool {
        !self.table[kind.index()].is_empty()
    }

    /// Whether the table is entirely empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.iter().all(Vec::is_empty)
    }

    /// Invoke all hooks for `kind` synchronously. A panicking hook is logged
    /// and swallowed; remaining hooks still run.
    pub(crate) fn trigger(&self, kind: HookKind, event: &HookEvent) {
        for hook in &self.table[kind.index()] {
            if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
                warn!(kind = ?kind, "hook panicked; continuing");
            }
        }
    }

    /// Invoke all hooks for `kind` on a detached thread. Ordering relative
    /// to the triggering transition is not preserved.
    pub fn trigger_async(&self, kind: HookKind, event: HookEvent) {
        let handlers = self.table[kind.index()].clone();
        if handlers.is_empty() {
            return;
        }
        let spawned = thread::Builder::new()
            .name("poolx-hook".into())
            .spawn(move || {
                for hook in handlers {
                    if catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
                        warn!(kind = ?kind, "async hook panicked");
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn async hook thread");
        }
    }
}

/// Builder collecting typed callbacks into a [`Hooks`] table.
///
/// # Examples
///
/// ```
/// use poolx::Hooks;
///
/// let hooks = Hooks::builder()
///     .on_panic(|info| eprintln!("task {} panicked", info.id))
///     .on_reject(|info| eprintln!("task {} rejected", info.id))
///     .build();
/// assert!(hooks.has(poolx::HookKind::OnPanic));
/// ```
#[derive(Default)]
pub struct HooksBuilder {
    hooks: Hooks,
}

macro_rules! task_hook {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name(mut self, f: impl Fn(&TaskInfo) + Send + Sync + 'static) -> Self {
            self.hooks.table[$kind.index()].push(Arc::new(move |event| {
                if let HookEvent::Task(info) = event {
                    f(info);
                }
            }));
            self
        }
    };
}

macro_rules! worker_hook {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name(mut self, f: impl Fn(&WorkerInfo) + Send + Sync + 'static) -> Self {
            self.hooks.table[$kind.index()].push(Arc::new(move |event| {
                if let HookEvent::Worker(info) = event {
                    f(info);
                }
            }));
            self
        }
    };
}

macro_rules! scale_hook {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name(mut self, f: impl Fn(&ScaleInfo) + Send + Sync + 'static) -> Self {
            self.hooks.table[$kind.index()].push(Arc::new(move |event| {
                if let HookEvent::Scale(info) = event {
                    f(info);
                }
            }));
            self
        }
    };
}

impl HooksBuilder {
    task_hook!(
        /// Observe tasks entering admission.
        on_before_submit,
        HookKind::BeforeSubmit
    );
    task_hook!(
        /// Observe tasks after hand-off or enqueue.
        on_after_submit,
        HookKind::AfterSubmit
    );
    task_hook!(
        /// Observe tasks immediately before execution.
        on_before_task,
        HookKind::BeforeTask
    );
    task_hook!(
        /// Observe tasks after successful execution.
        on_after_task,
        HookKind::AfterTask
    );
    task_hook!(
        /// Observe recovered task panics.
        on_panic,
        HookKind::OnPanic
    );
    task_hook!(
        /// Observe admission rejections.
        on_reject,
        HookKind::OnReject
    );
    task_hook!(
        /// Observe soft-deadline expirations.
        on_timeout,
        HookKind::OnTimeout
    );
    worker_hook!(
        /// Observe worker run-loop starts.
        on_worker_start,
        HookKind::OnWorkerStart
    );
    worker_hook!(
        /// Observe worker run-loop exits.
        on_worker_stop,
        HookKind::OnWorkerStop
    );
    scale_hook!(
        /// Observe autoscaler expansions.
        on_scale_up,
        HookKind::OnScaleUp
    );
    scale_hook!(
        /// Observe autoscaler contractions.
        on_scale_down,
        HookKind::OnScaleDown
    );

    /// Finish the table.
    #[must_use]
    pub fn build(self) -> Hooks {
        self.hooks
    }
}
