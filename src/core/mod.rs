//! The worker pool engine.

pub(crate) mod autoscale;
pub mod error;
pub mod func_pool;
pub mod future;
pub mod hooks;
pub mod metrics;
pub mod multi;
pub mod pool;
pub(crate) mod queue;
pub mod registry;
pub(crate) mod scheduler;
pub(crate) mod stack;
pub mod task;
pub(crate) mod worker;

pub use error::{AppResult, PoolError};
pub use func_pool::PoolWithFunc;
pub use future::{await_all, await_any, await_first, Promise, TaskFuture};
pub use hooks::{HookEvent, HookKind, Hooks, HooksBuilder, ScaleInfo, TaskInfo, WorkerInfo};
pub use metrics::MetricsSnapshot;
pub use multi::{multi_pool_from_config, DispatchStrategy, MultiPool};
pub use pool::{PanicHandler, Pool, PoolOptions};
pub use registry::{get, must_get};
pub use task::TaskOptions;
