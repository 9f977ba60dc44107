//! Pool and engine configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Autoscaler inputs: sampling cadence, hysteresis thresholds, step sizes,
/// cooldown, and the EMA smoothing factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScaleConfig {
    /// Sampling cadence for the load estimator.
    pub scale_interval: Duration,
    /// Smoothed load at or above which the pool grows.
    pub scale_up_ratio: f64,
    /// Smoothed load at or below which the pool shrinks.
    pub scale_down_ratio: f64,
    /// Workers added per scale-up step.
    pub scale_up_step: usize,
    /// Workers retired per scale-down step.
    pub scale_down_step: usize,
    /// Minimum time between scaling steps.
    pub cooldown: Duration,
    /// EMA smoothing factor in `(0, 1]`.
    pub alpha: f64,
}

impl Default for AutoScaleConfig {
    fn default() -> Self {
        Self {
            scale_interval: Duration::from_secs(1),
            scale_up_ratio: 0.8,
            scale_down_ratio: 0.2,
            scale_up_step: 2,
            scale_down_step: 1,
            cooldown: Duration::from_secs(5),
            alpha: 0.3,
        }
    }
}

impl AutoScaleConfig {
    /// Validate threshold ordering, step sizes, and the smoothing factor.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.scale_interval.is_zero() {
            return Err("scale_interval must be positive".into());
        }
        if !(self.scale_down_ratio > 0.0
            && self.scale_down_ratio < self.scale_up_ratio
            && self.scale_up_ratio <= 1.0)
        {
            return Err("scale ratios must satisfy 0 < down < up <= 1".into());
        }
        if self.scale_up_step == 0 || self.scale_down_step == 0 {
            return Err("scale steps must be positive".into());
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err("alpha must be in (0, 1]".into());
        }
        Ok(())
    }
}

/// Pool configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use poolx::config::PoolConfig;
///
/// let cfg = PoolConfig::new()
///     .with_max_workers(8)
///     .with_min_workers(2)
///     .with_worker_expiry(Duration::from_secs(30));
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on concurrent workers.
    pub max_workers: usize,
    /// Workers preheated at construction and kept through idle expiry.
    pub min_workers: usize,
    /// Priority-queue capacity and object-pool warm-up size.
    pub queue_size: usize,
    /// Idle time after which a worker is reclaimed.
    pub worker_expiry: Duration,
    /// Warm the task and worker object pools at construction.
    pub pre_alloc: bool,
    /// Run the EMA autoscaler.
    pub enable_auto_scale: bool,
    /// Autoscaler tuning; ignored unless `enable_auto_scale`.
    pub auto_scale: AutoScaleConfig,
    /// Give each worker a local deque and enable cross-worker stealing.
    pub enable_work_stealing: bool,
    /// Items moved per successful steal (the first executes immediately,
    /// the rest land in the thief's deque).
    pub steal_batch_size: usize,
    /// Cap on concurrent blocking submitters; 0 means unlimited.
    pub max_blocking_tasks: usize,
    /// Reject instead of blocking when saturated.
    pub non_blocking: bool,
    /// Route every submission through the priority heap.
    pub enable_priority_queue: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(1) * 2,
            min_workers: 0,
            queue_size: 64,
            worker_expiry: Duration::from_secs(10),
            pre_alloc: false,
            enable_auto_scale: false,
            auto_scale: AutoScaleConfig::default(),
            enable_work_stealing: false,
            steal_batch_size: 1,
            max_blocking_tasks: 0,
            non_blocking: false,
            enable_priority_queue: false,
        }
    }
}

impl PoolConfig {
    /// Defaults sized to the host CPU count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker cap.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the preheated minimum.
    #[must_use]
    pub const fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the idle-expiry duration.
    #[must_use]
    pub const fn with_worker_expiry(mut self, worker_expiry: Duration) -> Self {
        self.worker_expiry = worker_expiry;
        self
    }

    /// Warm the object pools at construction.
    #[must_use]
    pub const fn with_pre_alloc(mut self, pre_alloc: bool) -> Self {
        self.pre_alloc = pre_alloc;
        self
    }

    /// Enable the autoscaler with the given tuning.
    #[must_use]
    pub fn with_auto_scale(mut self, auto_scale: AutoScaleConfig) -> Self {
        self.enable_auto_scale = true;
        self.auto_scale = auto_scale;
        self
    }

    /// Enable per-worker deques and stealing.
    #[must_use]
    pub const fn with_work_stealing(mut self, steal_batch_size: usize) -> Self {
        self.enable_work_stealing = true;
        self.steal_batch_size = steal_batch_size;
        self
    }

    /// Cap concurrent blocking submitters.
    #[must_use]
    pub const fn with_max_blocking_tasks(mut self, max_blocking_tasks: usize) -> Self {
        self.max_blocking_tasks = max_blocking_tasks;
        self
    }

    /// Reject instead of blocking when saturated.
    #[must_use]
    pub const fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Route submissions through the priority heap.
    #[must_use]
    pub const fn with_priority_queue(mut self, enable: bool) -> Self {
        self.enable_priority_queue = enable;
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.min_workers > self.max_workers {
            return Err("min_workers must not exceed max_workers".into());
        }
        if self.queue_size == 0 {
            return Err("queue_size must be greater than 0".into());
        }
        if self.worker_expiry.is_zero() {
            return Err("worker_expiry must be positive".into());
        }
        if self.steal_batch_size == 0 {
            return Err("steal_batch_size must be greater than 0".into());
        }
        if self.enable_auto_scale {
            self.auto_scale
                .validate()
                .map_err(|e| format!("auto_scale invalid: {e}"))?;
        }
        Ok(())
    }
}

/// Root engine configuration: a map of pool name to configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl EngineConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// A description naming the first invalid pool.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse errors and validation failures, as strings.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: EngineConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
