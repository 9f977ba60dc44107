//! N independent pools behind one submit surface.
//!
//! A `MultiPool` spreads submissions across its member pools either by an
//! atomic round-robin cursor or by picking the pool with the fewest
//! running-plus-blocked tasks. Lifecycle operations aggregate over all
//! members.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::PoolError;
use super::pool::{Pool, PoolOptions};
use super::task::TaskOptions;
use crate::config::PoolConfig;

/// How submissions pick a member pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// Advance an atomic index per submission.
    RoundRobin,
    /// Scan members and pick `argmin(running + blocking)`.
    LeastTasks,
}

/// An array of independent pools with a dispatch strategy.
///
/// # Examples
///
/// ```no_run
/// use poolx::{DispatchStrategy, MultiPool, PoolOptions};
///
/// let multi = MultiPool::new("sharded", 4, PoolOptions::new(), DispatchStrategy::RoundRobin)
///     .unwrap();
/// multi.submit(|| println!("hello")).unwrap();
/// multi.release().unwrap();
/// ```
#[derive(Debug)]
pub struct MultiPool {
    pools: Vec<Pool>,
    cursor: AtomicUsize,
    strategy: DispatchStrategy,
}

impl MultiPool {
    /// Create `count` member pools named `{name}-{index}`, all sharing the
    /// same options.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when `count` is zero; member construction errors
    /// propagate (already-created members are released).
    pub fn new(
        name: impl Into<String>,
        count: usize,
        options: PoolOptions,
        strategy: DispatchStrategy,
    ) -> Result<Self, PoolError> {
        if count == 0 {
            return Err(PoolError::InvalidArg(
                "multipool needs at least one member".into(),
            ));
        }
        let name = name.into();
        let config = options.config.clone();
        let hooks = options.hooks.clone();
        let panic_handler = options.panic_handler.clone();

        let mut pools = Vec::with_capacity(count);
        for index in 0..count {
            let mut member = PoolOptions::with_config(config.clone()).hooks(hooks.clone());
            if let Some(handler) = &panic_handler {
                member.panic_handler = Some(handler.clone());
            }
            match Pool::new(format!("{name}-{index}"), member) {
                Ok(pool) => pools.push(pool),
                Err(e) => {
                    for pool in &pools {
                        let _ = pool.release();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            pools,
            cursor: AtomicUsize::new(0),
            strategy,
        })
    }

    fn select(&self) -> &Pool {
        match self.strategy {
            DispatchStrategy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pools.len();
                &self.pools[index]
            }
            DispatchStrategy::LeastTasks => self
                .pools
                .iter()
                .min_by_key(|pool| pool.load_score())
                .expect("at least one member"),
        }
    }

    /// Submit to the member chosen by the dispatch strategy.
    ///
    /// # Errors
    ///
    /// As [`Pool::submit`].
    pub fn submit<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.select().submit(f)
    }

    /// Submit with per-task options to the chosen member.
    ///
    /// # Errors
    ///
    /// As [`Pool::submit_with_options`].
    pub fn submit_with_options<F>(&self, f: F, options: TaskOptions) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.select().submit_with_options(f, options)
    }

    /// Member pools, in index order.
    #[must_use]
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Number of member pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Always false; construction requires at least one member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Total live workers across members.
    #[must_use]
    pub fn running(&self) -> i32 {
        self.pools.iter().map(Pool::running).sum()
    }

    /// Total free worker slots across members.
    #[must_use]
    pub fn free(&self) -> i32 {
        self.pools.iter().map(Pool::free).sum()
    }

    /// Retune every member to `new_cap`.
    ///
    /// # Errors
    ///
    /// First member error wins; remaining members are still tuned.
    pub fn tune(&self, new_cap: usize) -> Result<(), PoolError> {
        let mut first_err = None;
        for pool in &self.pools {
            if let Err(e) = pool.tune(new_cap) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Release every member.
    ///
    /// # Errors
    ///
    /// First member error wins; remaining members are still released.
    pub fn release(&self) -> Result<(), PoolError> {
        let mut first_err = None;
        for pool in &self.pools {
            if let Err(e) = pool.release() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Release every member, each bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// First member error (typically `Timeout`) wins.
    pub fn release_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        let mut first_err = None;
        for pool in &self.pools {
            if let Err(e) = pool.release_timeout(timeout) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Reboot every member.
    ///
    /// # Errors
    ///
    /// First member error wins; remaining members are still rebooted.
    pub fn reboot(&self) -> Result<(), PoolError> {
        let mut first_err = None;
        for pool in &self.pools {
            if let Err(e) = pool.reboot() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Convenience: a multipool from a bare config with default options.
///
/// # Errors
///
/// As [`MultiPool::new`].
pub fn multi_pool_from_config(
    name: impl Into<String>,
    count: usize,
    config: PoolConfig,
    strategy: DispatchStrategy,
) -> Result<MultiPool, PoolError> {
    MultiPool::new(name, count, PoolOptions::with_config(config), strategy)
}
