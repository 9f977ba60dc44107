//! EMA-driven autoscaling with hysteresis and cooldown.
//!
//! Every `scale_interval` the scaler samples `(active + blocking) / max` as
//! the raw load, smooths it through an exponential moving average, and steps
//! the worker count up or down. Separate up/down thresholds (hysteresis)
//! and a cooldown between steps keep the pool from oscillating on noisy
//! load. Worker-create failures are silent: the scaler simply stops at the
//! partial increment, since the cap is the binding constraint.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::debug;

use super::hooks::{HookEvent, HookKind, ScaleInfo};
use super::pool::PoolInner;

/// Exponential moving average over sampled load. The first observation
/// seeds the average directly.
pub(crate) struct LoadEstimator {
    alpha: f64,
    ema: Option<f64>,
}

impl LoadEstimator {
    pub(crate) fn new(alpha: f64) -> Self {
        Self { alpha, ema: None }
    }

    pub(crate) fn observe(&mut self, load: f64) -> f64 {
        let smoothed = match self.ema {
            None => load,
            Some(prev) => self.alpha * load + (1.0 - self.alpha) * prev,
        };
        self.ema = Some(smoothed);
        smoothed
    }
}

pub(crate) fn run_autoscaler(inner: Arc<PoolInner>, heartbeat: Receiver<()>) {
    let cfg = inner.config.auto_scale.clone();
    let mut estimator = LoadEstimator::new(cfg.alpha);
    let mut last_scale: Option<Instant> = None;
    debug!(pool = %inner.name, interval_ms = cfg.scale_interval.as_millis() as u64, "autoscaler started");

    loop {
        match heartbeat.recv_timeout(cfg.scale_interval) {
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            // Heartbeat dropped: the pool is releasing.
            _ => return,
        }

        let running = inner.worker_count.load(Ordering::Acquire);
        let max = inner.max_workers.load(Ordering::Acquire);
        if max <= 0 {
            continue;
        }
        let idle = inner.stack.len() as i32;
        let active = (running - idle).max(0);
        let blocking = inner.metrics.blocking() as f64;
        let load = ((f64::from(active) + blocking) / f64::from(max)).min(1.0);
        let smoothed = estimator.observe(load);

        if let Some(at) = last_scale {
            if at.elapsed() < cfg.cooldown {
                continue;
            }
        }

        let min = inner.config.min_workers as i32;
        if smoothed >= cfg.scale_up_ratio && running < max {
            let mut added = 0;
            for _ in 0..cfg.scale_up_step {
                if !inner.spawn_idle_worker() {
                    break;
                }
                added += 1;
            }
            if added > 0 {
                debug!(pool = %inner.name, load = smoothed, added, "scaled up");
                if inner.hooks.has(HookKind::OnScaleUp) {
                    inner.hooks.trigger(
                        HookKind::OnScaleUp,
                        &HookEvent::Scale(ScaleInfo {
                            from: running,
                            to: running + added,
                            load: smoothed,
                        }),
                    );
                }
                last_scale = Some(Instant::now());
            }
        } else if smoothed <= cfg.scale_down_ratio && running > min {
            let budget = (running - min).max(0) as usize;
            let mut removed = 0;
            for _ in 0..cfg.scale_down_step.min(budget) {
                match inner.stack.pop() {
                    Some(worker) => {
                        let _ = worker.inbox.send(None);
                        removed += 1;
                    }
                    None => break,
                }
            }
            if removed > 0 {
                debug!(pool = %inner.name, load = smoothed, removed, "scaled down");
                if inner.hooks.has(HookKind::OnScaleDown) {
                    inner.hooks.trigger(
                        HookKind::OnScaleDown,
                        &HookEvent::Scale(ScaleInfo {
                            from: running,
                            to: running - removed,
                            load: smoothed,
                        }),
                    );
                }
                last_scale = Some(Instant::now());
            }
        }
    }
}
