//! End-to-end scenarios for the pool engine:
//! - fan-in counting across workers
//! - overload rejection in non-blocking mode
//! - panic isolation and the panic handler
//! - priority-ordered dispatch
//! - autoscaling under load
//! - soft-timeout signaling

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use poolx::config::{AutoScaleConfig, PoolConfig};
use poolx::{Hooks, Pool, PoolError, PoolOptions, TaskOptions};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn basic_pool(name: &str, max_workers: usize) -> Pool {
    Pool::new(
        name,
        PoolOptions::with_config(PoolConfig::new().with_max_workers(max_workers)),
    )
    .expect("Failed to create pool")
}

// ============================================================================
// TESTS
// ============================================================================

/// Scenario: 100 increments fan in to a single counter.
#[test]
fn test_fan_in_sum() {
    let pool = basic_pool("e2e-fan-in", 4);
    let counter = Arc::new(AtomicU64::new(0));

    for _ in 0..100 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .expect("Failed to submit");
    }

    assert!(
        wait_until(Duration::from_secs(5), || counter.load(Ordering::Relaxed) == 100),
        "not all tasks ran"
    );
    assert!(wait_until(Duration::from_secs(2), || pool
        .metrics()
        .completed
        == 100));

    let metrics = pool.metrics();
    assert_eq!(metrics.submitted, 100);
    assert_eq!(metrics.completed, 100);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.in_flight, 0);
    assert!(metrics.running_workers <= 4);

    pool.release().expect("Failed to release");
}

/// Scenario: a saturated non-blocking pool rejects with `OnReject`.
#[test]
fn test_overload_rejection() {
    let rejections = Arc::new(AtomicUsize::new(0));
    let rejections_hook = Arc::clone(&rejections);
    let hooks = Hooks::builder()
        .on_reject(move |_| {
            rejections_hook.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let pool = Pool::new(
        "e2e-overload",
        PoolOptions::with_config(
            PoolConfig::new()
                .with_max_workers(1)
                .with_non_blocking(true),
        )
        .hooks(hooks),
    )
    .expect("Failed to create pool");

    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let started = Arc::new(AtomicUsize::new(0));
    let started_flag = Arc::clone(&started);
    pool.submit(move || {
        started_flag.fetch_add(1, Ordering::SeqCst);
        let _ = gate_rx.recv();
    })
    .expect("First submit should be accepted");

    assert!(wait_until(Duration::from_secs(2), || started
        .load(Ordering::SeqCst)
        == 1));

    // The lone worker is busy; a second submission must be refused.
    let result = pool.submit(|| {});
    assert!(matches!(result, Err(PoolError::PoolOverload)));
    assert_eq!(rejections.load(Ordering::SeqCst), 1);
    assert_eq!(pool.metrics().rejected, 1);

    gate_tx.send(()).expect("worker still waiting");
    pool.release().expect("Failed to release");
}

/// Scenario: a panicking task is recovered; the pool keeps serving.
#[test]
fn test_panic_isolation() {
    let last_panic = Arc::new(Mutex::new(None::<String>));
    let handler_panic = Arc::clone(&last_panic);

    let hook_panic = Arc::new(Mutex::new(None::<String>));
    let hook_panic2 = Arc::clone(&hook_panic);
    let hooks = Hooks::builder()
        .on_panic(move |info| {
            *hook_panic2.lock() = info.panic_message.clone();
        })
        .build();

    let pool = Pool::new(
        "e2e-panic",
        PoolOptions::with_config(PoolConfig::new().with_max_workers(2))
            .hooks(hooks)
            .panic_handler(move |payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                *handler_panic.lock() = Some(message);
            }),
    )
    .expect("Failed to create pool");

    pool.submit(|| panic!("x")).expect("Failed to submit");

    assert!(wait_until(Duration::from_secs(2), || pool.metrics().failed == 1));
    assert!(wait_until(Duration::from_secs(2), || last_panic
        .lock()
        .as_deref()
        == Some("x")));
    assert_eq!(hook_panic.lock().as_deref(), Some("x"));

    // The worker survived; subsequent submissions still run.
    let ok = Arc::new(AtomicUsize::new(0));
    let ok2 = Arc::clone(&ok);
    pool.submit(move || {
        ok2.fetch_add(1, Ordering::SeqCst);
    })
    .expect("Pool should still accept submissions");
    assert!(wait_until(Duration::from_secs(2), || ok.load(Ordering::SeqCst) == 1));

    let metrics = pool.metrics();
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.completed, 1);
    assert!((metrics.success_rate - 0.5).abs() < 1e-9);

    pool.release().expect("Failed to release");
}

/// Scenario: with the priority queue enabled, a backlog drains
/// highest-priority-first.
#[test]
fn test_priority_ordering() {
    let pool = Pool::new(
        "e2e-priority",
        PoolOptions::with_config(
            PoolConfig::new()
                .with_max_workers(1)
                .with_queue_size(16)
                .with_priority_queue(true),
        ),
    )
    .expect("Failed to create pool");

    // Occupy the lone worker so later submissions pile up in the heap.
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let started = Arc::new(AtomicUsize::new(0));
    let started_flag = Arc::clone(&started);
    pool.submit(move || {
        started_flag.fetch_add(1, Ordering::SeqCst);
        let _ = gate_rx.recv();
    })
    .expect("Failed to submit blocker");
    assert!(wait_until(Duration::from_secs(2), || started
        .load(Ordering::SeqCst)
        == 1));

    let order = Arc::new(Mutex::new(Vec::new()));
    for (label, priority) in [(1, 0), (2, 5), (3, 10), (4, 15)] {
        let order = Arc::clone(&order);
        pool.submit_with_options(
            move || {
                order.lock().push(label);
            },
            TaskOptions::new().with_priority(priority),
        )
        .expect("Failed to submit prioritized task");
    }

    gate_tx.send(()).expect("worker still waiting");

    assert!(
        wait_until(Duration::from_secs(5), || order.lock().len() == 4),
        "queued tasks did not all run"
    );
    assert_eq!(*order.lock(), vec![4, 3, 2, 1]);

    pool.release().expect("Failed to release");
}

/// Scenario: the pool expands under load and contracts when it drains.
#[test]
fn test_autoscale_under_load() {
    let scale_downs = Arc::new(AtomicUsize::new(0));
    let scale_downs2 = Arc::clone(&scale_downs);
    let hooks = Hooks::builder()
        .on_scale_down(move |_| {
            scale_downs2.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let pool = Pool::new(
        "e2e-autoscale",
        PoolOptions::with_config(
            PoolConfig::new()
                .with_max_workers(20)
                .with_min_workers(2)
                .with_auto_scale(AutoScaleConfig {
                    scale_interval: Duration::from_millis(100),
                    scale_up_ratio: 0.8,
                    scale_down_ratio: 0.2,
                    scale_up_step: 2,
                    scale_down_step: 4,
                    cooldown: Duration::ZERO,
                    alpha: 0.3,
                }),
        )
        .hooks(hooks),
    )
    .expect("Failed to create pool");

    assert_eq!(pool.running(), 2, "min_workers should be preheated");

    let peak = Arc::new(AtomicI32::new(0));
    for _ in 0..50 {
        let pool_obs = pool.clone();
        let peak = Arc::clone(&peak);
        pool.submit(move || {
            peak.fetch_max(pool_obs.running(), Ordering::Relaxed);
            std::thread::sleep(Duration::from_millis(50));
        })
        .expect("Failed to submit");
    }

    assert!(
        wait_until(Duration::from_millis(500), || peak.load(Ordering::Relaxed) > 2),
        "pool never grew past the preheated minimum"
    );

    // Wait for the backlog to drain, then for the scaler to walk back down.
    assert!(wait_until(Duration::from_secs(5), || pool.metrics().completed == 50));
    assert!(
        wait_until(Duration::from_secs(3), || pool.running() <= 4),
        "pool did not contract after load dropped (running = {})",
        pool.running()
    );
    assert!(pool.running() >= 2, "scaler went below min_workers");
    assert!(scale_downs.load(Ordering::SeqCst) > 0);

    pool.release().expect("Failed to release");
}

/// Boundary: with a long cooldown, at most one scale-down fires even
/// though the load stays below the threshold.
#[test]
fn test_autoscaler_respects_cooldown() {
    let pool = Pool::new(
        "e2e-cooldown",
        PoolOptions::with_config(
            PoolConfig::new()
                .with_max_workers(4)
                .with_auto_scale(AutoScaleConfig {
                    scale_interval: Duration::from_millis(50),
                    scale_up_ratio: 0.8,
                    scale_down_ratio: 0.2,
                    scale_up_step: 1,
                    scale_down_step: 1,
                    cooldown: Duration::from_secs(10),
                    alpha: 0.3,
                }),
        ),
    )
    .expect("Failed to create pool");

    // Demand-create all four workers, then idle the pool.
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let started = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let rx = gate_rx.clone();
        let started = Arc::clone(&started);
        pool.submit(move || {
            started.fetch_add(1, Ordering::SeqCst);
            let _ = rx.recv();
        })
        .expect("Failed to submit");
    }
    assert!(wait_until(Duration::from_secs(2), || started
        .load(Ordering::SeqCst)
        == 4));
    drop(gate_tx);

    // One scale-down step fires once the EMA decays, then the cooldown
    // holds the count for the rest of the window.
    assert!(
        wait_until(Duration::from_secs(2), || pool.running() == 3),
        "expected exactly one scale-down step (running = {})",
        pool.running()
    );
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(pool.running(), 3, "second scale event inside the cooldown");

    pool.release().expect("Failed to release");
}

/// Scenario: a task past its soft deadline fires `OnTimeout` while the
/// closure runs to completion in the background.
#[test]
fn test_timeout_signaling() {
    let timeouts = Arc::new(AtomicUsize::new(0));
    let timeouts2 = Arc::clone(&timeouts);
    let hooks = Hooks::builder()
        .on_timeout(move |_| {
            timeouts2.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let pool = Pool::new(
        "e2e-timeout",
        PoolOptions::with_config(PoolConfig::new().with_max_workers(2)).hooks(hooks),
    )
    .expect("Failed to create pool");

    let finished = Arc::new(AtomicUsize::new(0));
    let finished2 = Arc::clone(&finished);
    let start = Instant::now();
    pool.submit_with_options(
        move || {
            std::thread::sleep(Duration::from_millis(100));
            finished2.fetch_add(1, Ordering::SeqCst);
        },
        TaskOptions::new().with_timeout(Duration::from_millis(10)),
    )
    .expect("Failed to submit");

    assert!(
        wait_until(Duration::from_millis(80), || timeouts.load(Ordering::SeqCst) == 1),
        "OnTimeout did not fire promptly"
    );
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "timeout signal arrived too late"
    );

    // The closure keeps running past the deadline and still finishes.
    assert!(wait_until(Duration::from_secs(2), || finished
        .load(Ordering::SeqCst)
        == 1));

    // The pool is still usable afterwards.
    let ok = Arc::new(AtomicUsize::new(0));
    let ok2 = Arc::clone(&ok);
    pool.submit(move || {
        ok2.fetch_add(1, Ordering::SeqCst);
    })
    .expect("Pool should still accept submissions");
    assert!(wait_until(Duration::from_secs(2), || ok.load(Ordering::SeqCst) == 1));

    pool.release().expect("Failed to release");
}

/// Work stealing: a batch submitted through one worker's backlog is shared.
#[test]
fn test_work_stealing_smoke() {
    let pool = Pool::new(
        "e2e-stealing",
        PoolOptions::with_config(
            PoolConfig::new()
                .with_max_workers(4)
                .with_min_workers(4)
                .with_work_stealing(2),
        ),
    )
    .expect("Failed to create pool");

    let counter = Arc::new(AtomicU64::new(0));
    for _ in 0..200 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .expect("Failed to submit");
    }

    assert!(wait_until(Duration::from_secs(5), || counter
        .load(Ordering::Relaxed)
        == 200));
    let metrics = pool.metrics();
    assert_eq!(metrics.completed, 200);

    pool.release().expect("Failed to release");
}

/// Recursive fan-out: submits from inside a worker land in its local
/// deque, and sibling workers steal from it.
#[test]
fn test_recursive_fan_out_is_stolen() {
    let pool = Pool::new(
        "e2e-recursive-steal",
        PoolOptions::with_config(
            PoolConfig::new()
                .with_max_workers(4)
                .with_min_workers(4)
                .with_work_stealing(2),
        ),
    )
    .expect("Failed to create pool");

    let counter = Arc::new(AtomicU64::new(0));
    let spawner_pool = pool.clone();
    let spawner_counter = Arc::clone(&counter);
    pool.submit(move || {
        for _ in 0..200 {
            let counter = Arc::clone(&spawner_counter);
            spawner_pool
                .submit(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .expect("recursive submit");
        }
        spawner_counter.fetch_add(1, Ordering::Relaxed);
    })
    .expect("Failed to submit spawner");

    // Kickers wake parked siblings; each one that finishes while the
    // spawner's deque is still loaded makes another steal attempt.
    std::thread::sleep(Duration::from_millis(30));
    for _ in 0..12 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .expect("Failed to submit kicker");
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(
        wait_until(Duration::from_secs(10), || counter.load(Ordering::Relaxed) == 213),
        "fan-out did not drain (count = {})",
        counter.load(Ordering::Relaxed)
    );
    let metrics = pool.metrics();
    assert_eq!(metrics.completed, 213);
    assert!(
        metrics.stolen > 0,
        "expected sibling workers to steal from the spawner's deque"
    );

    pool.release().expect("Failed to release");
}

/// Hook ordering on a single task: BeforeSubmit -> AfterSubmit ->
/// BeforeTask -> AfterTask.
#[test]
fn test_hook_order_single_task() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let o1 = Arc::clone(&order);
    let o2 = Arc::clone(&order);
    let o3 = Arc::clone(&order);
    let o4 = Arc::clone(&order);
    let hooks = Hooks::builder()
        .on_before_submit(move |_| o1.lock().push("before_submit"))
        .on_after_submit(move |_| o2.lock().push("after_submit"))
        .on_before_task(move |_| o3.lock().push("before_task"))
        .on_after_task(move |_| o4.lock().push("after_task"))
        .build();

    let pool = Pool::new(
        "e2e-hook-order",
        PoolOptions::with_config(PoolConfig::new().with_max_workers(1)).hooks(hooks),
    )
    .expect("Failed to create pool");

    pool.submit(|| {}).expect("Failed to submit");
    assert!(wait_until(Duration::from_secs(2), || order.lock().len() == 4));
    assert_eq!(
        *order.lock(),
        vec!["before_submit", "after_submit", "before_task", "after_task"]
    );

    pool.release().expect("Failed to release");
}
