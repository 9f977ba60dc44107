//! One-shot typed futures bridging submitters and task results.
//!
//! A [`Promise`] is the producer half, completed exactly once by the task
//! closure; the paired [`TaskFuture`] is the consumer half with blocking,
//! bounded, and non-blocking gets. The state machine is strictly one-shot:
//! `Pending -> {Completed, Failed, Canceled}`, and the result is consumed
//! by whichever get observes it first.
//!
//! The [`await_all`], [`await_first`], and [`await_any`] combinators
//! coordinate over many futures without polling: each future pushes a
//! notification into a shared waker when it settles.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::error::PoolError;

enum FutureCell<T> {
    Pending,
    Done(Result<T, PoolError>),
    Taken,
}

struct FutureInner<T> {
    cell: FutureCell<T>,
    canceled: bool,
    wakers: Vec<Arc<DoneWaker>>,
}

struct Shared<T> {
    inner: Mutex<FutureInner<T>>,
    cond: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FutureInner {
                cell: FutureCell::Pending,
                canceled: false,
                wakers: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// One-shot transition out of `Pending`. Later calls are no-ops.
    fn finish(&self, result: Result<T, PoolError>, canceled: bool) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.cell, FutureCell::Pending) {
            return false;
        }
        inner.cell = FutureCell::Done(result);
        inner.canceled = canceled;
        let wakers = mem::take(&mut inner.wakers);
        drop(inner);
        self.cond.notify_all();
        for waker in wakers {
            waker.bump();
        }
        true
    }

    fn add_waker(&self, waker: Arc<DoneWaker>) {
        let mut inner = self.inner.lock();
        if matches!(inner.cell, FutureCell::Pending) {
            inner.wakers.push(waker);
        } else {
            drop(inner);
            waker.bump();
        }
    }
}

fn take_ready<T>(cell: &mut FutureCell<T>) -> Option<Result<T, PoolError>> {
    match cell {
        FutureCell::Pending => None,
        FutureCell::Taken => Some(Err(PoolError::InvalidArg(
            "future result already taken".into(),
        ))),
        FutureCell::Done(_) => match mem::replace(cell, FutureCell::Taken) {
            FutureCell::Done(result) => Some(result),
            _ => unreachable!("matched Done above"),
        },
    }
}

/// Producer half of a one-shot result slot.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    /// Create a connected promise/future pair.
    #[must_use]
    pub fn new() -> (Promise<T>, TaskFuture<T>) {
        let shared = Shared::new();
        (
            Promise {
                shared: Arc::clone(&shared),
            },
            TaskFuture { shared },
        )
    }

    /// Resolve with a value. Returns false if the slot was already settled.
    pub fn complete(&self, value: T) -> bool {
        self.shared.finish(Ok(value), false)
    }

    /// Resolve with a failure message. Returns false if already settled.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.shared
            .finish(Err(PoolError::TaskFailed(message.into())), false)
    }

    /// Whether the consumer canceled before the task produced a result.
    /// Task closures check this to skip work that nobody will observe.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.shared.inner.lock().canceled
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// Consumer half of a one-shot result slot.
///
/// # Examples
///
/// ```
/// use poolx::future::Promise;
///
/// let (promise, future) = Promise::new();
/// promise.complete(21 * 2);
/// assert_eq!(future.get().unwrap(), 42);
/// ```
pub struct TaskFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TaskFuture<T> {
    /// Whether the future has settled (completed, failed, or canceled).
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(self.shared.inner.lock().cell, FutureCell::Pending)
    }

    /// Take the result if settled; `None` while still pending.
    pub fn try_get(&self) -> Option<Result<T, PoolError>> {
        take_ready(&mut self.shared.inner.lock().cell)
    }

    /// Block until the result is available and take it.
    pub fn get(&self) -> Result<T, PoolError> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(result) = take_ready(&mut inner.cell) {
                return result;
            }
            self.shared.cond.wait(&mut inner);
        }
    }

    /// Block up to `timeout` for the result.
    ///
    /// # Errors
    ///
    /// `FutureTimeout` when the deadline elapses with the slot still
    /// pending; the future remains usable afterwards.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(result) = take_ready(&mut inner.cell) {
                return result;
            }
            if self.shared.cond.wait_until(&mut inner, deadline).timed_out() {
                return match take_ready(&mut inner.cell) {
                    Some(result) => result,
                    None => Err(PoolError::FutureTimeout),
                };
            }
        }
    }

    /// Cancel the future. Returns true when this call performed the
    /// `Pending -> Canceled` transition. A task that has not started yet
    /// observes the flag and skips execution; a running closure is not
    /// interrupted.
    pub fn cancel(&self) -> bool {
        self.shared.finish(Err(PoolError::FutureCanceled), true)
    }

    fn add_waker(&self, waker: Arc<DoneWaker>) {
        self.shared.add_waker(waker);
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Completion-count waker shared across futures by the combinators.
struct DoneWaker {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl DoneWaker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            generation: Mutex::new(0),
            cond: Condvar::new(),
        })
    }

    fn bump(&self) {
        *self.generation.lock() += 1;
        self.cond.notify_all();
    }

    fn wait_past(&self, seen: u64) -> u64 {
        let mut generation = self.generation.lock();
        while *generation == seen {
            self.cond.wait(&mut generation);
        }
        *generation
    }
}

/// Wait for every future and collect the results in input order.
pub fn await_all<T>(futures: Vec<TaskFuture<T>>) -> Vec<Result<T, PoolError>> {
    futures.into_iter().map(|f| f.get()).collect()
}

/// Wait for the first future to settle and return its result, whatever the
/// outcome. The remaining futures keep running detached.
///
/// # Errors
///
/// `InvalidArg` on empty input.
pub fn await_first<T>(futures: Vec<TaskFuture<T>>) -> Result<T, PoolError> {
    if futures.is_empty() {
        return Err(PoolError::InvalidArg("await_first on empty input".into()));
    }
    let waker = DoneWaker::new();
    for future in &futures {
        future.add_waker(Arc::clone(&waker));
    }
    let mut seen = 0;
    loop {
        for future in &futures {
            if future.is_done() {
                if let Some(result) = future.try_get() {
                    return result;
                }
            }
        }
        seen = waker.wait_past(seen);
    }
}

/// Wait for the first *successful* future; if every future fails, return
/// the last failure observed.
///
/// # Errors
///
/// `InvalidArg` on empty input.
pub fn await_any<T>(futures: Vec<TaskFuture<T>>) -> Result<T, PoolError> {
    if futures.is_empty() {
        return Err(PoolError::InvalidArg("await_any on empty input".into()));
    }
    let waker = DoneWaker::new();
    for future in &futures {
        future.add_waker(Arc::clone(&waker));
    }
    let mut slots: Vec<Option<TaskFuture<T>>> = futures.into_iter().map(Some).collect();
    let mut remaining = slots.len();
    let mut last_err = None;
    let mut seen = 0;
    loop {
        for slot in &mut slots {
            let done = slot.as_ref().is_some_and(TaskFuture::is_done);
            if done {
                let future = slot.take().expect("slot occupied");
                match future.get() {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        last_err = Some(e);
                        remaining -= 1;
                    }
                }
            }
        }
        if remaining == 0 {
            return Err(last_err.expect("at least one failure recorded"));
        }
        seen = waker.wait_past(seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_and_get() {
        let (promise, future) = Promise::new();
        assert!(!future.is_done());
        assert!(promise.complete(5));
        assert!(future.is_done());
        assert_eq!(future.get().unwrap(), 5);
        // Second take reports the slot as consumed.
        assert!(matches!(future.get(), Err(PoolError::InvalidArg(_))));
    }

    #[test]
    fn test_one_shot_transition() {
        let (promise, future) = Promise::new();
        assert!(promise.complete(1));
        assert!(!promise.complete(2));
        assert!(!promise.fail("late"));
        assert_eq!(future.get().unwrap(), 1);
    }

    #[test]
    fn test_fail() {
        let (promise, future) = Promise::<()>::new();
        promise.fail("boom");
        match future.get() {
            Err(PoolError::TaskFailed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected TaskFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_before_complete() {
        let (promise, future) = Promise::<u32>::new();
        assert!(future.cancel());
        assert!(promise.is_canceled());
        assert!(!promise.complete(1));
        assert!(matches!(future.get(), Err(PoolError::FutureCanceled)));
    }

    #[test]
    fn test_get_timeout_expires_then_succeeds() {
        let (promise, future) = Promise::new();
        assert!(matches!(
            future.get_timeout(Duration::from_millis(20)),
            Err(PoolError::FutureTimeout)
        ));
        promise.complete("late but fine");
        assert_eq!(
            future.get_timeout(Duration::from_millis(20)).unwrap(),
            "late but fine"
        );
    }

    #[test]
    fn test_get_blocks_until_complete() {
        let (promise, future) = Promise::new();
        let handle = thread::spawn(move || future.get());
        thread::sleep(Duration::from_millis(20));
        promise.complete(99);
        assert_eq!(handle.join().unwrap().unwrap(), 99);
    }

    #[test]
    fn test_await_all_preserves_order() {
        let pairs: Vec<_> = (0..4).map(|_| Promise::new()).collect();
        let mut futures = Vec::new();
        let mut promises = Vec::new();
        for (promise, future) in pairs {
            promises.push(promise);
            futures.push(future);
        }
        // Complete out of order.
        promises[2].complete(2);
        promises[0].complete(0);
        promises[3].complete(3);
        promises[1].complete(1);

        let results: Vec<i32> = await_all(futures).into_iter().map(Result::unwrap).collect();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_await_first() {
        let (slow_promise, slow) = Promise::new();
        let (fast_promise, fast) = Promise::new();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            fast_promise.complete("fast");
            thread::sleep(Duration::from_millis(200));
            slow_promise.complete("slow");
        });

        let winner = await_first(vec![slow, fast]).unwrap();
        assert_eq!(winner, "fast");
        handle.join().unwrap();
    }

    #[test]
    fn test_await_any_skips_failures() {
        let (p1, f1) = Promise::new();
        let (p2, f2) = Promise::new();
        p1.fail("first failed");
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            p2.complete(7);
        });
        assert_eq!(await_any(vec![f1, f2]).unwrap(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn test_await_any_all_failed() {
        let (p1, f1) = Promise::<()>::new();
        let (p2, f2) = Promise::<()>::new();
        p1.fail("a");
        p2.fail("b");
        assert!(matches!(
            await_any(vec![f1, f2]),
            Err(PoolError::TaskFailed(_))
        ));
    }

    #[test]
    fn test_combinators_reject_empty_input() {
        assert!(matches!(
            await_first(Vec::<TaskFuture<()>>::new()),
            Err(PoolError::InvalidArg(_))
        ));
        assert!(matches!(
            await_any(Vec::<TaskFuture<()>>::new()),
            Err(PoolError::InvalidArg(_))
        ));
        assert!(await_all(Vec::<TaskFuture<()>>::new()).is_empty());
    }
}
