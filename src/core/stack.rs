//! LIFO worker cache with idle-expiry retrieval.
//!
//! A spinlock-guarded circular buffer of idle workers. `push`/`pop` operate
//! at the head so the most recently parked worker is reused first, keeping
//! its stacks and caches warm. `retrieve_expiry` collects workers idle past
//! a deadline and compacts the survivors to the front of the buffer.

use std::sync::Arc;
use std::time::Duration;

use crate::sync::SpinLock;

/// Implemented by worker handles the stack can age out.
pub(crate) trait IdleWorker {
    /// Wall-clock ms timestamp of the worker's last completed task.
    fn last_active_ms(&self) -> u64;
}

struct StackInner<W> {
    items: Vec<Option<Arc<W>>>,
    head: usize,
    len: usize,
}

impl<W> StackInner<W> {
    // Oldest occupied slot is `head - len`, newest is `head - 1`, both
    // modulo capacity.
    fn slot(&self, i: usize) -> usize {
        let cap = self.items.len();
        (self.head + cap - self.len + i) % cap
    }
}

pub(crate) struct WorkerStack<W> {
    inner: SpinLock<StackInner<W>>,
}

impl<W: IdleWorker> WorkerStack<W> {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut items = Vec::new();
        items.resize_with(capacity.max(1), || None);
        Self {
            inner: SpinLock::new(StackInner {
                items,
                head: 0,
                len: 0,
            }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Park a worker at the head. Returns the worker back when the buffer is
    /// full (possible after a shrinking `tune`), in which case it must exit.
    pub(crate) fn push(&self, worker: Arc<W>) -> Result<(), Arc<W>> {
        let mut inner = self.inner.lock();
        let cap = inner.items.len();
        if inner.len == cap {
            return Err(worker);
        }
        let head = inner.head;
        inner.items[head] = Some(worker);
        inner.head = (head + 1) % cap;
        inner.len += 1;
        Ok(())
    }

    /// Take the most recently parked worker.
    pub(crate) fn pop(&self) -> Option<Arc<W>> {
        let mut inner = self.inner.lock();
        if inner.len == 0 {
            return None;
        }
        let cap = inner.items.len();
        inner.head = (inner.head + cap - 1) % cap;
        inner.len -= 1;
        let head = inner.head;
        inner.items[head].take()
    }

    /// Remove up to `max_reclaim` workers idle longer than `max_idle` and
    /// compact the survivors so the occupied region starts at slot zero.
    pub(crate) fn retrieve_expiry(
        &self,
        max_idle: Duration,
        now_ms: u64,
        max_reclaim: usize,
    ) -> Vec<Arc<W>> {
        if max_reclaim == 0 {
            return Vec::new();
        }
        let mut inner = self.inner.lock();
        let threshold_ms = max_idle.as_millis() as u64;
        let mut expired = Vec::new();
        let mut keep = Vec::new();

        for i in 0..inner.len {
            let slot = inner.slot(i);
            let worker = inner.items[slot].take().expect("occupied slot");
            let idle_for = now_ms.saturating_sub(worker.last_active_ms());
            if idle_for > threshold_ms && expired.len() < max_reclaim {
                expired.push(worker);
            } else {
                keep.push(worker);
            }
        }

        let new_len = keep.len();
        for (i, worker) in keep.into_iter().enumerate() {
            inner.items[i] = Some(worker);
        }
        inner.head = new_len % inner.items.len();
        inner.len = new_len;
        expired
    }

    /// Resize the buffer. On shrink, the oldest overflow workers are
    /// returned for termination; the hottest `new_cap` stay parked.
    pub(crate) fn set_capacity(&self, new_cap: usize) -> Vec<Arc<W>> {
        let new_cap = new_cap.max(1);
        let mut inner = self.inner.lock();
        let mut occupied = Vec::with_capacity(inner.len);
        for i in 0..inner.len {
            let slot = inner.slot(i);
            occupied.push(inner.items[slot].take().expect("occupied slot"));
        }

        let overflow = occupied.len().saturating_sub(new_cap);
        let evicted: Vec<Arc<W>> = occupied.drain(..overflow).collect();

        let mut items = Vec::new();
        items.resize_with(new_cap, || None);
        let new_len = occupied.len();
        for (i, worker) in occupied.into_iter().enumerate() {
            items[i] = Some(worker);
        }
        inner.items = items;
        inner.head = new_len % new_cap;
        inner.len = new_len;
        evicted
    }
}
