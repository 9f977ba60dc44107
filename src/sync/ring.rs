//! Bounded lock-free MPMC ring queue (Vyukov layout).
//!
//! Each slot carries a sequence number that encodes both its generation and
//! its handoff state: `seq == pos` means the slot is free for the producer
//! claiming position `pos`, `seq == pos + 1` means it is readable by the
//! consumer at `pos`. Producers and consumers claim positions with a CAS on
//! the `tail`/`head` counters and then complete the value transfer without
//! further synchronization, so the queue is wait-free when uncontended and
//! lock-free otherwise. The generation arithmetic makes ABA a non-issue.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::backoff::Backoff;
use super::pad::CachePadded;

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded multi-producer multi-consumer queue.
///
/// Capacity is rounded up to a power of two. `push` fails (returning the
/// value) when the queue is full; `pop` returns `None` when empty. Neither
/// ever blocks.
///
/// # Examples
///
/// ```
/// use poolx::sync::BoundedQueue;
///
/// let queue = BoundedQueue::new(4);
/// queue.push(1).unwrap();
/// queue.push(2).unwrap();
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct BoundedQueue<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    buffer: Box<[Slot<T>]>,
}

// Safety: value slots are handed off between threads under the sequence
// protocol; a slot is written by exactly one producer and read by exactly
// one consumer per generation.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at least `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be positive");
        let capacity = capacity.next_power_of_two();
        let buffer = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            mask: capacity - 1,
            buffer,
        }
    }

    /// Rounded-up capacity of the queue.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Approximate number of queued elements.
    ///
    /// Exact only when no producer or consumer is mid-flight.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head).min(self.capacity())
    }

    /// Whether the queue appears empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `value`, returning it back if the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut backoff = Backoff::new();
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                // Slot free for this generation; claim the position.
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS gives us exclusive write access to
                        // this slot until we publish the new sequence.
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Sequence a full lap behind: the consumer has not freed
                // this slot yet.
                return Err(value);
            } else {
                // Another producer claimed pos but has not published yet.
                backoff.spin();
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue the oldest element, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut backoff = Backoff::new();
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS gives us exclusive read access; the
                        // producer published the value before setting seq.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                backoff.spin();
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // Drain so queued values run their destructors.
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let queue = BoundedQueue::<u32>::new(5);
        assert_eq!(queue.capacity(), 8);
    }

    #[test]
    fn test_push_pop_round_trip() {
        let queue = BoundedQueue::new(2);
        queue.push("a").unwrap();
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_rejects() {
        let queue = BoundedQueue::new(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.pop(), Some(1));
        queue.push(3).unwrap();
    }

    #[test]
    fn test_fifo_per_producer() {
        let queue = BoundedQueue::new(64);
        for i in 0..50 {
            queue.push(i).unwrap();
        }
        for i in 0..50 {
            assert_eq!(queue.pop(), Some(i));
        }
    }

    #[test]
    fn test_mpmc_no_loss_no_duplication() {
        use std::sync::atomic::{AtomicU64, Ordering};

        const PRODUCERS: u64 = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: u64 = 10_000;
        const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

        let queue = Arc::new(BoundedQueue::new(128));
        let consumed = Arc::new(AtomicU64::new(0));
        let mut producers = vec![];
        for p in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut value = p * PER_PRODUCER + i;
                    loop {
                        match queue.push(value) {
                            Ok(()) => break,
                            Err(v) => {
                                value = v;
                                thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let mut consumers = vec![];
        for _ in 0..CONSUMERS {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            consumers.push(thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    match queue.pop() {
                        Some(v) => {
                            seen.push(v);
                            consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        None if consumed.load(Ordering::Relaxed) >= TOTAL => break,
                        None => thread::yield_now(),
                    }
                }
                seen
            }));
        }

        for handle in producers {
            handle.join().unwrap();
        }
        let mut all = HashSet::new();
        for handle in consumers {
            for v in handle.join().unwrap() {
                assert!(all.insert(v), "duplicate element {v}");
            }
        }
        assert_eq!(all.len() as u64, TOTAL, "lost elements");
    }

    #[test]
    fn test_drop_drains_values() {
        let queue = BoundedQueue::new(8);
        let value = Arc::new(());
        queue.push(Arc::clone(&value)).unwrap();
        queue.push(Arc::clone(&value)).unwrap();
        drop(queue);
        assert_eq!(Arc::strong_count(&value), 1);
    }
}
