//! Single-owner / many-thief work-stealing deque (Chase-Lev).
//!
//! The owning worker pushes and pops at the bottom and sees a LIFO view,
//! which keeps cache-hot tasks local. Thieves steal from the top and see a
//! FIFO view, so they take the coldest work and rarely collide with the
//! owner. The only contended word is `top`, advanced by CAS; a thief that
//! loses the race moves on to the next victim rather than retrying.
//!
//! Reference: "Dynamic Circular Work-Stealing Deque", Chase & Lev (2005).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{fence, AtomicIsize, AtomicPtr, Ordering};

use super::pad::CachePadded;
use super::spinlock::SpinLock;

const MIN_CAPACITY: usize = 32;

struct Buffer<T> {
    storage: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

impl<T> Buffer<T> {
    fn new(capacity: usize) -> Box<Self> {
        debug_assert!(capacity.is_power_of_two());
        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::new(Self {
            storage,
            mask: capacity - 1,
        })
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Write `value` at logical index `index`.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive write access to this index per the
    /// deque protocol (it is the owner, writing at `bottom`).
    unsafe fn put(&self, index: isize, value: T) {
        let slot = &self.storage[index as usize & self.mask];
        (*slot.get()).write(value);
    }

    /// Read the slot at logical index `index` without asserting validity.
    ///
    /// The result may only be `assume_init`ed after the caller has won the
    /// race for this index; losers must discard the bits untouched.
    ///
    /// # Safety
    ///
    /// `index` must be in `[top, bottom)` of some recent view of the deque
    /// so the slot memory is allocated.
    unsafe fn read(&self, index: isize) -> MaybeUninit<T> {
        let slot = &self.storage[index as usize & self.mask];
        ptr::read(slot.get())
    }
}

/// Lock-free deque with owner `push_bottom`/`pop_bottom` and thief `steal`.
///
/// Grows by doubling when full; grown-out buffers are retired and kept alive
/// until the deque drops, so a thief holding a stale buffer pointer never
/// reads freed memory.
pub struct WorkStealingDeque<T> {
    /// Owner-written cursor; thieves only read it.
    bottom: CachePadded<AtomicIsize>,
    /// Thief-advanced cursor (CAS); the owner contends only for the last item.
    top: CachePadded<AtomicIsize>,
    buffer: AtomicPtr<Buffer<T>>,
    retired: SpinLock<Vec<*mut Buffer<T>>>,
}

// Safety: slot handoff is mediated by the top CAS; retired buffers are freed
// only with exclusive access in Drop.
unsafe impl<T: Send> Send for WorkStealingDeque<T> {}
unsafe impl<T: Send> Sync for WorkStealingDeque<T> {}

impl<T> Default for WorkStealingDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkStealingDeque<T> {
    /// Create an empty deque with the minimum capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bottom: CachePadded::new(AtomicIsize::new(0)),
            top: CachePadded::new(AtomicIsize::new(0)),
            buffer: AtomicPtr::new(Box::into_raw(Buffer::new(MIN_CAPACITY))),
            retired: SpinLock::new(Vec::new()),
        }
    }

    /// Approximate number of queued items (exact for the owner).
    #[must_use]
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        b.saturating_sub(t).max(0) as usize
    }

    /// Whether the deque appears empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owner: push an item at the bottom, growing the buffer if needed.
    pub fn push_bottom(&self, value: T) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut buf = self.buffer.load(Ordering::Acquire);

        // Safety: only the owner calls push_bottom, so buf is stable here.
        unsafe {
            if b.wrapping_sub(t) >= (*buf).capacity() as isize - 1 {
                buf = self.grow(t, b, buf);
            }
            (*buf).put(b, value);
        }
        self.bottom.store(b.wrapping_add(1), Ordering::Release);
    }

    /// Owner: pop the most recently pushed item.
    ///
    /// On the last remaining item the owner races thieves with a CAS on
    /// `top`; losing the race returns `None`.
    pub fn pop_bottom(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        let buf = self.buffer.load(Ordering::Relaxed);
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty; restore bottom to the canonical empty shape.
            self.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        // Safety: index b is within [top, bottom) of the pre-decrement view.
        let value = unsafe { (*buf).read(b) };
        if t == b {
            // Single element: contend with thieves for top.
            let won = self
                .top
                .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            if won {
                // Safety: winning the CAS transfers ownership of the slot.
                return Some(unsafe { value.assume_init() });
            }
            return None;
        }
        // More than one element left; no thief can reach index b.
        // Safety: exclusive access per the protocol.
        Some(unsafe { value.assume_init() })
    }

    /// Thief: steal the oldest item. Loses (returns `None`) instead of
    /// retrying when another thief or the owner wins the CAS.
    pub fn steal(&self) -> Option<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if t >= b {
            return None;
        }

        let buf = self.buffer.load(Ordering::Acquire);
        // Safety: the buffer pointed to is never freed while the deque is
        // alive (grown buffers are retired, not dropped), and t is within
        // the allocated region.
        let value = unsafe { (*buf).read(t) };
        if self
            .top
            .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            // Lost the race; the bits we read belong to someone else now.
            return None;
        }
        // Safety: the CAS transferred ownership of index t to us.
        Some(unsafe { value.assume_init() })
    }

    /// Double the buffer, copying `[top, bottom)`, and retire the old one.
    ///
    /// # Safety
    ///
    /// Owner-only, called from `push_bottom`.
    unsafe fn grow(&self, top: isize, bottom: isize, old: *mut Buffer<T>) -> *mut Buffer<T> {
        let new = Buffer::new(((*old).capacity() * 2).max(MIN_CAPACITY));
        for i in top..bottom {
            let value = (*old).read(i);
            new.put(i, value.assume_init());
        }
        let new = Box::into_raw(new);
        self.buffer.store(new, Ordering::Release);
        // In-flight thieves may still hold the old pointer; keep it alive
        // until Drop.
        self.retired.lock().push(old);
        new
    }
}

impl<T> Drop for WorkStealingDeque<T> {
    fn drop(&mut self) {
        while self.pop_bottom().is_some() {}
        // Safety: &mut self means no thieves remain.
        unsafe {
            drop(Box::from_raw(self.buffer.load(Ordering::Relaxed)));
            for old in self.retired.lock().drain(..) {
                drop(Box::from_raw(old));
            }
        }
    }
}

impl<T> std::fmt::Debug for WorkStealingDeque<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingDeque")
            .field("len", &self.len())
            .finish()
    }
}
