use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded single-producer/single-consumer ring buffer, fixed capacity,
/// no allocation after construction. Used throughout this crate for every
/// UI<->audio channel that carries a stream of values rather than a single
/// snapshot (commands, onset feedback bits, cursor-position feedback,
/// NCSM/QTN voice snapshots): full means drop the newest value, never
/// block.
///
/// `T: Copy` keeps the implementation a plain array of `MaybeUninit<T>`
/// rather than needing drop glue under concurrent access.
pub struct Ring<T: Copy, const N: usize> {
    buf: [UnsafeCell<MaybeUninit<T>>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: `head`/`tail` partition the buffer into producer-owned and
// consumer-owned halves; each slot is touched by exactly one side at a time.
unsafe impl<T: Copy + Send, const N: usize> Sync for Ring<T, N> {}

impl<T: Copy, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> Ring<T, N> {
    pub fn new() -> Self {
        Self {
            buf: [(); N].map(|_| UnsafeCell::new(MaybeUninit::uninit())),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Producer side. Returns `false` (drops `value`) if the ring is full.
    pub fn push(&self, value: T) -> bool {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == N {
            return false;
        }
        let idx = tail % N;
        // SAFETY: slot `idx` is not being read (consumer hasn't advanced
        // `head` past it) because the ring isn't full.
        unsafe {
            (*self.buf[idx].get()).write(value);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = head % N;
        // SAFETY: slot `idx` was published by the producer (tail advanced
        // past it) and is not concurrently written until we advance `head`.
        let value = unsafe { (*self.buf[idx].get()).assume_init() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

/// Single-slot variant with explicit "full => drop newest" semantics and a
/// peek, used for per-block cursor-position feedback.
pub struct LatestSlot<T: Copy> {
    value: UnsafeCell<MaybeUninit<T>>,
    occupied: std::sync::atomic::AtomicBool,
}

unsafe impl<T: Copy + Send> Sync for LatestSlot<T> {}

impl<T: Copy> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            occupied: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Overwrite unconditionally (used for "latest wins" feedback such as
    /// cursor position, where dropping the newest value in favor of a
    /// stale one would be wrong).
    pub fn write(&self, value: T) {
        unsafe {
            (*self.value.get()).write(value);
        }
        self.occupied.store(true, Ordering::Release);
    }

    pub fn take(&self) -> Option<T> {
        if self
            .occupied
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(unsafe { (*self.value.get()).assume_init() })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo_order() {
        let ring: Ring<i32, 4> = Ring::new();
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn full_ring_drops_newest() {
        let ring: Ring<i32, 2> = Ring::new();
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(!ring.push(3));
        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(3));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
    }

    #[test]
    fn latest_slot_overwrites() {
        let slot: LatestSlot<i32> = LatestSlot::new();
        slot.write(1);
        slot.write(2);
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
    }
}
