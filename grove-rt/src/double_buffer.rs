use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Hook invoked by the writer after it observes a completed reader swap, so
/// the writer's next edit can start from what the reader is now looking at.
/// The default just copies the reader's buffer forward.
pub trait SwapPolicy<T> {
    fn on_reader_swap(write_to: &mut T, read_from: &T);
}

/// Default policy: writer's next edit starts from the reader's view.
pub struct CopyForward;

impl<T: Clone> SwapPolicy<T> for CopyForward {
    fn on_reader_swap(write_to: &mut T, read_from: &T) {
        write_to.clone_from(read_from);
    }
}

/// Two fixed storage slots behind `write_to`/`read_from` indices, swapped
/// without ever touching `T` on the thread that doesn't own it at that
/// moment.
///
/// Writer protocol: call [`writer_can_modify`](Self::writer_can_modify),
/// mutate via [`write_mut`](Self::write_mut), then
/// [`writer_update`](Self::writer_update) to either flag the edit as
/// pending or (if the reader already swapped) run the swap policy.
///
/// Reader protocol: [`reader_read`](Self::reader_read) atomically checks
/// for a pending edit, swaps if one exists, and returns the (possibly just
/// swapped-to) buffer.
pub struct DoubleBuffer<T, P: SwapPolicy<T> = CopyForward> {
    slots: [UnsafeCell<T>; 2],
    write_to: AtomicUsize,
    /// Set by the writer when it has an unseen edit; cleared by the reader
    /// when it swaps to pick it up.
    changed: AtomicBool,
    /// Set by the reader after it swaps; cleared by the writer once it has
    /// run the swap policy in response.
    swapped: AtomicBool,
    _policy: std::marker::PhantomData<P>,
}

// SAFETY: the `write_to` index plus `changed`/`swapped` flags ensure the
// writer and reader never access the same slot at the same time.
unsafe impl<T: Send, P: SwapPolicy<T>> Sync for DoubleBuffer<T, P> {}

impl<T: Default, P: SwapPolicy<T>> Default for DoubleBuffer<T, P> {
    fn default() -> Self {
        Self::new(T::default(), T::default())
    }
}

impl<T, P: SwapPolicy<T>> DoubleBuffer<T, P> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [UnsafeCell::new(a), UnsafeCell::new(b)],
            write_to: AtomicUsize::new(0),
            changed: AtomicBool::new(false),
            swapped: AtomicBool::new(false),
            _policy: std::marker::PhantomData,
        }
    }

    fn read_to(&self) -> usize {
        1 - self.write_to.load(Ordering::SeqCst)
    }

    /// True iff the writer is not currently waiting on an unconsumed swap.
    pub fn writer_can_modify(&self) -> bool {
        !self.changed.load(Ordering::SeqCst)
    }

    /// Mutable access to the writer's current slot.
    pub fn write_mut(&self) -> &mut T {
        let idx = self.write_to.load(Ordering::SeqCst);
        // SAFETY: only the writer calls this, and only while it owns the
        // write slot per the protocol above.
        unsafe { &mut *self.slots[idx].get() }
    }

    /// Call once per writer-side update cycle, after any edits.
    pub fn writer_update(&self) {
        if self.swapped.swap(false, Ordering::SeqCst) {
            let write_idx = self.write_to.load(Ordering::SeqCst);
            let read_idx = self.read_to();
            // SAFETY: the reader has already moved off `write_idx` (it just
            // swapped away from it), and it won't touch `read_idx` (its new
            // write-side view) until the writer yields it back.
            let (write_to, read_from) = unsafe {
                (
                    &mut *self.slots[write_idx].get(),
                    &*self.slots[read_idx].get(),
                )
            };
            P::on_reader_swap(write_to, read_from);
        }
        self.changed.store(true, Ordering::SeqCst);
    }

    /// Reader side: read the latest data, swapping buffers first if the
    /// writer has a pending edit.
    pub fn reader_read(&self) -> &T {
        if self
            .changed
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let new_write = self.read_to();
            self.write_to.store(new_write, Ordering::SeqCst);
            self.swapped.store(true, Ordering::SeqCst);
        }
        let idx = self.read_to();
        // SAFETY: the writer does not touch this slot until it observes
        // `swapped`.
        unsafe { &*self.slots[idx].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sees_published_edit() {
        let db: DoubleBuffer<i32> = DoubleBuffer::new(0, 0);
        assert_eq!(*db.reader_read(), 0);
        *db.write_mut() = 5;
        db.writer_update();
        assert_eq!(*db.reader_read(), 5);
    }

    #[test]
    fn writer_starts_next_edit_from_reader_view() {
        let db: DoubleBuffer<Vec<i32>> = DoubleBuffer::new(vec![], vec![]);
        db.write_mut().push(1);
        db.writer_update();
        assert_eq!(db.reader_read(), &vec![1]);
        // Writer's slot (the other one) should now mirror the reader's view
        // after the next writer_update, via CopyForward.
        db.writer_update();
        assert_eq!(db.write_mut(), &vec![1]);
    }
}
