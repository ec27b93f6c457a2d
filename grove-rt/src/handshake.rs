use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-producer/single-consumer, bounded to one outstanding message.
///
/// State machine: `Idle` (producer may [`publish`](Handshake::publish)) ->
/// `Published` (consumer may [`read`](Handshake::read) or
/// [`peek`](Handshake::peek)) -> `Acked` (producer may
/// [`acknowledged`](Handshake::acknowledged), returning to `Idle`).
///
/// `written` and `read` are the only shared state and are both
/// sequentially consistent, which is what lets the producer and consumer
/// treat `data` as exclusively theirs for the whole half of the cycle they
/// own: the producer writes it only while transitioning `Idle -> Published`,
/// the consumer only ever moves it out while transitioning
/// `Published -> Acked`.
#[derive(Debug)]
pub struct Handshake<T> {
    written: AtomicBool,
    read: AtomicBool,
    data: UnsafeCell<Option<T>>,
}

// SAFETY: access to `data` is serialized by the `written`/`read` state
// machine, never concurrent.
unsafe impl<T: Send> Sync for Handshake<T> {}

impl<T> Default for Handshake<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Handshake<T> {
    pub const fn new() -> Self {
        Self {
            written: AtomicBool::new(false),
            read: AtomicBool::new(false),
            data: UnsafeCell::new(None),
        }
    }

    /// Publish `value`. Usage error (debug-asserts) to call this while a
    /// previous publish is still awaiting acknowledgment.
    pub fn publish(&self, value: T) {
        debug_assert!(
            !self.written.load(Ordering::SeqCst),
            "Handshake::publish called while a previous value is still awaiting read"
        );
        // SAFETY: not yet `written`, so the consumer cannot be touching `data`.
        unsafe {
            *self.data.get() = Some(value);
        }
        self.written.store(true, Ordering::SeqCst);
    }

    /// Consumer side: take the published value, if any, transitioning to
    /// `Acked` only once the producer observes it via
    /// [`acknowledged`](Self::acknowledged).
    pub fn read(&self) -> Option<T> {
        if self
            .written
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // SAFETY: `written` just flipped false->true->false under us
            // exclusively; the producer won't touch `data` again until it
            // observes `read == true` below.
            let value = unsafe { (*self.data.get()).take() };
            self.read.store(true, Ordering::SeqCst);
            value
        } else {
            None
        }
    }

    /// Like [`publish`](Self::publish), but never overwrites an
    /// unconsumed value: returns `false` (and leaves `value` undelivered)
    /// instead of panicking/asserting. Used for feedback rings where a
    /// full slot just means "try again next block."
    pub fn try_publish(&self, value: T) -> bool {
        if self
            .written
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        // SAFETY: we just flipped `written` false->true exclusively; the
        // consumer cannot be touching `data` until it observes that.
        unsafe {
            *self.data.get() = Some(value);
        }
        true
    }

    /// Consumer side: look at the published value without consuming it.
    pub fn peek(&self) -> Option<&T> {
        if self.written.load(Ordering::SeqCst) {
            // SAFETY: the producer won't mutate `data` while `written` is
            // still true.
            unsafe { (*self.data.get()).as_ref() }
        } else {
            None
        }
    }

    /// Producer side: has the consumer acknowledged the last publish?
    pub fn acknowledged(&self) -> bool {
        self.read
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn publish_then_read_roundtrips() {
        let hs = Handshake::new();
        assert!(hs.read().is_none());
        hs.publish(42);
        assert_eq!(hs.peek().copied(), Some(42));
        assert_eq!(hs.read(), Some(42));
        assert!(hs.read().is_none());
    }

    #[test]
    fn acknowledged_only_after_read() {
        let hs = Handshake::new();
        hs.publish("hello");
        assert!(!hs.acknowledged());
        let _ = hs.read();
        assert!(hs.acknowledged());
        assert!(!hs.acknowledged());
    }

    #[test]
    fn try_publish_fails_while_unconsumed() {
        let hs = Handshake::new();
        assert!(hs.try_publish(1));
        assert!(!hs.try_publish(2));
        assert_eq!(hs.read(), Some(1));
        assert!(hs.try_publish(3));
    }

    #[test]
    fn cross_thread_handoff() {
        let hs = Arc::new(Handshake::new());
        let hs2 = hs.clone();
        let writer = thread::spawn(move || {
            hs2.publish(7);
            while !hs2.acknowledged() {
                thread::yield_now();
            }
        });
        let mut got = None;
        while got.is_none() {
            got = hs.read();
        }
        writer.join().unwrap();
        assert_eq!(got, Some(7));
    }
}
