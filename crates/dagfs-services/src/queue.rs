//! Bounded descriptor ring with readiness signals.
//!
//! One ring carries entries in one direction between exactly two parties.
//! Storage is a fixed arena of slots indexed by position: pushing moves an
//! entry into the slot at the tail, popping moves it back out of the slot at
//! the head, so an entry is owned by exactly one side at any time.
//!
//! Two signals accompany each ring:
//!   avail — raised when the ring goes from empty to non-empty (wakes the consumer)
//!   space — raised when the ring goes from full to non-full (wakes the producer)
//!
//! A signal is raised at least once per transition and may coalesce with
//! others. Waiters must re-check the ring after waking.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Returned by `push` when the ring has no free slot. Gives the entry back.
#[derive(Debug, PartialEq, Eq)]
pub struct RingFull<T>(pub T);

struct Slots<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

/// Fixed-capacity FIFO ring.
pub struct Ring<T> {
    state: Mutex<Slots<T>>,
    avail: Notify,
    space: Notify,
}

impl<T> Ring<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            state: Mutex::new(Slots {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
            }),
            avail: Notify::new(),
            space: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let state = self.state.lock();
        state.len == state.slots.len()
    }

    /// Move an entry into the tail slot.
    pub fn push(&self, entry: T) -> Result<(), RingFull<T>> {
        let was_empty = {
            let mut state = self.state.lock();
            let cap = state.slots.len();
            if state.len == cap {
                return Err(RingFull(entry));
            }
            let tail = (state.head + state.len) % cap;
            state.slots[tail] = Some(entry);
            state.len += 1;
            state.len == 1
        };
        if was_empty {
            self.avail.notify_one();
        }
        Ok(())
    }

    /// Move the head entry out of its slot.
    pub fn pop(&self) -> Option<T> {
        let (entry, was_full) = {
            let mut state = self.state.lock();
            if state.len == 0 {
                return None;
            }
            let cap = state.slots.len();
            let was_full = state.len == cap;
            let head = state.head;
            let entry = state.slots[head].take();
            state.head = (head + 1) % cap;
            state.len -= 1;
            (entry, was_full)
        };
        if was_full {
            self.space.notify_one();
        }
        entry
    }

    /// Drop every queued entry. Used on session teardown.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.len;
        state.slots.iter_mut().for_each(|slot| *slot = None);
        state.head = 0;
        state.len = 0;
        dropped
    }

    /// Resolves after the ring became non-empty (or a wake-up was forced).
    pub async fn wait_avail(&self) {
        self.avail.notified().await
    }

    /// Resolves after the ring became non-full (or a wake-up was forced).
    pub async fn wait_space(&self) {
        self.space.notified().await
    }

    /// Wake every current and the next future waiter on both signals.
    pub fn wake_all(&self) {
        self.avail.notify_waiters();
        self.avail.notify_one();
        self.space.notify_waiters();
        self.space.notify_one();
    }
}
