//! Blocking primitives shared by the worker pool, the resource pool and the
//! I/O-in-worker dispatch path.
//!
//! Both types are a `parking_lot` mutex paired with a condition variable; no
//! lock-free state.

use parking_lot::{Condvar, Mutex};

/// Counting semaphore. `release` wakes at most one blocked `acquire`.
pub struct Semaphore {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cond: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cond.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take a permit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.cond.notify_one();
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

/// Single-use rendezvous: one side calls `complete`, the other blocks in `wait`
/// until the value arrives.
pub struct Completion<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn complete(&self, value: T) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "completion signalled twice");
        *slot = Some(value);
        drop(slot);
        self.cond.notify_one();
    }

    /// Block until `complete` has been called and take the value.
    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.cond.wait(&mut slot);
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}
