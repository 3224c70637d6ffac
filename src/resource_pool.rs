//! Bounded pool of external-dependency handles with blocking checkout.
//!
//! All handles are created up front; `acquire` blocks on a semaphore seeded to
//! the capacity and never fails once the pool exists. A checked-out handle is
//! returned by dropping its [`PoolGuard`], so every exit path releases it.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use crate::sync::Semaphore;

struct Slots<H> {
    free: Vec<H>,
    outstanding: usize,
}

pub struct ResourcePool<H> {
    slots: Mutex<Slots<H>>,
    available: Semaphore,
    capacity: usize,
}

impl<H> ResourcePool<H> {
    /// Create `capacity` handles with `connect`. The first failure aborts the
    /// whole pool.
    pub fn new<E, F>(capacity: usize, mut connect: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<H, E>,
    {
        let mut free = Vec::with_capacity(capacity);
        for id in 0..capacity {
            free.push(connect(id)?);
        }
        Ok(Self {
            slots: Mutex::new(Slots {
                free,
                outstanding: 0,
            }),
            available: Semaphore::new(capacity),
            capacity,
        })
    }

    /// Check out one handle, blocking while none are free.
    pub fn acquire(&self) -> PoolGuard<'_, H> {
        self.available.acquire();
        let mut slots = self.slots.lock();
        let handle = slots
            .free
            .pop()
            .unwrap_or_else(|| unreachable!("semaphore permit without a free handle"));
        slots.outstanding += 1;
        PoolGuard {
            pool: self,
            handle: Some(handle),
        }
    }

    fn release(&self, handle: H) {
        let mut slots = self.slots.lock();
        slots.free.push(handle);
        slots.outstanding -= 1;
        drop(slots);
        self.available.release();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `(free, outstanding)`; their sum is always the capacity.
    pub fn counts(&self) -> (usize, usize) {
        let slots = self.slots.lock();
        (slots.free.len(), slots.outstanding)
    }
}

/// A checked-out handle. Dropping it puts the handle back and wakes one waiter.
pub struct PoolGuard<'a, H> {
    pool: &'a ResourcePool<H>,
    handle: Option<H>,
}

impl<H> Deref for PoolGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.handle.as_ref().expect("handle present until drop")
    }
}

impl<H> DerefMut for PoolGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.handle.as_mut().expect("handle present until drop")
    }
}

impl<H> Drop for PoolGuard<'_, H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}
