use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::sync::Semaphore;

/// Returned by [`WorkQueue::push`] when the queue is over its limit. Carries the
/// rejected item back so the caller keeps ownership of it.
pub struct Rejected<T>(pub T);

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rejected(..)")
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Mutex-protected FIFO gated by a semaphore: one permit per queued item.
///
/// `push` never blocks. The overflow check is `len > max_items`, so the queue
/// holds at most `max_items + 1` entries.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    ready: Semaphore,
    max_items: usize,
}

impl<T> WorkQueue<T> {
    pub fn new(max_items: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Semaphore::new(0),
            max_items,
        }
    }

    pub fn push(&self, item: T) -> Result<(), Rejected<T>> {
        let mut state = self.state.lock();
        if state.closed || state.items.len() > self.max_items {
            return Err(Rejected(item));
        }
        state.items.push_back(item);
        drop(state);
        self.ready.release();
        Ok(())
    }

    /// Block until an item is available. Returns `None` once the queue has been
    /// closed and drained.
    pub fn pop(&self) -> Option<T> {
        loop {
            self.ready.acquire();
            let mut state = self.state.lock();
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                drop(state);
                // Pass the wakeup on so every blocked consumer observes the close.
                self.ready.release();
                return None;
            }
        }
    }

    /// Stop accepting items and wake blocked consumers. Items already queued are
    /// still handed out.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.release();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
