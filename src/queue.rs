//! Blocking FIFO with graceful termination.
//!
//! One mutex guards the list, one condvar signals availability. This single
//! abstraction backs the shard request queues, the notifier's finished-request
//! queue, and the operation pool's free list.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// An unbounded FIFO with blocking dequeue and graceful termination.
///
/// [`stop`](Self::stop) marks the queue terminating and wakes all waiters.
/// [`pop`](Self::pop) keeps handing out queued items during termination and
/// returns `None` only once the queue is terminating *and* empty, so items
/// enqueued before shutdown are drained rather than dropped.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    terminating: bool,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                terminating: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append to the tail and wake one waiter.
    ///
    /// Fails only after [`stop`](Self::stop), handing the item back to the
    /// caller so it can be failed or redirected instead of stranded.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock().unwrap();
        if state.terminating {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Remove and return the head, blocking while the queue is empty.
    ///
    /// Returns `None` only when the queue is terminating and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.terminating {
                return None;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Remove and return the head without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().unwrap().items.pop_front()
    }

    /// Mark the queue terminating and wake all waiters. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.terminating = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_terminating(&self) -> bool {
        self.state.lock().unwrap().terminating
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
