//! Fixed-capacity pool of reusable operation records.

use std::sync::Arc;

use crate::metrics;
use crate::operation::IoOperation;
use crate::queue::BlockingQueue;

/// A bounded free-list of [`IoOperation`] records.
///
/// The capacity is fixed at construction and bounds the number of
/// operations in flight, which in turn bounds the pressure the scheduler
/// puts on the DMA translator. Acquire blocks on exhaustion; release wakes
/// one waiter.
pub struct OperationPool {
    free: BlockingQueue<Arc<IoOperation>>,
    capacity: usize,
}

impl OperationPool {
    /// Pre-allocate `capacity` operations, each carrying the given
    /// short-transfer retry budget.
    pub fn new(capacity: usize, short_retry_limit: u32) -> Self {
        let free = BlockingQueue::new();
        for _ in 0..capacity {
            // Cannot fail: the queue has not been stopped yet.
            let _ = free.push(Arc::new(IoOperation::new(short_retry_limit)));
        }
        metrics::POOL_FREE.set(capacity as i64);
        Self { free, capacity }
    }

    /// Take a free operation, blocking while the pool is exhausted.
    /// Returns `None` only when the pool is terminating.
    pub fn acquire(&self) -> Option<Arc<IoOperation>> {
        let operation = self.free.pop();
        if operation.is_some() {
            metrics::POOL_FREE.decrement();
        }
        operation
    }

    /// Take a free operation, or `None` immediately if the pool is empty.
    pub fn try_acquire(&self) -> Option<Arc<IoOperation>> {
        let operation = self.free.try_pop();
        if operation.is_some() {
            metrics::POOL_FREE.decrement();
        }
        operation
    }

    /// Detach the operation from its request and return it to the free
    /// list, waking one blocked acquirer.
    pub fn release(&self, operation: Arc<IoOperation>) {
        operation.set_parent(None);
        if self.free.push(operation).is_ok() {
            metrics::POOL_FREE.increment();
        }
    }

    /// Wake all blocked acquirers with `None`. Idempotent.
    pub fn stop(&self) {
        self.free.stop();
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn capacity_bounds_outstanding_operations() {
        let pool = OperationPool::new(2, 0);
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        pool.release(a);
        assert!(pool.try_acquire().is_some());
        drop(b);
    }

    #[test]
    fn release_wakes_a_blocked_acquirer() {
        let pool = Arc::new(OperationPool::new(1, 0));
        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().is_some())
        };
        thread::sleep(Duration::from_millis(50));
        pool.release(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn stop_unblocks_acquirers_with_none() {
        let pool = Arc::new(OperationPool::new(1, 0));
        let _held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire())
        };
        thread::sleep(Duration::from_millis(50));
        pool.stop();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn released_operations_are_detached() {
        use crate::request::{IoDirection, IoRequest, PhysicalBuffer};

        let pool = OperationPool::new(1, 0);
        let operation = pool.acquire().unwrap();
        let request = Arc::new(IoRequest::new(
            0,
            512,
            IoDirection::Read,
            Arc::new(PhysicalBuffer),
            1,
            1,
        ));
        operation.set_parent(Some(request));
        pool.release(operation);
        let operation = pool.acquire().unwrap();
        assert!(operation.parent().is_none());
    }
}
