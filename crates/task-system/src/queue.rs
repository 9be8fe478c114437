//! The blocking queue: the primitive every other piece of the scheduler is
//! built from. A mutex-protected FIFO plus a condition variable signalled on
//! every push, modeled directly on the original `ThreadQueue<T>`.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Multi-producer/multi-consumer FIFO queue. Cloning a `BlockingQueue`
/// clones the handle, not the contents -- wrap it in an `Arc` (or just put
/// it behind one, as `Worker` does) to share it across threads.
pub struct BlockingQueue<T> {
    state: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues `msg` and wakes one waiter blocked in `wait_pop`.
    pub fn push(&self, msg: T) {
        let mut state = self.state.lock();
        state.push_back(msg);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Blocks until a message is available, then dequeues it.
    pub fn wait_pop(&self) -> T {
        let mut state = self.state.lock();
        while state.is_empty() {
            self.not_empty.wait(&mut state);
        }
        state.pop_front().expect("queue non-empty under lock")
    }

    /// Blocks until a message is available or `timeout` elapses. Returns
    /// `None` on timeout, matching the original `waitPopUntil`.
    pub fn wait_pop_until(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        if state.is_empty() {
            let result = self.not_empty.wait_for(&mut state, timeout);
            if result.timed_out() && state.is_empty() {
                return None;
            }
        }
        state.pop_front()
    }

    /// Non-blocking pop: dequeues a message if one is present.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires the queue's lock for the duration of the returned guard,
    /// allowing a caller to combine a peek with a conditional pop without
    /// releasing the lock in between. Used by the file watcher to drain its
    /// control queue between iterations of a blocking native wait.
    pub fn acquire(&self) -> BlockingQueueGuard<'_, T> {
        BlockingQueueGuard {
            guard: self.state.lock(),
            not_empty: &self.not_empty,
        }
    }
}

/// A held lock on a [`BlockingQueue`]. Dropping it releases the lock.
pub struct BlockingQueueGuard<'a, T> {
    guard: MutexGuard<'a, VecDeque<T>>,
    not_empty: &'a Condvar,
}

impl<T> BlockingQueueGuard<'_, T> {
    /// Pops a message while still holding the lock, without notifying
    /// (there is nothing to notify on a pop).
    pub fn try_pop(&mut self) -> Option<T> {
        self.guard.pop_front()
    }

    /// Pushes a message while still holding the lock.
    pub fn push(&mut self, msg: T) {
        self.guard.push_back(msg);
        self.not_empty.notify_one();
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_per_producer() {
        let q = BlockingQueue::new();
        for i in 0..100 {
            q.push(i);
        }
        for i in 0..100 {
            assert_eq!(q.wait_pop(), i);
        }
    }

    #[test]
    fn try_pop_empty_returns_none() {
        let q: BlockingQueue<i32> = BlockingQueue::new();
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn wait_pop_blocks_until_pushed() {
        let q = Arc::new(BlockingQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.wait_pop());

        thread::sleep(Duration::from_millis(20));
        q.push(7);
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn wait_pop_until_times_out() {
        let q: BlockingQueue<i32> = BlockingQueue::new();
        let result = q.wait_pop_until(Duration::from_millis(10));
        assert_eq!(result, None);
    }

    #[test]
    fn acquire_combines_peek_and_pop() {
        let q = BlockingQueue::new();
        q.push(1);
        let mut guard = q.acquire();
        assert!(!guard.is_empty());
        assert_eq!(guard.try_pop(), Some(1));
        assert_eq!(guard.try_pop(), None);
    }
}
