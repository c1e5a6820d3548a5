//! Thread-safe FIFO queue bridging the I/O tasks and application threads.
//!
//! [`SyncQueue`] is the only synchronization point between the runtime that
//! drives the read/write loops and the application code consuming inbound
//! messages. All operations serialize on one internal mutex; [`SyncQueue::wait`]
//! blocks the calling thread on a condition variable that every push signals.
//!
//! Popping or peeking an empty queue is a checked operation returning
//! `None`, never a panic.
//!
//! # Example
//!
//! ```
//! use meownet::queue::SyncQueue;
//!
//! let queue = SyncQueue::new();
//! queue.push_back(1);
//! queue.push_back(2);
//!
//! assert_eq!(queue.pop_front(), Some(1));
//! assert_eq!(queue.pop_front(), Some(2));
//! assert_eq!(queue.pop_front(), None);
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// An ordered queue safe for many producers and many consumers.
///
/// Insertion order is preserved; consumers take ownership on pop.
pub struct SyncQueue<T> {
    inner: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> SyncQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().expect("queue mutex poisoned")
    }

    /// Push to the back, waking at most one waiter.
    pub fn push_back(&self, value: T) {
        let mut queue = self.lock();
        queue.push_back(value);
        self.ready.notify_one();
    }

    /// Push to the front, waking at most one waiter.
    pub fn push_front(&self, value: T) {
        let mut queue = self.lock();
        queue.push_front(value);
        self.ready.notify_one();
    }

    /// Remove and return the front element, or `None` if empty.
    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove and return the back element, or `None` if empty.
    pub fn pop_back(&self) -> Option<T> {
        self.lock().pop_back()
    }

    /// Number of queued elements. A consistent snapshot, but stale the
    /// moment the lock is released.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard all pending entries. Waiters are not notified; do not
    /// `wait()` on a queue you just cleared without pushing again.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Block the calling thread until the queue is non-empty.
    ///
    /// Intended for application threads, not async tasks.
    pub fn wait(&self) {
        let mut queue = self.lock();
        while queue.is_empty() {
            queue = self.ready.wait(queue).expect("queue mutex poisoned");
        }
    }

    /// Block until the queue is non-empty or `timeout` elapses.
    ///
    /// Returns `true` if the queue was non-empty when the wait ended.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut queue = self.lock();
        if !queue.is_empty() {
            return true;
        }
        let (guard, _result) = self
            .ready
            .wait_timeout(queue, timeout)
            .expect("queue mutex poisoned");
        queue = guard;
        !queue.is_empty()
    }
}

impl<T: Clone> SyncQueue<T> {
    /// Clone of the front element without removing it, or `None` if empty.
    pub fn front(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    /// Clone of the back element without removing it, or `None` if empty.
    pub fn back(&self) -> Option<T> {
        self.lock().back().cloned()
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
