//! # Delivery Queue
//!
//! Multi-producer, multi-consumer FIFO between the engine and the threads
//! that feed or drain it.
//!
//! - Blocking consumers park on a condition variable until a row arrives
//!   or the queue is closed.
//! - Async consumers wait on [`DeliveryQueue::ready_notify`] and then drain
//!   with [`DeliveryQueue::try_pop`].
//! - A bounded queue either blocks producers or rejects the row, depending
//!   on its [`OverflowPolicy`].
//!
//! Per-producer order is preserved. Closing wakes everyone; items already
//! queued remain poppable until the queue is empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error_codes::{ErrorCode, HasErrorCode};

/// How often a blocked producer re-checks its cancellation flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What a bounded queue does when full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Producer waits for space.
    #[default]
    Block,
    /// Push fails with [`QueueError::Full`].
    Reject,
}

/// Capacity and overflow behaviour of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum queued items; `None` is unbounded.
    pub capacity: Option<usize>,
    /// Behaviour when `capacity` is reached.
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    /// Unbounded queue.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::Block,
        }
    }

    /// Bounded queue with the given policy.
    #[must_use]
    pub const fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Queue operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Bounded queue with [`OverflowPolicy::Reject`] is full.
    #[error("queue is full")]
    Full,
    /// Queue was closed.
    #[error("queue is closed")]
    Closed,
    /// Blocked push was cancelled.
    #[error("push cancelled")]
    Cancelled,
}

impl HasErrorCode for QueueError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::Unavailable
    }
}

/// Counters of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Items currently queued.
    pub len: usize,
    /// Items accepted.
    pub pushed: u64,
    /// Items handed to consumers.
    pub popped: u64,
    /// Items refused because the queue was full.
    pub rejected: u64,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    pushed: u64,
    popped: u64,
    rejected: u64,
}

/// FIFO handoff queue. See the [module docs](self).
#[derive(Debug)]
pub struct DeliveryQueue<T> {
    config: QueueConfig,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    ready: Arc<Notify>,
}

impl<T> DeliveryQueue<T> {
    /// Creates an open, empty queue.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
                pushed: 0,
                popped: 0,
                rejected: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            ready: Arc::new(Notify::new()),
        }
    }

    /// Capacity and overflow policy.
    #[must_use]
    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Appends an item, honouring the overflow policy.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] under [`OverflowPolicy::Reject`],
    /// [`QueueError::Closed`] once the queue is closed.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        self.push_inner(item, None)
    }

    /// Like [`push`](Self::push), but a producer blocked on a full queue
    /// gives up once `cancel` becomes true.
    ///
    /// # Errors
    ///
    /// As [`push`](Self::push), plus [`QueueError::Cancelled`].
    pub fn push_cancellable(&self, item: T, cancel: &AtomicBool) -> Result<(), QueueError> {
        self.push_inner(item, Some(cancel))
    }

    fn push_inner(&self, item: T, cancel: Option<&AtomicBool>) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if let Some(capacity) = self.config.capacity {
            while !state.closed && state.items.len() >= capacity {
                if self.config.overflow == OverflowPolicy::Reject {
                    state.rejected += 1;
                    return Err(QueueError::Full);
                }
                match cancel {
                    Some(flag) => {
                        if flag.load(Ordering::Acquire) {
                            return Err(QueueError::Cancelled);
                        }
                        self.not_full.wait_for(&mut state, CANCEL_POLL_INTERVAL);
                    }
                    None => self.not_full.wait(&mut state),
                }
            }
        }
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.items.push_back(item);
        state.pushed += 1;
        drop(state);

        self.not_empty.notify_one();
        self.ready.notify_one();
        Ok(())
    }

    /// Removes the oldest item, waiting until one is available.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] once the queue is closed and drained.
    pub fn pop_blocking(&self) -> Result<T, QueueError> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.popped += 1;
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Removes the oldest item if there is one.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] once the queue is closed and drained; an
    /// empty open queue yields `Ok(None)`.
    pub fn try_pop(&self) -> Result<Option<T>, QueueError> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => {
                state.popped += 1;
                drop(state);
                self.not_full.notify_one();
                Ok(Some(item))
            }
            None if state.closed => Err(QueueError::Closed),
            None => Ok(None),
        }
    }

    /// Closes the queue and wakes every waiter.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            len: state.items.len(),
            pushed: state.pushed,
            popped: state.popped,
            rejected: state.rejected,
        }
    }

    /// Notified after every push and on close, for async consumers.
    #[must_use]
    pub fn ready_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q = DeliveryQueue::new(QueueConfig::unbounded());
        for i in 0..5 {
            q.push(i).unwrap();
        }
        let out: Vec<_> = (0..5).map(|_| q.pop_blocking().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert_eq!(q.try_pop(), Ok(None));
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let q = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop_blocking())
        };
        thread::sleep(Duration::from_millis(50));
        q.push("row").unwrap();
        assert_eq!(consumer.join().unwrap(), Ok("row"));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let q: Arc<DeliveryQueue<u8>> = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop_blocking())
        };
        thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(consumer.join().unwrap(), Err(QueueError::Closed));
    }

    #[test]
    fn closed_queue_drains_then_reports_closed() {
        let q = DeliveryQueue::new(QueueConfig::unbounded());
        q.push(1).unwrap();
        q.close();
        assert_eq!(q.push(2), Err(QueueError::Closed));
        assert_eq!(q.try_pop(), Ok(Some(1)));
        assert_eq!(q.try_pop(), Err(QueueError::Closed));
    }

    #[test]
    fn reject_policy() {
        let q = DeliveryQueue::new(QueueConfig::bounded(2, OverflowPolicy::Reject));
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.push(3), Err(QueueError::Full));
        assert_eq!(q.stats().rejected, 1);
        assert_eq!(q.pop_blocking(), Ok(1));
        q.push(3).unwrap();
    }

    #[test]
    fn block_policy_applies_backpressure() {
        let q = Arc::new(DeliveryQueue::new(QueueConfig::bounded(1, OverflowPolicy::Block)));
        q.push(1).unwrap();
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(2))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_blocking(), Ok(1));
        producer.join().unwrap().unwrap();
        assert_eq!(q.pop_blocking(), Ok(2));
    }

    #[test]
    fn cancellable_push_gives_up() {
        let q = Arc::new(DeliveryQueue::new(QueueConfig::bounded(1, OverflowPolicy::Block)));
        q.push(1).unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let producer = {
            let (q, cancel) = (Arc::clone(&q), Arc::clone(&cancel));
            thread::spawn(move || q.push_cancellable(2, &cancel))
        };
        thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::Release);
        assert_eq!(producer.join().unwrap(), Err(QueueError::Cancelled));
        assert_eq!(q.stats().pushed, 1);
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        let q = Arc::new(DeliveryQueue::new(QueueConfig::unbounded()));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push((p, i)).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let mut last = [-1_i32; 4];
        while let Ok(Some((p, i))) = q.try_pop() {
            assert!(i > last[p]);
            last[p] = i;
        }
        assert_eq!(last, [249; 4]);
    }
}
