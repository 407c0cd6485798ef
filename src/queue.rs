//! Bounded blocking FIFO shared by the two pipeline stages.
//!
//! The queue is a ring of `capacity + 1` slots, one slot always left empty
//! so that a full ring can be told apart from an empty one. A single mutex
//! guards the ring, with one condition variable for "not empty" and one for
//! "not full".
//!
//! Lifecycle: [`PipelineQueue::finish`] marks the end of input. Items still
//! queued can be drained afterwards, and the queue is defunct once it is
//! both finished and empty. [`PipelineQueue::abort`] is the failure path:
//! it wakes every waiter and makes all further calls fail.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Default number of in-flight items between the stages.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Enqueue on a finished queue")]
    Finished,

    #[error("Queue was aborted")]
    Aborted,
}

struct Ring<T> {
    slots: Vec<Option<T>>,
    read: usize,
    write: usize,
    finished: bool,
    aborted: bool,
}

impl<T> Ring<T> {
    fn next(&self, cursor: usize) -> usize {
        (cursor + 1) % self.slots.len()
    }

    fn is_empty(&self) -> bool {
        self.read == self.write
    }

    fn is_full(&self) -> bool {
        self.next(self.write) == self.read
    }

    fn len(&self) -> usize {
        (self.write + self.slots.len() - self.read) % self.slots.len()
    }
}

pub struct PipelineQueue<T> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> PipelineQueue<T> {
    /// A queue holding at most `capacity` items. A capacity of 0 is raised
    /// to 1.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..=capacity.max(1)).map(|_| None).collect();
        Self {
            ring: Mutex::new(Ring {
                slots,
                read: 0,
                write: 0,
                finished: false,
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    // Critical sections never panic, so a poisoned ring is still consistent.
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// Enqueueing after [`finish`](Self::finish) is a misuse and fails with
    /// [`QueueError::Finished`].
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let ring = self.lock();
        let mut ring = self
            .not_full
            .wait_while(ring, |r| r.is_full() && !r.finished && !r.aborted)
            .unwrap_or_else(PoisonError::into_inner);

        if ring.aborted {
            return Err(QueueError::Aborted);
        }
        if ring.finished {
            return Err(QueueError::Finished);
        }

        let write = ring.write;
        ring.slots[write] = Some(item);
        ring.write = ring.next(write);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty and not
    /// finished. Returns `None` once the queue is defunct.
    pub fn dequeue(&self) -> Result<Option<T>, QueueError> {
        let ring = self.lock();
        let mut ring = self
            .not_empty
            .wait_while(ring, |r| r.is_empty() && !r.finished && !r.aborted)
            .unwrap_or_else(PoisonError::into_inner);

        if ring.aborted {
            return Err(QueueError::Aborted);
        }
        if ring.is_empty() {
            return Ok(None);
        }

        let read = ring.read;
        let item = ring.slots[read].take();
        ring.read = ring.next(read);
        self.not_full.notify_one();
        Ok(item)
    }

    /// Mark the end of input and wake every waiter. Calling it again has no
    /// further effect.
    pub fn finish(&self) {
        let mut ring = self.lock();
        if !ring.finished {
            ring.finished = true;
            self.not_empty.notify_all();
            self.not_full.notify_all();
        }
    }

    /// Fail every pending and future call with [`QueueError::Aborted`].
    pub fn abort(&self) {
        let mut ring = self.lock();
        ring.aborted = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Finished and drained: no item will ever be dequeued again.
    pub fn is_defunct(&self) -> bool {
        let ring = self.lock();
        ring.finished && ring.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.lock().slots.len() - 1
    }
}
