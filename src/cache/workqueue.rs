//! Work queue for reconcile requests
//!
//! A FIFO with two sets beside it. `dirty` holds every item that needs
//! processing (queued or deferred), `processing` holds items handed out and
//! not yet marked `done`. An item is never queued twice and never handed to
//! two workers at once: enqueueing an item that is being processed defers it
//! until the worker calls `done`.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    closed: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }
}

impl<T: Hash + Eq + Clone> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item. No-op after close or if the item is already pending.
    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock();
        if state.closed || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next item; `None` once the queue is closed and empty.
    ///
    /// The item stays in the processing set until [`WorkQueue::done`].
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = Self::take(&mut state) {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        Self::take(&mut self.state.lock())
    }

    fn take(state: &mut QueueState<T>) -> Option<T> {
        let item = state.queue.pop_front()?;
        state.dirty.remove(&item);
        state.processing.insert(item.clone());
        Some(item)
    }

    /// Finish processing; a deferred re-enqueue of the item is released now
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.closed {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Finish processing and put the item back at the tail
    pub fn requeue(&self, item: T) {
        self.done(&item);
        self.enqueue(item);
    }

    /// Stop accepting items and wake every waiter. Queued items can still be
    /// drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items waiting to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
