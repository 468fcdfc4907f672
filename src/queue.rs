//! Ordered event queue shared by all subscriptions.
//!
//! Any number of producers may push concurrently. Consumers either await
//! `pop` or block a thread in `pop_blocking`. Closing the queue rejects
//! further pushes, but already queued items stay poppable until drained.
mod raw_queue;

use self::raw_queue::{Pop, RawQueue};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

/// Normalized change notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueObject {
    pub kind: EventKind,
    /// Plural resource name, e.g. `pods`
    pub resource: String,
    /// `namespace/name` of the changed object. Not unique across clusters.
    pub key: String,
}

impl QueueObject {
    pub fn new(kind: EventKind, resource: impl Into<String>, key: impl Into<String>) -> Self {
        QueueObject {
            kind,
            resource: resource.into(),
            key: key.into(),
        }
    }
}

pub struct EventQueue {
    q: Mutex<RawQueue>,
    readable: event_listener::Event,
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            q: Mutex::new(RawQueue::new()),
            readable: event_listener::Event::new(),
        }
    }

    fn raw(&self) -> MutexGuard<'_, RawQueue> {
        // RawQueue has no invariants a panicking holder could break
        self.q.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues an item. Returns false (and drops the item) if the
    /// queue is closed.
    pub fn push(&self, item: QueueObject) -> bool {
        let accepted = self.raw().push(item);
        if accepted {
            self.readable.notify_additional(1);
        }
        accepted
    }

    /// Returns next item, waiting while the queue is empty and open.
    /// Returns None once the queue is closed and drained.
    pub async fn pop(&self) -> Option<QueueObject> {
        loop {
            if let Some(res) = self.poll_pop() {
                return res;
            }
            let listener = self.readable.listen();
            // item might have arrived before we started listening
            if let Some(res) = self.poll_pop() {
                return res;
            }
            listener.await;
        }
    }

    /// Same as `pop`, but parks current thread instead.
    pub fn pop_blocking(&self) -> Option<QueueObject> {
        loop {
            if let Some(res) = self.poll_pop() {
                return res;
            }
            let listener = self.readable.listen();
            if let Some(res) = self.poll_pop() {
                return res;
            }
            listener.wait();
        }
    }

    /// Never waits. None means either empty or closed and drained.
    pub fn try_pop(&self) -> Option<QueueObject> {
        self.poll_pop().flatten()
    }

    fn poll_pop(&self) -> Option<Option<QueueObject>> {
        match self.raw().try_pop() {
            Pop::Item(item) => Some(Some(item)),
            Pop::Closed => Some(None),
            Pop::Empty => None,
        }
    }

    /// Closes the queue. Repeated calls are ignored.
    pub fn close(&self) {
        if self.raw().close() {
            tracing::debug!("Event queue closed");
            self.readable.notify(usize::MAX);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.raw().is_closed()
    }

    pub fn len(&self) -> usize {
        self.raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns everything currently queued.
    pub fn drain(&self) -> Vec<QueueObject> {
        self.raw().drain()
    }
}
