use super::QueueObject;
use std::collections::VecDeque;

pub(super) enum Pop {
    Item(QueueObject),
    /// Nothing queued yet, caller should wait.
    Empty,
    /// Closed and fully drained.
    Closed,
}

/// Queue itself
pub(super) struct RawQueue {
    // FIFO in arrival order
    items: VecDeque<QueueObject>,
    closed: bool,
}

impl RawQueue {
    pub(super) fn new() -> Self {
        RawQueue {
            items: VecDeque::new(),
            closed: false,
        }
    }

    /// Returns false if queue is already closed.
    pub(super) fn push(&mut self, item: QueueObject) -> bool {
        if self.closed {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub(super) fn try_pop(&mut self) -> Pop {
        match self.items.pop_front() {
            Some(item) => Pop::Item(item),
            None if self.closed => Pop::Closed,
            None => Pop::Empty,
        }
    }

    /// Returns true only for the call which actually closed the queue.
    pub(super) fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(super) fn len(&self) -> usize {
        self.items.len()
    }

    pub(super) fn drain(&mut self) -> Vec<QueueObject> {
        self.items.drain(..).collect()
    }
}
