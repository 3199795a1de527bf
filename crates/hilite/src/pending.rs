//! FIFO backlog of requests awaiting a free execution unit.
//!
//! Populated only when the pool is saturated. No priority, no reordering,
//! no deduplication: two requests for the same content are independent and
//! both are served.

use std::collections::VecDeque;

use crate::request::HighlightRequest;

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    requests: VecDeque<HighlightRequest>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&mut self, request: HighlightRequest) {
        self.requests.push_back(request);
    }

    pub(crate) fn dequeue(&mut self) -> Option<HighlightRequest> {
        self.requests.pop_front()
    }

    /// Put a request back at the head after a failed dispatch, preserving
    /// its submission-order position.
    pub(crate) fn requeue_front(&mut self, request: HighlightRequest) {
        self.requests.push_front(request);
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drain every queued request (shutdown path).
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = HighlightRequest> + '_ {
        self.requests.drain(..)
    }
}
