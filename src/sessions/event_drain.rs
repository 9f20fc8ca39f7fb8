//! Draining iterator over queued session events.

use std::collections::VecDeque;

use crate::events::SessionEvent;

/// Iterator that drains the session's event queue front to back.
///
/// Returned by [`ClientSession::events`]; dropping it without exhausting it
/// leaves the remaining events queued for the next drain.
///
/// [`ClientSession::events`]: crate::ClientSession::events
#[derive(Debug)]
pub struct EventDrain<'a> {
    queue: &'a mut VecDeque<SessionEvent>,
}

impl<'a> EventDrain<'a> {
    pub(crate) fn new(queue: &'a mut VecDeque<SessionEvent>) -> Self {
        Self { queue }
    }
}

impl Iterator for EventDrain<'_> {
    type Item = SessionEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.queue.len(), Some(self.queue.len()))
    }
}

impl ExactSizeIterator for EventDrain<'_> {}
