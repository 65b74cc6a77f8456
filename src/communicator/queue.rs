//! Message hand-off queue
//!
//! Unbounded FIFO fed by the network thread and drained by any number of
//! consumer threads. One mutex guards the deque, one condition variable
//! signals that it became non-empty.

use super::message::Message;
use crate::error::{CommunicatorError, CommunicatorResult};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Thread-safe FIFO with blocking and timed retrieval
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
    available: Condvar,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to the tail and wake one waiting consumer
    pub fn enqueue(&self, message: Message) {
        {
            let mut messages = self.lock();
            messages.push_back(message);
        }
        // One wake per element: a consumer stranded behind a non-empty queue
        // would otherwise sleep until the next enqueue.
        self.available.notify_one();
    }

    /// Remove and return the head, waiting as long as the queue is empty
    pub fn dequeue_blocking(&self) -> Message {
        let mut messages = self.lock();
        loop {
            if let Some(message) = messages.pop_front() {
                return message;
            }
            messages = self
                .available
                .wait(messages)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove and return the head, failing if nothing arrives within `timeout`
    ///
    /// Nothing is removed on timeout. A timeout too large to form a deadline
    /// waits like [`dequeue_blocking`](Self::dequeue_blocking).
    pub fn dequeue_timeout(&self, timeout: Duration) -> CommunicatorResult<Message> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(self.dequeue_blocking());
        };
        let mut messages = self.lock();
        loop {
            if let Some(message) = messages.pop_front() {
                return Ok(message);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CommunicatorError::ReceiveTimeout { timeout });
            }
            let (guard, _) = self
                .available
                .wait_timeout(messages, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            messages = guard;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
