//! Outbound message buffering.
//!
//! While no connection exists, sends are parked here as a bounded FIFO.
//! Each queued message carries a oneshot settlement that resolves when the
//! transport drains it post-connect (or fails it on timeout/close).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, oneshot};

use crate::config::SendOptions;
use crate::error::{Error, Result};

/// One buffered send awaiting a connection.
pub struct QueuedMessage {
    pub payload: Value,
    pub options: Option<SendOptions>,
    pub enqueued_at: Instant,
    settle: oneshot::Sender<Result<()>>,
}

impl QueuedMessage {
    /// Resolves the caller's pending send. Consumes the message.
    pub fn settle(self, result: Result<()>) {
        // The caller may have abandoned the send; nothing to do then.
        let _ = self.settle.send(result);
    }
}

/// Bounded FIFO of outbound messages.
pub struct OutboundQueue {
    limit: usize,
    wait_timeout: Duration,
    inner: Mutex<VecDeque<QueuedMessage>>,
    room: Notify,
    /// Set by [`fail_all`](Self::fail_all). A closed queue accepts nothing:
    /// a capacity waiter that wakes after the close must fail, not park a
    /// message nothing will ever drain.
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(limit: usize, wait_timeout: Duration) -> Self {
        Self {
            limit,
            wait_timeout,
            inner: Mutex::new(VecDeque::new()),
            room: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Appends a message, waiting up to `wait_timeout` for room when the
    /// queue is full. Returns the receiver that settles once the message
    /// is drained through the send pipeline. Fails with [`Error::Closed`]
    /// once the queue has been closed, even mid-wait.
    ///
    /// Callers must not reach here with `limit == 0`; buffering is
    /// disabled then and sends go straight to the pipeline.
    pub async fn enqueue(
        &self,
        payload: Value,
        options: Option<SendOptions>,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        debug_assert!(self.limit > 0, "enqueue with buffering disabled");

        let deadline = tokio::time::Instant::now() + self.wait_timeout;
        let mut message = Some((payload, options));

        loop {
            {
                let mut inner = self.inner.lock();
                if self.is_closed() {
                    return Err(Error::Closed);
                }
                if inner.len() < self.limit {
                    let (payload, options) = message.take().expect("message enqueued once");
                    let (tx, rx) = oneshot::channel();
                    inner.push_back(QueuedMessage {
                        payload,
                        options,
                        enqueued_at: Instant::now(),
                        settle: tx,
                    });
                    return Ok(rx);
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::QueueTimeout);
            }
            tokio::select! {
                _ = self.room.notified() => {}
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }

    /// Pops the oldest message and wakes capacity waiters.
    pub fn pop(&self) -> Option<QueuedMessage> {
        let message = self.inner.lock().pop_front();
        if message.is_some() {
            self.room.notify_waiters();
        }
        message
    }

    /// Closes the queue and fails every queued message. `error` is invoked
    /// once per message; waiters blocked on capacity wake and fail too.
    /// Terminal, like the transport close that calls it.
    pub fn fail_all<F>(&self, error: F)
    where
        F: Fn() -> Error,
    {
        // Flag first: an enqueue racing this sees either a closed queue or
        // gets its message drained and failed below.
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<QueuedMessage> = self.inner.lock().drain(..).collect();
        for message in drained {
            message.settle(Err(error()));
        }
        self.room.notify_waiters();
    }
}
