//! Awaitable single-producer/single-consumer queue.
//!
//! Bridges event-driven producers (process output callbacks) into an ordered
//! awaitable sequence with explicit success/error/end termination.
//!
//! Termination semantics:
//! - `fail` and `end` are terminal and idempotent; later calls are no-ops.
//! - Once an error is recorded, every `next()` call returns that error, even
//!   if undelivered values remain buffered. Delivered values stop exactly at
//!   the error boundary.
//! - After `end()`, `next()` drains the remaining buffer and then reports
//!   done forever.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

struct Inner<T, E> {
    buffer: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<Option<Result<T, E>>>>,
    error: Option<E>,
    ended: bool,
}

impl<T, E> Inner<T, E> {
    fn is_terminal(&self) -> bool {
        self.ended || self.error.is_some()
    }
}

/// Ordered awaitable queue with explicit terminal states.
pub struct AsyncQueue<T, E> {
    inner: Mutex<Inner<T, E>>,
}

impl<T, E: Clone> AsyncQueue<T, E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: VecDeque::new(),
                waiters: VecDeque::new(),
                error: None,
                ended: false,
            }),
        }
    }

    /// Enqueues a value, delivering it immediately if a waiter is pending.
    /// No-op after `fail` or `end`.
    pub fn push(&self, value: T) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.is_terminal() {
            return;
        }
        let mut value = value;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(Some(Ok(value))) {
                Ok(()) => return,
                // Waiter future was dropped; try the next one.
                Err(Some(Ok(v))) => value = v,
                Err(_) => unreachable!("push reclaims only its own value"),
            }
        }
        inner.buffer.push_back(value);
    }

    /// Records a terminal error and rejects all pending waiters with it.
    pub fn fail(&self, error: E) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.is_terminal() {
            return;
        }
        inner.error = Some(error.clone());
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(Some(Err(error.clone())));
        }
    }

    /// Marks the queue as cleanly finished and resolves pending waiters.
    pub fn end(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.is_terminal() {
            return;
        }
        inner.ended = true;
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(None);
        }
    }

    /// Awaits the next value.
    ///
    /// Returns `Some(Ok(value))` in push order, `Some(Err(e))` forever once
    /// the queue has failed, and `None` forever once it has ended and the
    /// buffer is drained.
    pub async fn next(&self) -> Option<Result<T, E>> {
        loop {
            let receiver = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(error) = &inner.error {
                    return Some(Err(error.clone()));
                }
                if let Some(value) = inner.buffer.pop_front() {
                    return Some(Ok(value));
                }
                if inner.ended {
                    return None;
                }
                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back(tx);
                rx
            };
            match receiver.await {
                Ok(outcome) => return outcome,
                // Sender dropped without resolution; re-check the state.
                Err(_) => continue,
            }
        }
    }
}

impl<T, E: Clone> Default for AsyncQueue<T, E> {
    fn default() -> Self {
        Self::new()
    }
}
