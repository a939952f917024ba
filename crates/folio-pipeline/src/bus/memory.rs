//! In-memory control bus implementation for testing.
//!
//! This module provides [`InMemoryControlBus`], a single-process
//! implementation of the [`ControlBus`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no distribution
//! - **Single-process only**: Messages are not visible across process
//!   boundaries
//! - **Unbounded retention**: The per-subject log grows until the bus is
//!   dropped, so late-created groups can backfill from the start

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use folio_core::MessageId;

use super::{AckHandle, ControlBus, Delivery, MessageStream, SettleToken, Subscription};
use crate::error::{Error, Result};

/// Converts a lock poison error to a bus error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::bus("control bus lock poisoned")
}

#[derive(Debug, Clone)]
struct RetainedMessage {
    message_id: MessageId,
    payload: Bytes,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: MessageId,
    payload: Bytes,
    attempt: u32,
}

/// Work queue shared by all subscriptions of one (subject, group) pair.
#[derive(Debug)]
struct GroupQueue {
    subject: String,
    queue: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
    closed: AtomicBool,
    max_deliver: Option<u32>,
}

impl GroupQueue {
    fn new(subject: impl Into<String>, max_deliver: Option<u32>) -> Self {
        Self {
            subject: subject.into(),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            max_deliver,
        }
    }

    fn push(&self, message: QueuedMessage) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(message);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueuedMessage> {
        self.queue.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    /// Returns a message for redelivery with its attempt count bumped.
    ///
    /// Messages that have exhausted `max_deliver` attempts are dropped.
    fn requeue(&self, message: QueuedMessage) {
        if let Some(max) = self.max_deliver {
            if message.attempt >= max {
                tracing::warn!(
                    subject = %self.subject,
                    message_id = %message.message_id,
                    attempts = message.attempt,
                    "dropping message after exhausting delivery attempts"
                );
                return;
            }
        }
        let attempt = message.attempt + 1;
        self.push(QueuedMessage { attempt, ..message });
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn depth(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Internal bus state protected by a single lock.
#[derive(Debug, Default)]
struct BusState {
    retained: HashMap<String, Vec<RetainedMessage>>,
    groups: HashMap<(String, String), Arc<GroupQueue>>,
    closed: bool,
}

/// In-memory control bus for testing.
///
/// Models the delivery contract the pipeline depends on: durable retention
/// per subject, consumer-group load balancing, and redelivery after a
/// negative or missed acknowledgment. Dropping a [`Delivery`] without
/// settling it requeues the message, which is how tests simulate a consumer
/// crash between side effects.
///
/// ## Example
///
/// ```rust
/// use folio_pipeline::bus::memory::InMemoryControlBus;
///
/// let bus = InMemoryControlBus::new();
/// // Publish and subscribe in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryControlBus {
    state: Mutex<BusState>,
    max_deliver: Option<u32>,
}

impl InMemoryControlBus {
    /// Creates a new in-memory bus with unbounded redelivery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that drops messages after `max_deliver` attempts.
    #[must_use]
    pub fn with_max_deliver(max_deliver: u32) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            max_deliver: Some(max_deliver),
        }
    }

    /// Returns the number of messages waiting in a group's queue.
    ///
    /// In-flight (delivered, un-settled) messages are not counted.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn queue_depth(&self, subject: &str, group: &str) -> Result<usize> {
        let state = self.state.lock().map_err(poison_err)?;
        Ok(state
            .groups
            .get(&(subject.to_string(), group.to_string()))
            .map_or(0, |g| g.depth()))
    }

    /// Closes the bus: publishes start failing and drained subscriptions
    /// return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(poison_err)?;
        state.closed = true;
        for group in state.groups.values() {
            group.close();
        }
        Ok(())
    }
}

#[async_trait]
impl ControlBus for InMemoryControlBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let mut state = self.state.lock().map_err(poison_err)?;
        if state.closed {
            return Err(Error::bus("control bus is closed"));
        }

        let message_id = MessageId::generate();
        state
            .retained
            .entry(subject.to_string())
            .or_default()
            .push(RetainedMessage {
                message_id,
                payload: payload.clone(),
            });

        for ((group_subject, _), group) in &state.groups {
            if group_subject == subject {
                group.push(QueuedMessage {
                    message_id,
                    payload: payload.clone(),
                    attempt: 1,
                });
            }
        }
        drop(state);

        Ok(())
    }

    async fn subscribe(&self, subject: &str, group: &str) -> Result<Subscription> {
        let mut state = self.state.lock().map_err(poison_err)?;
        if state.closed {
            return Err(Error::bus("control bus is closed"));
        }

        let key = (subject.to_string(), group.to_string());
        let group_queue = if let Some(existing) = state.groups.get(&key) {
            Arc::clone(existing)
        } else {
            let created = Arc::new(GroupQueue::new(subject, self.max_deliver));
            // New groups start from the beginning of the subject's retained log.
            if let Some(retained) = state.retained.get(subject) {
                for message in retained {
                    created.push(QueuedMessage {
                        message_id: message.message_id,
                        payload: message.payload.clone(),
                        attempt: 1,
                    });
                }
            }
            state.groups.insert(key, Arc::clone(&created));
            created
        };
        drop(state);

        Ok(Subscription::new(Box::new(MemorySubscription {
            group: group_queue,
        })))
    }
}

/// Pull source for one (subject, group) pair.
struct MemorySubscription {
    group: Arc<GroupQueue>,
}

#[async_trait]
impl MessageStream for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.group.notify.notified();
            if let Some(message) = self.group.pop() {
                let token = MemorySettleToken {
                    group: Arc::clone(&self.group),
                    message: message.clone(),
                };
                return Some(Delivery::new(
                    message.message_id,
                    self.group.subject.clone(),
                    message.payload,
                    message.attempt,
                    AckHandle::new(Box::new(token)),
                ));
            }
            if self.group.is_closed() {
                return None;
            }
            notified.await;
        }
    }
}

/// Settlement for one in-memory delivery.
struct MemorySettleToken {
    group: Arc<GroupQueue>,
    message: QueuedMessage,
}

impl SettleToken for MemorySettleToken {
    fn ack(self: Box<Self>) {}

    fn nack(self: Box<Self>) {
        let Self { group, message } = *self;
        group.requeue(message);
    }
}
