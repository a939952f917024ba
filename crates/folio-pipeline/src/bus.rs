//! Control bus abstraction for job and completion messages.
//!
//! This module provides:
//!
//! - [`ControlBus`]: Trait for durable publish/subscribe backends
//! - [`Delivery`]: One at-least-once message delivery with its ack handle
//! - [`Subscription`]: A pull-based stream of deliveries for one consumer group
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: Same interface for JetStream, SQS, or the
//!   in-memory bus used in tests
//! - **At-least-once**: A delivery that is never acknowledged is redelivered;
//!   dropping an un-settled [`Delivery`] counts as a missed ack (consumer
//!   crash) and requeues the message
//! - **Consumer groups**: Each message goes to at most one active consumer
//!   per group at a time; distinct groups each see every message

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use folio_core::MessageId;

use crate::error::Result;

/// Backend-specific settlement for one delivery.
///
/// Implementations decide what ack and nack mean for their transport.
/// Settlement is consume-once: the token is boxed and moved into whichever
/// path settles it.
pub trait SettleToken: Send {
    /// Removes the message from the redelivery set.
    fn ack(self: Box<Self>);

    /// Returns the message for immediate redelivery.
    fn nack(self: Box<Self>);
}

/// Acknowledgment handle for one delivery.
///
/// Exactly one of `ack` or `nack` settles the handle. Dropping it un-settled
/// nacks implicitly, so a consumer that crashes mid-message never strands it.
pub struct AckHandle {
    token: Option<Box<dyn SettleToken>>,
}

impl AckHandle {
    /// Wraps a backend settlement token.
    #[must_use]
    pub fn new(token: Box<dyn SettleToken>) -> Self {
        Self { token: Some(token) }
    }

    /// Acknowledges the delivery, removing it from the redelivery set.
    pub fn ack(mut self) {
        if let Some(token) = self.token.take() {
            token.ack();
        }
    }

    /// Negatively acknowledges the delivery, requeueing it immediately.
    pub fn nack(mut self) {
        if let Some(token) = self.token.take() {
            token.nack();
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.nack();
        }
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("settled", &self.token.is_none())
            .finish()
    }
}

/// One message delivery from the bus.
///
/// The delivery owns its acknowledgment: call [`Delivery::ack`] only after
/// every durable side effect of processing has succeeded.
#[derive(Debug)]
pub struct Delivery {
    /// Bus-assigned id for this message.
    pub message_id: MessageId,
    /// Subject the message was published on.
    pub subject: String,
    /// Raw message payload.
    pub payload: Bytes,
    /// Delivery attempt number (1-indexed; grows on each redelivery).
    pub attempt: u32,
    handle: AckHandle,
}

impl Delivery {
    /// Creates a delivery from its parts.
    #[must_use]
    pub fn new(
        message_id: MessageId,
        subject: impl Into<String>,
        payload: Bytes,
        attempt: u32,
        handle: AckHandle,
    ) -> Self {
        Self {
            message_id,
            subject: subject.into(),
            payload,
            attempt,
            handle,
        }
    }

    /// Returns true if this is a redelivery of a previously attempted message.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    /// Acknowledges the message. This is the last action of a successful
    /// handling path, never the first.
    pub fn ack(self) {
        self.handle.ack();
    }

    /// Returns the message to the bus for redelivery.
    pub fn nack(self) {
        self.handle.nack();
    }
}

/// Backend-specific pull source behind a [`Subscription`].
#[async_trait]
pub trait MessageStream: Send {
    /// Waits for the next delivery.
    ///
    /// Returns `None` once the bus is closed and no messages remain.
    async fn next(&mut self) -> Option<Delivery>;
}

/// A pull-based stream of deliveries for one (subject, group) pair.
pub struct Subscription {
    inner: Box<dyn MessageStream>,
}

impl Subscription {
    /// Wraps a backend message stream.
    #[must_use]
    pub fn new(inner: Box<dyn MessageStream>) -> Self {
        Self { inner }
    }

    /// Waits for the next delivery.
    ///
    /// Returns `None` once the bus is closed and no messages remain.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.inner.next().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Durable publish/subscribe abstraction.
///
/// The bus guarantees at-least-once delivery per consumer group: a published
/// message is retained until some consumer in the group acknowledges it, and
/// redelivered after a missed or negative acknowledgment.
#[async_trait]
pub trait ControlBus: Send + Sync {
    /// Publishes a message on a subject.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Subscribes a consumer group to a subject.
    ///
    /// Every subscription for the same `(subject, group)` pair shares one
    /// work queue; each message goes to exactly one of them at a time.
    async fn subscribe(&self, subject: &str, group: &str) -> Result<Subscription>;
}
