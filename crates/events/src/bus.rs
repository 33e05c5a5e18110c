//! Event publishing/subscription abstraction (mechanics only).
//!
//! Committed order and policy events are appended to the event store first and
//! only then published here. Consumers (audit trail, order views) must be
//! idempotent: delivery is at-least-once and the store remains the source of
//! truth, so a consumer can always be rebuilt by replaying streams.

use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// A subscription to the bus (broadcast: each subscription sees every message).
///
/// Intended for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub bus.
///
/// ```text
/// WorkflowService → EventStore (append) → EventBus (publish) → audit trail
///                                                            → order views
/// ```
///
/// `publish()` may fail after the append already succeeded; the caller surfaces
/// that and republishing is safe because consumers skip seen sequence numbers.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
