use crate::{Event, EventEnvelope};

/// A projection folds an append-only event stream into a read model.
///
/// Read models are disposable: they can be dropped and rebuilt by replaying the
/// stream, which is how promise history is reconstructed for an order.
///
/// `apply` must be idempotent with respect to redelivery; `ProjectionRunner`
/// helps by rejecting sequence numbers it has already seen. Events that are not
/// relevant to the projection are simply ignored.
pub trait Projection {
    type Ev: Event;

    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
