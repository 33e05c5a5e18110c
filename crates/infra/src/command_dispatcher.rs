//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! load stream → rehydrate → handle (pure) → append (expected version) → publish
//! ```
//!
//! Loading and executing are split so the workflow service can inspect the
//! rehydrated aggregate, resolve policy facts against it, and then execute
//! against exactly the version it looked at. A concurrent writer in between
//! loses the append with `ConcurrentModification`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use orderflow_core::{Aggregate, AggregateId, ExpectedVersion, WorkflowError};
use orderflow_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Deterministic business rejection, including lost concurrency races.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after the append committed.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => {
                DispatchError::Workflow(WorkflowError::ConcurrentModification(msg))
            }
            other => DispatchError::Store(other),
        }
    }
}

impl DispatchError {
    /// The business error, when this is one.
    pub fn as_workflow(&self) -> Option<&WorkflowError> {
        match self {
            DispatchError::Workflow(err) => Some(err),
            _ => None,
        }
    }
}

/// A rehydrated aggregate and the stream version it was built from.
#[derive(Debug, Clone)]
pub struct Loaded<A> {
    pub aggregate: A,
    pub version: u64,
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    /// State after applying the committed events.
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine over an `EventStore` and an `EventBus`.
///
/// Events are persisted before publication: if the append fails nothing is
/// published. If publication fails the events stay committed and the error is
/// returned; consumers skip already-seen sequence numbers so republishing is safe.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate one aggregate.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Loaded<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        Ok(Loaded {
            aggregate,
            version: stream_version(&history),
        })
    }

    /// Decide against an already loaded aggregate and append at its version.
    pub fn execute<A>(
        &self,
        loaded: Loaded<A>,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = WorkflowError>,
        A::Event: orderflow_events::Event + Serialize,
    {
        let Loaded {
            mut aggregate,
            version,
        } = loaded;

        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, ExpectedVersion::Exact(version))?;

        for ev in &decided {
            aggregate.apply(ev);
        }

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }

    /// Load, decide, append and publish in one call.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = WorkflowError>,
        A::Event: orderflow_events::Event + Serialize + DeserializeOwned,
    {
        let loaded = self.load(aggregate_id, make_aggregate)?;
        self.execute(loaded, aggregate_id, aggregate_type, command)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use orderflow_auth::{Actor, Role};
    use orderflow_core::{CustomerId, OrderId, SiteId};
    use orderflow_events::InMemoryEventBus;
    use orderflow_orders::{CreateOrder, ORDER_AGGREGATE_TYPE, Order, OrderCommand};

    use super::*;
    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn create(order_id: OrderId) -> OrderCommand {
        OrderCommand::CreateOrder(CreateOrder {
            order_id,
            customer_id: CustomerId(1),
            site_id: SiteId(1),
            order_priority: None,
            ship_via: None,
            requested_date: None,
            created_by: Actor::new("E1", Role::new("Office")),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_appends_then_publishes() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let order_id = OrderId::new();

        let out = d
            .dispatch(order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, &create(order_id), |id| {
                Order::empty(OrderId::from(id))
            })
            .unwrap();

        assert!(out.aggregate.is_created());
        assert_eq!(out.committed.len(), 1);
        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "orders.order.created");
    }

    #[test]
    fn rejected_command_writes_nothing() {
        let d = dispatcher();
        let order_id = OrderId::new();
        let make = |id| Order::empty(OrderId::from(id));
        d.dispatch(order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, &create(order_id), make)
            .unwrap();

        let err = d
            .dispatch(order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, &create(order_id), make)
            .unwrap_err();

        assert_eq!(err.as_workflow().map(WorkflowError::code), Some("validation"));
        assert_eq!(d.store().load_stream(order_id.aggregate_id()).unwrap().len(), 1);
    }

    #[test]
    fn stale_load_loses_with_concurrent_modification() {
        let d = dispatcher();
        let order_id = OrderId::new();
        let make = |id| Order::empty(OrderId::from(id));

        let first = d.load(order_id.aggregate_id(), make).unwrap();
        let second = d.load(order_id.aggregate_id(), make).unwrap();

        d.execute(first, order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, &create(order_id))
            .unwrap();
        let err = d
            .execute(second, order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, &create(order_id))
            .unwrap_err();

        assert_eq!(
            err.as_workflow().map(WorkflowError::code),
            Some("concurrent_modification")
        );
    }
}
