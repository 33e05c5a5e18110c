use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use orderflow_core::{Aggregate, AggregateId, CustomerId, OrderId, SiteId};
use orderflow_events::EventEnvelope;
use orderflow_orders::{
    HoldOverlay, InvoiceSubmission, ORDER_AGGREGATE_TYPE, Order, OrderEvent, OrderLifecycleStatus,
    OrderLine, OrderStatus, PromiseHistoryProjection, StatusStamp,
};

use crate::read_model::ReadModelStore;

/// Query-side snapshot of one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub site_id: SiteId,
    pub order_priority: Option<i32>,
    pub ship_via: Option<String>,
    pub lifecycle_status: OrderLifecycleStatus,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub hold: Option<HoldOverlay>,
    pub promise: PromiseHistoryProjection,
    pub status_stamp: Option<StatusStamp>,
    pub invoice: Option<InvoiceSubmission>,
    /// Stream version the view reflects; pass it back as the expected version.
    pub version: u64,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        use orderflow_core::AggregateRoot;

        Self {
            order_id: order.order_id(),
            customer_id: order.customer_id(),
            site_id: order.site_id(),
            order_priority: order.order_priority(),
            ship_via: order.ship_via().map(String::from),
            lifecycle_status: order.lifecycle_status(),
            status: order.status(),
            lines: order.lines().to_vec(),
            hold: order.hold().cloned(),
            promise: order.promise().clone(),
            status_stamp: order.status_stamp().cloned(),
            invoice: order.invoice().cloned(),
            version: order.version(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrderViewProjectionError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Builds `OrderView`s from published order envelopes.
///
/// Folds each stream through the order aggregate itself so the view can never
/// disagree with what the command side sees. Redelivered sequence numbers are
/// skipped; a gap is an error.
#[derive(Debug)]
pub struct OrderViewsProjection<S>
where
    S: ReadModelStore<OrderId, OrderView>,
{
    store: S,
    states: RwLock<HashMap<AggregateId, Order>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> OrderViewsProjection<S>
where
    S: ReadModelStore<OrderId, OrderView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            states: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn get_cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors.get(&aggregate_id).unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, seq);
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<OrderView> {
        self.store.get(order_id)
    }

    pub fn list(&self) -> Vec<OrderView> {
        let mut views = self.store.list();
        views.sort_by_key(|v| *v.order_id.as_uuid());
        views
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), OrderViewProjectionError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(aggregate_id);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(OrderViewProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OrderViewProjectionError::Deserialize(e.to_string()))?;

        let order_id = OrderId::from(aggregate_id);
        let view = {
            let mut states = match self.states.write() {
                Ok(s) => s,
                Err(_) => return Ok(()),
            };
            let state = states
                .entry(aggregate_id)
                .or_insert_with(|| Order::empty(order_id));
            state.apply(&ev);
            OrderView::from(&*state)
        };

        self.store.upsert(order_id, view);
        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    /// Drop everything and replay the given envelopes stream by stream.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OrderViewProjectionError> {
        self.store.clear();
        if let Ok(mut states) = self.states.write() {
            states.clear();
        }
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use orderflow_auth::{Actor, Role};
    use orderflow_core::ItemId;
    use orderflow_events::Event;
    use orderflow_orders::{AddLine, CreateOrder, OrderCommand};

    use super::*;
    use crate::read_model::InMemoryReadModelStore;

    fn order_events(order_id: OrderId) -> Vec<OrderEvent> {
        let actor = Actor::new("E1", Role::new("Office"));
        let mut order = Order::empty(order_id);
        let mut out = orderflow_events::execute(
            &mut order,
            &OrderCommand::CreateOrder(CreateOrder {
                order_id,
                customer_id: CustomerId(3),
                site_id: SiteId(4),
                order_priority: None,
                ship_via: Some("truck".to_string()),
                requested_date: None,
                created_by: actor.clone(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        out.extend(
            orderflow_events::execute(
                &mut order,
                &OrderCommand::AddLine(AddLine {
                    item_id: ItemId(9),
                    item_type: Some("bracket".to_string()),
                    quantity: 4,
                    added_by: actor,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap(),
        );
        out
    }

    fn envelopes(order_id: OrderId, events: &[OrderEvent]) -> Vec<EventEnvelope<JsonValue>> {
        events
            .iter()
            .enumerate()
            .map(|(i, e)| {
                EventEnvelope::new(
                    Uuid::now_v7(),
                    order_id.aggregate_id(),
                    ORDER_AGGREGATE_TYPE,
                    i as u64 + 1,
                    e.event_type(),
                    e.occurred_at(),
                    serde_json::to_value(e).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn builds_view_and_ignores_redelivery() {
        let projection = OrderViewsProjection::new(InMemoryReadModelStore::new());
        let order_id = OrderId::new();
        let envs = envelopes(order_id, &order_events(order_id));

        for env in &envs {
            projection.apply_envelope(env).unwrap();
        }
        projection.apply_envelope(&envs[1]).unwrap();

        let view = projection.get(&order_id).unwrap();
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.version, 2);
        assert_eq!(view.ship_via.as_deref(), Some("truck"));
        assert_eq!(view.status, OrderStatus::Open);
    }

    #[test]
    fn gap_in_sequence_is_rejected() {
        let projection = OrderViewsProjection::new(InMemoryReadModelStore::new());
        let order_id = OrderId::new();
        let envs = envelopes(order_id, &order_events(order_id));

        let err = projection.apply_envelope(&envs[1]).unwrap_err();
        assert!(matches!(
            err,
            OrderViewProjectionError::NonMonotonicSequence { last: 0, found: 2 }
        ));
    }

    #[test]
    fn rebuild_matches_incremental_application() {
        let projection = OrderViewsProjection::new(InMemoryReadModelStore::new());
        let order_id = OrderId::new();
        let envs = envelopes(order_id, &order_events(order_id));
        for env in &envs {
            projection.apply_envelope(env).unwrap();
        }
        let before = projection.get(&order_id).unwrap();

        let mut shuffled = envs.clone();
        shuffled.reverse();
        projection.rebuild_from_scratch(shuffled).unwrap();

        assert_eq!(projection.get(&order_id), Some(before));
    }
}
