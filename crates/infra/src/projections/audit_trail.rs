//! Audit trail of every committed workflow event.
//!
//! Fed only by published envelopes, which exist only after a successful
//! append, so rejected requests leave no audit record.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use orderflow_core::AggregateId;
use orderflow_events::EventEnvelope;

/// Who performed the audited action, as far as the payload tells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditActor {
    pub emp_no: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Arrival order across all streams.
    pub position: u64,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub sequence_number: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: Option<AuditActor>,
    pub payload: JsonValue,
}

#[derive(Debug, Default)]
struct Trail {
    records: Vec<AuditRecord>,
    cursors: HashMap<AggregateId, u64>,
}

#[derive(Debug, Default)]
pub struct AuditTrailProjection {
    inner: RwLock<Trail>,
}

const STAMP_FIELDS: [&str; 5] = ["actor", "created_by", "added_by", "cleared_by", "submitted_by"];
const EMP_NO_FIELDS: [&str; 3] = ["changed_by", "approved_by", "activated_by"];

/// Find the acting person in an externally tagged event payload.
fn actor_of(payload: &JsonValue) -> Option<AuditActor> {
    let body = payload.as_object()?.values().next()?;

    let stamp = STAMP_FIELDS
        .iter()
        .find_map(|f| body.get(*f))
        .or_else(|| body.get("overlay").and_then(|o| o.get("applied_by")));
    if let Some(stamp) = stamp {
        return Some(AuditActor {
            emp_no: stamp.get("emp_no")?.as_str()?.to_string(),
            role: stamp.get("role").and_then(|r| r.as_str()).map(String::from),
        });
    }

    EMP_NO_FIELDS
        .iter()
        .find_map(|f| body.get(*f).and_then(|v| v.as_str()))
        .map(|emp_no| AuditActor {
            emp_no: emp_no.to_string(),
            role: None,
        })
}

impl AuditTrailProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one envelope; redelivered sequence numbers are ignored.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) {
        let Ok(mut trail) = self.inner.write() else {
            return;
        };

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = trail.cursors.get(&aggregate_id).copied().unwrap_or(0);
        if seq <= last {
            return;
        }

        let position = trail.records.len() as u64 + 1;
        trail.records.push(AuditRecord {
            position,
            aggregate_id,
            aggregate_type: envelope.aggregate_type().to_string(),
            sequence_number: seq,
            event_type: envelope.event_type().to_string(),
            occurred_at: envelope.occurred_at(),
            actor: actor_of(envelope.payload()),
            payload: envelope.payload().clone(),
        });
        trail.cursors.insert(aggregate_id, seq);
    }

    /// Records of one stream, in sequence order.
    pub fn for_aggregate(&self, aggregate_id: AggregateId) -> Vec<AuditRecord> {
        match self.inner.read() {
            Ok(trail) => trail
                .records
                .iter()
                .filter(|r| r.aggregate_id == aggregate_id)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }

    /// Every record, newest last.
    pub fn all(&self) -> Vec<AuditRecord> {
        self.inner
            .read()
            .map(|trail| trail.records.clone())
            .unwrap_or_default()
    }

    pub fn rebuild_from_scratch(&self, envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>) {
        if let Ok(mut trail) = self.inner.write() {
            *trail = Trail::default();
        }
        for env in envelopes {
            self.apply_envelope(&env);
        }
    }
}
