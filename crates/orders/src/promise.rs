//! Promise-date history.
//!
//! Promise changes are order-stream events, so they are insert-only and share
//! the order's sequence numbers. Replaying them rebuilds the promise fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use orderflow_auth::EmpNo;
use orderflow_events::{EventEnvelope, Projection};

use crate::order::OrderEvent;
use crate::stamp::ActorStamp;

/// Policy key listing reason codes for commitments and notifications.
pub const PROMISE_REASON_CODES_KEY: &str = "promise.reason_codes";
/// Policy key listing reason codes for classifying a missed promise.
pub const PROMISE_MISS_REASON_CODES_KEY: &str = "promise.miss_reason_codes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseChangeKind {
    CommitmentSet,
    MissClassified,
    CustomerNotified,
}

impl PromiseChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromiseChangeKind::CommitmentSet => "commitment_set",
            PromiseChangeKind::MissClassified => "miss_classified",
            PromiseChangeKind::CustomerNotified => "customer_notified",
        }
    }
}

/// One append-only promise change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseChangeEvent {
    pub kind: PromiseChangeKind,
    pub old_committed_date: Option<NaiveDate>,
    pub new_committed_date: Option<NaiveDate>,
    #[serde(default)]
    pub requested_date: Option<NaiveDate>,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub actor: ActorStamp,
    #[serde(default)]
    pub notification_channel: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Promise read model rebuilt from an order stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromiseHistoryProjection {
    pub requested_date: Option<NaiveDate>,
    pub promised_date: Option<NaiveDate>,
    pub current_committed_date: Option<NaiveDate>,
    pub revision_count: u32,
    pub miss_reason_code: Option<String>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub last_changed_by: Option<EmpNo>,
    pub history: Vec<PromiseChangeEvent>,
}

impl PromiseHistoryProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one promise change into the summary fields.
    pub fn record(&mut self, change: &PromiseChangeEvent) {
        match change.kind {
            PromiseChangeKind::CommitmentSet => {
                if self.promised_date.is_none() {
                    self.promised_date = change.new_committed_date;
                }
                if change.requested_date.is_some() {
                    self.requested_date = change.requested_date;
                }
                self.current_committed_date = change.new_committed_date;
                self.revision_count += 1;
                self.last_changed_at = Some(change.occurred_at);
                self.last_changed_by = Some(change.actor.emp_no.clone());
            }
            PromiseChangeKind::MissClassified => {
                self.miss_reason_code = change.reason_code.clone();
                self.last_changed_at = Some(change.occurred_at);
                self.last_changed_by = Some(change.actor.emp_no.clone());
            }
            PromiseChangeKind::CustomerNotified => {}
        }
        self.history.push(change.clone());
    }
}

impl Projection for PromiseHistoryProjection {
    type Ev = OrderEvent;

    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>) {
        match envelope.payload() {
            OrderEvent::OrderCreated(e) => {
                self.requested_date = e.requested_date;
            }
            OrderEvent::PromiseChanged(change) => self.record(change),
            _ => {}
        }
    }
}
