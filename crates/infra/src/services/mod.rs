//! Application services: the workflow orchestrator and the policy and route
//! catalogs it consults.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use orderflow_events::{EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::EventStore;

pub mod policy;
pub mod routing;
mod snapshot;
pub mod workflow;

pub use policy::{PolicyActivation, PolicyService};
pub use routing::RouteCatalogService;
pub use workflow::{
    AdvanceRequest, CommitmentRequest, HoldRequest, InvoiceRequest, InvoiceSubmissionOutcome,
    LineRequest, MissRequest, NewOrderRequest, NotificationRequest, WorkflowService,
};

/// Bus carrying committed envelopes to the projections.
pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Dispatcher shared by every service.
pub type Dispatcher = CommandDispatcher<Arc<dyn EventStore>, Arc<EnvelopeBus>>;
