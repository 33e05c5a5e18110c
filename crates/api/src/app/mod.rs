//! HTTP application wiring (Axum router + service wiring).
//!
//! - `routes/`: handlers, one file per workflow area
//! - `dto.rs`: request bodies the workflow service does not already define
//! - `errors.rs`: consistent JSON error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use orderflow_infra::OrderflowConfig;
use orderflow_infra::command_dispatcher::DispatchError;
use orderflow_infra::erp::{ErpChannel, InMemoryErpChannel};
use orderflow_infra::event_store::{EventStore, InMemoryEventStore};
use orderflow_infra::services::WorkflowService;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// In-memory store and ERP channel behind one workflow service.
pub fn build_services(config: &OrderflowConfig) -> Result<Arc<WorkflowService>, DispatchError> {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let erp: Arc<dyn ErpChannel> = Arc::new(InMemoryErpChannel::new());
    Ok(Arc::new(WorkflowService::new(config, store, erp)?))
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: &OrderflowConfig) -> Result<Router, DispatchError> {
    Ok(router_with(build_services(config)?))
}

/// Router over an already wired service; tests hand in their own.
pub fn router_with(service: Arc<WorkflowService>) -> Router {
    let protected = routes::router()
        .layer(Extension(service))
        .layer(axum::middleware::from_fn(middleware::actor_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
