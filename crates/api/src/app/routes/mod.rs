use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use orderflow_infra::command_dispatcher::DispatchError;

use crate::app::errors;

pub mod audit;
pub mod invoices;
pub mod orders;
pub mod policy;
pub mod routing;
pub mod system;

/// Router for every endpoint that needs an acting actor.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/audit", get(audit::audit_log))
        .nest("/orders", orders::router().merge(invoices::router()))
        .nest("/routing", routing::router())
        .nest("/policy", policy::router())
}

/// Serialize a service result, mapping failures through the error table.
pub(crate) fn reply<T: Serialize>(status: StatusCode, result: Result<T, DispatchError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
