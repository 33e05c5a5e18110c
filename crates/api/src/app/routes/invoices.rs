use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::post,
};
use chrono::Utc;
use tracing::info;

use orderflow_infra::services::{InvoiceRequest, WorkflowService};

use super::reply;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id/invoice", post(submit_invoice))
        .route("/:id/invoice/staging", post(record_staging_result))
        .route("/:id/invoice/staging/retry", post(retry_staging))
}

pub async fn submit_invoice(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<InvoiceRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::ACCEPTED,
        service.submit_invoice(ctx.actor(), order_id, body, Utc::now()),
    )
}

/// Asynchronous staging result reported by the ERP side.
pub async fn record_staging_result(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::StagingResultRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    info!(%order_id, correlation_id = %body.correlation_id, reported_by = %ctx.actor().emp_no, "staging result received");
    reply(
        StatusCode::OK,
        service.reconcile_staging(order_id, &body.correlation_id, body.outcome, Utc::now()),
    )
}

pub async fn retry_staging(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.retry_staging(ctx.actor(), order_id, Utc::now()),
    )
}
