use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use orderflow_infra::services::{
    AdvanceRequest, CommitmentRequest, HoldRequest, LineRequest, MissRequest, NewOrderRequest,
    NotificationRequest, WorkflowService,
};

use super::{audit, reply};
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/lines", post(add_line))
        .route("/:id/status", post(advance_status))
        .route("/:id/hold", post(apply_hold))
        .route("/:id/hold/clear", post(clear_hold))
        .route("/:id/promise/commitment", post(upsert_commitment))
        .route("/:id/promise/miss", post(classify_promise_miss))
        .route("/:id/promise/notifications", post(record_notification))
        .route("/:id/audit", get(audit::order_audit))
}

pub async fn create_order(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<NewOrderRequest>,
) -> axum::response::Response {
    reply(
        StatusCode::CREATED,
        service.create_order(ctx.actor(), body, Utc::now()),
    )
}

pub async fn list_orders(
    Extension(service): Extension<Arc<WorkflowService>>,
) -> impl IntoResponse {
    Json(service.list_orders())
}

pub async fn get_order(
    Extension(service): Extension<Arc<WorkflowService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(StatusCode::OK, service.get_order(order_id))
}

pub async fn add_line(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<LineRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.add_line(ctx.actor(), order_id, body, Utc::now()),
    )
}

pub async fn advance_status(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<AdvanceRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.advance_status(ctx.actor(), order_id, body, Utc::now()),
    )
}

pub async fn apply_hold(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<HoldRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.apply_hold(ctx.actor(), order_id, body, Utc::now()),
    )
}

pub async fn clear_hold(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ClearHoldRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.clear_hold(
            ctx.actor(),
            order_id,
            body.note,
            body.expected_version,
            Utc::now(),
        ),
    )
}

pub async fn upsert_commitment(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<CommitmentRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.upsert_commitment(ctx.actor(), order_id, body, Utc::now()),
    )
}

pub async fn classify_promise_miss(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<MissRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.classify_promise_miss(ctx.actor(), order_id, body, Utc::now()),
    )
}

pub async fn record_notification(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<NotificationRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    reply(
        StatusCode::OK,
        service.record_notification(ctx.actor(), order_id, body, Utc::now()),
    )
}
