use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use orderflow_auth::Role;
use orderflow_infra::services::WorkflowService;

use super::reply;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/entries", post(upsert_policy))
        .route("/signoffs", post(add_signoff))
        .route("/activations", post(activate_policy))
        .route("/lookup", get(lookup_policy))
}

pub async fn upsert_policy(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<dto::PolicyUpsertRequest>,
) -> axum::response::Response {
    reply(
        StatusCode::OK,
        service.upsert_policy(
            ctx.actor(),
            &body.decision_key,
            body.version,
            body.scope,
            body.value,
            Utc::now(),
        ),
    )
}

pub async fn add_signoff(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<dto::SignoffRequest>,
) -> axum::response::Response {
    reply(
        StatusCode::OK,
        service.add_signoff(ctx.actor(), body.version, Role::new(body.function_role), Utc::now()),
    )
}

pub async fn activate_policy(
    Extension(service): Extension<Arc<WorkflowService>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<dto::ActivateRequest>,
) -> axum::response::Response {
    reply(
        StatusCode::OK,
        service.activate_policy(ctx.actor(), body.version, Utc::now()),
    )
}

pub async fn lookup_policy(
    Extension(service): Extension<Arc<WorkflowService>>,
    Query(query): Query<dto::PolicyLookupQuery>,
) -> axum::response::Response {
    match service.lookup_policy(&query.decision_key, &query.context()) {
        Ok(Some(policy)) => Json(policy).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no active policy for {}", query.decision_key),
        ),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
