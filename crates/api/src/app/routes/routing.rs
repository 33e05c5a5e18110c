use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;

use orderflow_infra::services::WorkflowService;
use orderflow_routing::{RouteQuery, RouteTemplate, RouteTemplateAssignment};

use super::reply;

pub fn router() -> Router {
    Router::new()
        .route("/templates", post(upsert_template))
        .route("/assignments", post(upsert_assignment))
        .route("/simulate", post(simulate_route))
}

pub async fn upsert_template(
    Extension(service): Extension<Arc<WorkflowService>>,
    Json(body): Json<RouteTemplate>,
) -> axum::response::Response {
    reply(
        StatusCode::OK,
        service
            .upsert_template(body)
            .map(|previous| serde_json::json!({ "replaced": previous.is_some() })),
    )
}

pub async fn upsert_assignment(
    Extension(service): Extension<Arc<WorkflowService>>,
    Json(body): Json<RouteTemplateAssignment>,
) -> axum::response::Response {
    reply(
        StatusCode::OK,
        service
            .upsert_assignment(body)
            .map(|previous| serde_json::json!({ "replaced": previous.is_some() })),
    )
}

/// Dry run; never changes the catalog.
pub async fn simulate_route(
    Extension(service): Extension<Arc<WorkflowService>>,
    Json(query): Json<RouteQuery>,
) -> impl IntoResponse {
    Json(service.simulate_route(&query, Utc::now()))
}
