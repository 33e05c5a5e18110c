use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    response::IntoResponse,
};

use orderflow_infra::services::WorkflowService;

use crate::app::errors;

pub async fn audit_log(Extension(service): Extension<Arc<WorkflowService>>) -> impl IntoResponse {
    Json(service.audit_log())
}

pub async fn order_audit(
    Extension(service): Extension<Arc<WorkflowService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = service.get_order(order_id) {
        return errors::dispatch_error_to_response(e);
    }
    Json(service.audit_trail(order_id)).into_response()
}
