use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value as JsonValue, json};
use tracing::warn;

use orderflow_core::{OrderId, WorkflowError};
use orderflow_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Workflow(e) => workflow_error_to_response(&e),
        DispatchError::Deserialize(msg) => {
            warn!(error = %msg, "stored event could not be decoded");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => {
            warn!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::RoleNotAuthorized { .. } | WorkflowError::Unauthorized { .. } => {
            StatusCode::FORBIDDEN
        }
        WorkflowError::InvalidTransition { .. }
        | WorkflowError::Blocked { .. }
        | WorkflowError::ConcurrentModification(_)
        | WorkflowError::AlreadyOnHold { .. }
        | WorkflowError::NoActiveHold
        | WorkflowError::DuplicateSignoff { .. }
        | WorkflowError::PromiseNotMissed { .. } => StatusCode::CONFLICT,
        WorkflowError::InvalidReasonCode { .. }
        | WorkflowError::ReviewIncomplete { .. }
        | WorkflowError::AttachmentDecisionRequired
        | WorkflowError::MissingSignoffs { .. }
        | WorkflowError::NoMatch { .. }
        | WorkflowError::AmbiguousMatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::ErpStagingFailed { .. } => StatusCode::BAD_GATEWAY,
    }
}

/// `{error, message, context}` where `context` is the variant's payload.
pub fn workflow_error_to_response(err: &WorkflowError) -> axum::response::Response {
    let context = serde_json::to_value(err)
        .ok()
        .and_then(|v| v.get("context").cloned())
        .unwrap_or(JsonValue::Null);

    (
        status_for(err),
        axum::Json(json!({
            "error": err.code(),
            "message": err.to_string(),
            "context": context,
        })),
    )
        .into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "context": JsonValue::Null,
        })),
    )
        .into_response()
}

pub fn parse_order_id(raw: &str) -> Result<OrderId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_rejection_is_forbidden_and_carries_context() {
        let err = WorkflowError::RoleNotAuthorized {
            role: "Shipping".to_string(),
            decision_key: "order.transition.draft.inbound_logistics_planned".to_string(),
            allowed: vec!["Office".to_string()],
        };
        let response = workflow_error_to_response(&err);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn lost_race_is_a_conflict() {
        let err = DispatchError::Workflow(WorkflowError::concurrent("stale"));
        assert_eq!(dispatch_error_to_response(err).status(), StatusCode::CONFLICT);
    }
}
