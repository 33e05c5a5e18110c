use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::context::ActorContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(ctx): Extension<ActorContext>) -> impl IntoResponse {
    let actor = ctx.actor();
    Json(serde_json::json!({
        "emp_no": actor.emp_no.as_str(),
        "role": actor.role.as_str(),
        "permissions": actor.permissions.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
    }))
}
