use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use orderflow_auth::{Actor, Permission, Role};

use crate::app::errors;
use crate::context::ActorContext;

pub const HEADER_EMP_NO: &str = "x-acting-emp-no";
pub const HEADER_ROLE: &str = "x-acting-role";
/// Comma-separated permission names.
pub const HEADER_PERMISSIONS: &str = "x-acting-permissions";

pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let actor = actor_from_headers(req.headers())
        .map_err(|msg| errors::json_error(StatusCode::UNAUTHORIZED, "missing_actor", msg))?;

    req.extensions_mut().insert(ActorContext::new(actor));
    Ok(next.run(req).await)
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, String> {
    let emp_no = required_header(headers, HEADER_EMP_NO)?;
    let role = required_header(headers, HEADER_ROLE)?;

    let mut actor = Actor::new(emp_no, Role::new(role));
    if let Some(raw) = optional_header(headers, HEADER_PERMISSIONS)? {
        for name in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            actor = actor.with_permission(Permission::new(name.to_string()));
        }
    }
    Ok(actor)
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, String> {
    optional_header(headers, name)?.ok_or_else(|| format!("{name} header is required"))
}

fn optional_header(headers: &HeaderMap, name: &str) -> Result<Option<String>, String> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| format!("{name} header is not valid text"))?
        .trim();
    if value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn reads_actor_with_permissions() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EMP_NO, HeaderValue::from_static("E100"));
        headers.insert(HEADER_ROLE, HeaderValue::from_static("Office"));
        headers.insert(
            HEADER_PERMISSIONS,
            HeaderValue::from_static("order.transition.guided_override, ,*"),
        );

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.emp_no.as_str(), "E100");
        assert_eq!(actor.role.as_str(), "Office");
        assert_eq!(
            actor.permissions,
            vec![Permission::GUIDED_OVERRIDE, Permission::new("*")]
        );
    }

    #[test]
    fn blank_role_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EMP_NO, HeaderValue::from_static("E100"));
        headers.insert(HEADER_ROLE, HeaderValue::from_static("  "));

        let err = actor_from_headers(&headers).unwrap_err();
        assert!(err.contains(HEADER_ROLE));
    }
}
