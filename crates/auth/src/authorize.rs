use thiserror::Error;

use orderflow_core::WorkflowError;

use crate::{Actor, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {emp_no} lacks permission '{permission}'")]
    Forbidden { emp_no: String, permission: String },
}

impl From<AuthzError> for WorkflowError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Forbidden { permission, .. } => WorkflowError::Unauthorized { permission },
        }
    }
}

/// Check that the actor holds `required` (or the wildcard).
///
/// Pure policy check: no IO, no panics.
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    let granted = actor
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            emp_no: actor.emp_no.to_string(),
            permission: required.as_str().to_string(),
        })
    }
}
