//! Policy facts the orchestrator resolves before a command reaches the order.
//!
//! The aggregate stays IO-free: it receives the already looked-up role list or
//! reason-code list and only decides.

use serde::{Deserialize, Serialize};

use orderflow_auth::Role;
use orderflow_core::WorkflowError;

/// Roles the active policy allows on one lifecycle edge.
///
/// An empty list means no policy entry exists, which allows nobody.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleGrant {
    pub decision_key: String,
    pub allowed_roles: Vec<String>,
}

impl RoleGrant {
    pub fn new(decision_key: impl Into<String>, allowed_roles: Vec<String>) -> Self {
        Self {
            decision_key: decision_key.into(),
            allowed_roles,
        }
    }

    pub fn check(&self, role: &Role) -> Result<(), WorkflowError> {
        if self.allowed_roles.iter().any(|r| role.matches(r)) {
            Ok(())
        } else {
            Err(WorkflowError::RoleNotAuthorized {
                role: role.to_string(),
                decision_key: self.decision_key.clone(),
                allowed: self.allowed_roles.clone(),
            })
        }
    }
}

/// Reason codes active under one policy key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveReasonCodes {
    pub decision_key: String,
    pub codes: Vec<String>,
}

impl ActiveReasonCodes {
    pub fn new(decision_key: impl Into<String>, codes: Vec<String>) -> Self {
        Self {
            decision_key: decision_key.into(),
            codes,
        }
    }

    /// Returns the code as stored in policy.
    pub fn check(&self, code: &str) -> Result<String, WorkflowError> {
        self.codes
            .iter()
            .find(|c| c.eq_ignore_ascii_case(code.trim()))
            .cloned()
            .ok_or_else(|| WorkflowError::InvalidReasonCode {
                code: code.to_string(),
                decision_key: self.decision_key.clone(),
            })
    }
}
