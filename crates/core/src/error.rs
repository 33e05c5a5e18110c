//! Workflow error model.
//!
//! Every rejection carries enough context (decision key, role, overlay,
//! missing signoffs) for a human to resolve the block.

use serde::Serialize;
use thiserror::Error;

/// Result type used across the workflow domain.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Deterministic, business-level failure of a workflow operation.
///
/// Infrastructure failures (storage, publication) are wrapped elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "context", rename_all = "snake_case")]
pub enum WorkflowError {
    /// Malformed input or a precondition outside the named taxonomy.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Target status is not a legal successor of the current status.
    #[error("invalid transition {from} -> {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// An active hold overlay suspends lifecycle transitions.
    #[error("order is blocked by {overlay} (reason {reason_code}); cannot move to {target}")]
    Blocked {
        overlay: String,
        reason_code: String,
        target: String,
    },

    #[error("role '{role}' is not authorized by policy '{decision_key}' (allowed: {allowed:?})")]
    RoleNotAuthorized {
        role: String,
        decision_key: String,
        allowed: Vec<String>,
    },

    /// The actor lacks an explicit capability (override flags).
    #[error("missing permission '{permission}'")]
    Unauthorized { permission: String },

    /// Lost an optimistic concurrency race; reload and retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("order already on {overlay} (reason {reason_code})")]
    AlreadyOnHold { overlay: String, reason_code: String },

    #[error("order has no active hold")]
    NoActiveHold,

    #[error("reason code '{code}' is not active in policy '{decision_key}'")]
    InvalidReasonCode { code: String, decision_key: String },

    #[error("invoice review incomplete: {missing:?}")]
    ReviewIncomplete { missing: Vec<String> },

    #[error("attachment email requested without a selection or skip reason")]
    AttachmentDecisionRequired,

    #[error("policy version {version} is missing signoffs from {roles:?}")]
    MissingSignoffs { version: u32, roles: Vec<String> },

    #[error("role '{role}' already signed off policy version {version}")]
    DuplicateSignoff { version: u32, role: String },

    #[error("no route assignment matched: {diagnostic}")]
    NoMatch { diagnostic: String },

    #[error("ambiguous route assignments at tier {tier}: {assignment_ids:?}")]
    AmbiguousMatch {
        tier: String,
        assignment_ids: Vec<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        line_no: Option<u32>,
    },

    #[error("promise miss cannot be classified: {reason}")]
    PromiseNotMissed { reason: String },

    #[error("ERP staging failed for correlation {correlation_id}: {message}")]
    ErpStagingFailed {
        correlation_id: String,
        message: String,
    },
}

impl WorkflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn invalid_transition(
        from: impl ToString,
        to: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach the order line a route resolution failure belongs to.
    pub fn for_line(self, line: u32) -> Self {
        match self {
            Self::NoMatch { diagnostic } => Self::NoMatch {
                diagnostic: format!("line {line}: {diagnostic}"),
            },
            Self::AmbiguousMatch {
                tier,
                assignment_ids,
                ..
            } => Self::AmbiguousMatch {
                tier,
                assignment_ids,
                line_no: Some(line),
            },
            other => other,
        }
    }

    /// Stable machine-readable code (matches the serialized `code` tag).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Blocked { .. } => "blocked",
            Self::RoleNotAuthorized { .. } => "role_not_authorized",
            Self::Unauthorized { .. } => "unauthorized",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::AlreadyOnHold { .. } => "already_on_hold",
            Self::NoActiveHold => "no_active_hold",
            Self::InvalidReasonCode { .. } => "invalid_reason_code",
            Self::ReviewIncomplete { .. } => "review_incomplete",
            Self::AttachmentDecisionRequired => "attachment_decision_required",
            Self::MissingSignoffs { .. } => "missing_signoffs",
            Self::DuplicateSignoff { .. } => "duplicate_signoff",
            Self::NoMatch { .. } => "no_match",
            Self::AmbiguousMatch { .. } => "ambiguous_match",
            Self::PromiseNotMissed { .. } => "promise_not_missed",
            Self::ErpStagingFailed { .. } => "erp_staging_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_tag_matches_code() {
        let errors = vec![
            WorkflowError::NoActiveHold,
            WorkflowError::MissingSignoffs {
                version: 3,
                roles: vec!["Quality".to_string()],
            },
            WorkflowError::invalid_transition("draft", "shipped", "not adjacent"),
            WorkflowError::validation("bad"),
        ];

        for err in errors {
            let json = serde_json::to_value(&err).unwrap();
            assert_eq!(json["code"], err.code());
        }
    }

    #[test]
    fn route_failures_carry_the_line() {
        let err = WorkflowError::NoMatch {
            diagnostic: "nothing".to_string(),
        }
        .for_line(3);
        assert_eq!(
            err,
            WorkflowError::NoMatch {
                diagnostic: "line 3: nothing".to_string()
            }
        );

        let err = WorkflowError::AmbiguousMatch {
            tier: "site".to_string(),
            assignment_ids: vec![1, 2],
            line_no: None,
        }
        .for_line(2);
        assert!(matches!(err, WorkflowError::AmbiguousMatch { line_no: Some(2), .. }));
    }

    #[test]
    fn missing_signoffs_message_names_roles() {
        let err = WorkflowError::MissingSignoffs {
            version: 3,
            roles: vec!["Quality".to_string()],
        };
        assert!(err.to_string().contains("Quality"));
    }
}
