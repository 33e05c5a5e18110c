use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_auth::EmpNo;
use orderflow_core::{CustomerId, OrderId, SiteId, WorkflowError};

/// Review steps that must all be confirmed before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceReview {
    pub final_review: bool,
    pub paperwork: bool,
    pub pricing: bool,
    pub billing: bool,
}

impl InvoiceReview {
    pub fn all_confirmed() -> Self {
        Self {
            final_review: true,
            paperwork: true,
            pricing: true,
            billing: true,
        }
    }

    /// Names of unconfirmed steps, in review order.
    pub fn missing(&self) -> Vec<String> {
        [
            ("final_review", self.final_review),
            ("paperwork", self.paperwork),
            ("pricing", self.pricing),
            ("billing", self.billing),
        ]
        .into_iter()
        .filter(|(_, confirmed)| !confirmed)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Whether invoice attachments are emailed, and which.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentDecision {
    pub send_attachment_email: bool,
    pub selected_attachment_ids: Vec<String>,
    pub skip_reason: Option<String>,
}

impl AttachmentDecision {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if !self.send_attachment_email {
            return Ok(());
        }
        let has_selection = !self.selected_attachment_ids.is_empty();
        let has_skip_reason = self
            .skip_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if has_selection || has_skip_reason {
            Ok(())
        } else {
            Err(WorkflowError::AttachmentDecisionRequired)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStagingResult {
    Pending,
    Succeeded,
    Failed,
}

/// Asynchronous staging result reported back by the ERP side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StagingOutcome {
    Succeeded { erp_invoice_reference: String },
    Failed { message: String },
    /// The request was handed to the channel again after a failure.
    Resent,
}

/// Handle returned to the submitter for tracking the staging request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingTicket {
    pub order_id: OrderId,
    pub correlation_id: String,
    pub channel: String,
    pub requested_at: DateTime<Utc>,
}

/// What is handed to the ERP channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpStagingRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub site_id: SiteId,
    pub correlation_id: String,
    pub channel: String,
    pub requested_by: EmpNo,
    pub requested_at: DateTime<Utc>,
    pub attachment_ids: Vec<String>,
}
