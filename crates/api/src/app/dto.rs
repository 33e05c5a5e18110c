//! Request bodies and queries not already defined by the workflow service.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use orderflow_core::{CustomerId, SiteId};
use orderflow_orders::StagingOutcome;
use orderflow_policy::{PolicyContext, PolicyScope};

#[derive(Debug, Deserialize)]
pub struct ClearHoldRequest {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Callback body from the ERP side.
#[derive(Debug, Deserialize)]
pub struct StagingResultRequest {
    pub correlation_id: String,
    pub outcome: StagingOutcome,
}

#[derive(Debug, Deserialize)]
pub struct PolicyUpsertRequest {
    pub decision_key: String,
    pub version: u32,
    #[serde(default)]
    pub scope: PolicyScope,
    pub value: JsonValue,
}

#[derive(Debug, Deserialize)]
pub struct SignoffRequest {
    pub version: u32,
    pub function_role: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub version: u32,
}

#[derive(Debug, Deserialize)]
pub struct PolicyLookupQuery {
    pub decision_key: String,
    pub site_id: Option<i64>,
    pub customer_id: Option<i64>,
}

impl PolicyLookupQuery {
    pub fn context(&self) -> PolicyContext {
        PolicyContext {
            site_id: self.site_id.map(SiteId),
            customer_id: self.customer_id.map(CustomerId),
        }
    }
}
