use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stamp::ActorStamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldOverlayType {
    CreditHold,
    QualityHold,
    CustomerHold,
    EngineeringHold,
    ShippingHold,
}

impl HoldOverlayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldOverlayType::CreditHold => "credit_hold",
            HoldOverlayType::QualityHold => "quality_hold",
            HoldOverlayType::CustomerHold => "customer_hold",
            HoldOverlayType::EngineeringHold => "engineering_hold",
            HoldOverlayType::ShippingHold => "shipping_hold",
        }
    }
}

impl core::fmt::Display for HoldOverlayType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up schedule for holds waiting on the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRetry {
    pub attempts: u32,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel: Option<String>,
}

/// The active blocking reason on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldOverlay {
    pub overlay_type: HoldOverlayType,
    pub reason_code: String,
    pub applied_by: ActorStamp,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub contact_retry: Option<ContactRetry>,
}
