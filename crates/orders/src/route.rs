use serde::{Deserialize, Serialize};

use orderflow_core::WorkflowError;
use orderflow_routing::{RouteAssignmentId, RouteMatch, RouteTemplateId, RouteTemplateStep};

/// The production route an order line follows, frozen at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInstance {
    pub assignment_id: RouteAssignmentId,
    pub template_id: RouteTemplateId,
    pub template_code: String,
    pub tier: String,
    pub steps: Vec<RouteTemplateStep>,
}

impl From<RouteMatch> for RouteInstance {
    fn from(m: RouteMatch) -> Self {
        Self {
            assignment_id: m.assignment.id,
            template_id: m.template.id,
            steps: m.template.ordered_steps(),
            template_code: m.template.code,
            tier: m.tier,
        }
    }
}

/// Resolution result for one unrouted line, carried into `AdvanceStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRouteOutcome {
    pub line_no: u32,
    pub outcome: Result<RouteInstance, WorkflowError>,
}
