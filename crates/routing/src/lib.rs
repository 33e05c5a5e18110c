//! `orderflow-routing`: production route templates and the assignment resolver.
//!
//! Templates and assignments are setup data owned by the route catalog. The
//! resolver is pure: given the catalog, an order line query and a point in time
//! it picks exactly one assignment, or explains why it could not.

pub mod assignment;
pub mod catalog;
pub mod resolver;
pub mod template;

pub use assignment::{PriorityRange, RouteAssignmentId, RouteTemplateAssignment, ScopePredicate};
pub use catalog::RouteCatalog;
pub use resolver::{
    CandidateEvaluation, CandidateOutcome, Resolution, RouteMatch, RouteQuery, RouteRuleSimulation,
    resolve, simulate,
};
pub use template::{CaptureRequirements, RouteTemplate, RouteTemplateId, RouteTemplateStep};
