use std::collections::BTreeMap;

use orderflow_core::WorkflowResult;

use crate::assignment::{RouteAssignmentId, RouteTemplateAssignment};
use crate::template::{RouteTemplate, RouteTemplateId};

/// Route setup data: templates and the assignments that select them.
///
/// Keyed maps keep iteration order stable by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCatalog {
    templates: BTreeMap<RouteTemplateId, RouteTemplate>,
    assignments: BTreeMap<RouteAssignmentId, RouteTemplateAssignment>,
}

impl RouteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template. Returns the previous version if any.
    pub fn upsert_template(&mut self, template: RouteTemplate) -> WorkflowResult<Option<RouteTemplate>> {
        template.validate()?;
        Ok(self.templates.insert(template.id, template))
    }

    /// Insert or replace an assignment.
    ///
    /// The referenced template is not required to exist yet; resolution reports
    /// a dangling reference as a no-match diagnostic.
    pub fn upsert_assignment(
        &mut self,
        assignment: RouteTemplateAssignment,
    ) -> WorkflowResult<Option<RouteTemplateAssignment>> {
        assignment.validate()?;
        Ok(self.assignments.insert(assignment.id, assignment))
    }

    pub fn template(&self, id: RouteTemplateId) -> Option<&RouteTemplate> {
        self.templates.get(&id)
    }

    pub fn assignment(&self, id: RouteAssignmentId) -> Option<&RouteTemplateAssignment> {
        self.assignments.get(&id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &RouteTemplate> {
        self.templates.values()
    }

    pub fn assignments(&self) -> impl Iterator<Item = &RouteTemplateAssignment> {
        self.assignments.values()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }
}
