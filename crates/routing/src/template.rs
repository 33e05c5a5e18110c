use serde::{Deserialize, Serialize};

use orderflow_core::{WorkflowError, WorkflowResult};

/// Route template identifier (setup data, integer key).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTemplateId(pub u64);

impl core::fmt::Display for RouteTemplateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What the shop floor must capture when executing a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRequirements {
    pub scan: bool,
    pub usage: bool,
    pub scrap: bool,
    pub serials: bool,
    pub checklist: bool,
    pub attachment: bool,
    pub supervisor_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTemplateStep {
    pub sequence: u32,
    pub name: String,
    pub work_center: String,
    #[serde(default)]
    pub captures: CaptureRequirements,
}

/// An ordered list of production steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTemplate {
    pub id: RouteTemplateId,
    pub code: String,
    pub name: String,
    pub steps: Vec<RouteTemplateStep>,
}

impl RouteTemplate {
    /// Steps must exist and sequence numbers must be unique.
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.code.trim().is_empty() {
            return Err(WorkflowError::validation("route template code must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::validation(format!(
                "route template {} has no steps",
                self.id
            )));
        }

        let mut seen = std::collections::BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.sequence) {
                return Err(WorkflowError::validation(format!(
                    "route template {} repeats step sequence {}",
                    self.id, step.sequence
                )));
            }
        }
        Ok(())
    }

    /// Steps sorted by sequence number.
    pub fn ordered_steps(&self) -> Vec<RouteTemplateStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.sequence);
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(sequence: u32, name: &str) -> RouteTemplateStep {
        RouteTemplateStep {
            sequence,
            name: name.to_string(),
            work_center: "WC-1".to_string(),
            captures: CaptureRequirements::default(),
        }
    }

    #[test]
    fn ordered_steps_follow_sequence() {
        let template = RouteTemplate {
            id: RouteTemplateId(1),
            code: "STD".to_string(),
            name: "Standard".to_string(),
            steps: vec![step(30, "pack"), step(10, "cut"), step(20, "weld")],
        };
        let names: Vec<_> = template.ordered_steps().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["cut", "weld", "pack"]);
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let template = RouteTemplate {
            id: RouteTemplateId(2),
            code: "DUP".to_string(),
            name: "Dup".to_string(),
            steps: vec![step(10, "a"), step(10, "b")],
        };
        assert_eq!(template.validate().unwrap_err().code(), "validation");
    }

    #[test]
    fn missing_capture_flags_default_to_false() {
        let step: RouteTemplateStep = serde_json::from_value(serde_json::json!({
            "sequence": 10,
            "name": "inspect",
            "work_center": "QC",
            "captures": { "checklist": true }
        }))
        .unwrap();
        assert!(step.captures.checklist);
        assert!(!step.captures.supervisor_approval);
    }
}
