use serde::{Deserialize, Serialize};

use crate::{Permission, Role};

/// Employee number of the person performing an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmpNo(String);

impl EmpNo {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for EmpNo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated acting identity attached to every mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub emp_no: EmpNo,
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Actor {
    pub fn new(emp_no: impl Into<String>, role: Role) -> Self {
        Self {
            emp_no: EmpNo::new(emp_no),
            role,
            permissions: Vec::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// The ERP reconciliation callback and other unattended processes.
    pub fn system() -> Self {
        Self::new("SYSTEM", Role::new("System"))
    }
}
