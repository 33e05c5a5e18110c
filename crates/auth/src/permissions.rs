use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (opaque string such as "order.transition.guided_override").
///
/// The wildcard `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Skip lifecycle states without walking every intermediate edge.
    pub const GUIDED_OVERRIDE: Permission =
        Permission(Cow::Borrowed("order.transition.guided_override"));

    /// Bypass the per-transition role policy.
    pub const GUARDRAIL_OVERRIDE: Permission =
        Permission(Cow::Borrowed("order.transition.guardrail_override"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
