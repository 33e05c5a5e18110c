//! Configuration loading.
//!
//! Read from a TOML file, then overridden from the environment. A missing file
//! means defaults.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use orderflow_orders::OrderLifecycleStatus;

pub const ENV_BIND_ADDR: &str = "ORDERFLOW_BIND_ADDR";
pub const ENV_REQUIRED_SIGNOFF_ROLES: &str = "ORDERFLOW_REQUIRED_SIGNOFF_ROLES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderflowConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Function roles that must sign off before a policy version activates.
    #[serde(default = "default_signoff_roles")]
    pub required_signoff_roles: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            required_signoff_roles: default_signoff_roles(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Entering one of these resolves a route for every unrouted line.
    #[serde(default = "default_production_states")]
    pub production_eligible_states: Vec<OrderLifecycleStatus>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            production_eligible_states: default_production_states(),
        }
    }
}

impl WorkflowConfig {
    pub fn is_production_eligible(&self, status: OrderLifecycleStatus) -> bool {
        self.production_eligible_states.contains(&status)
    }

    /// Whether `from → to` lands on or skips over a production-eligible state.
    pub fn enters_production(&self, from: OrderLifecycleStatus, to: OrderLifecycleStatus) -> bool {
        if self.is_production_eligible(to) {
            return true;
        }
        let (Some(f), Some(t)) = (from.sequence_index(), to.sequence_index()) else {
            return false;
        };
        self.production_eligible_states
            .iter()
            .filter_map(OrderLifecycleStatus::sequence_index)
            .any(|i| i > f && i <= t)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_signoff_roles() -> Vec<String> {
    ["Office", "Production", "Quality"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_production_states() -> Vec<OrderLifecycleStatus> {
    vec![OrderLifecycleStatus::InProduction]
}

impl OrderflowConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `path` (defaults when it does not exist), then apply env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (`std::env::var` in production).
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(ENV_BIND_ADDR) {
            self.server.bind_addr = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: ENV_BIND_ADDR.to_string(),
                message: format!("{e}"),
            })?;
        }

        if let Some(raw) = lookup(ENV_REQUIRED_SIGNOFF_ROLES) {
            let roles: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
            if roles.is_empty() {
                return Err(ConfigError::Invalid {
                    key: ENV_REQUIRED_SIGNOFF_ROLES.to_string(),
                    message: "at least one role is required".to_string(),
                });
            }
            self.policy.required_signoff_roles = roles;
        }

        Ok(())
    }
}
