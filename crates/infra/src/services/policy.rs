//! Decision-policy store.
//!
//! The policy book is one event stream. Reads go through a cached snapshot
//! that every write through this service drops before returning.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use orderflow_auth::{Actor, Role};
use orderflow_core::AggregateId;
use orderflow_orders::{ActiveReasonCodes, RoleGrant};
use orderflow_policy::{
    ActivatePolicyVersion, AddSignoff, DecisionPolicyBook, DecisionPolicyEntry, DecisionSignoff,
    POLICY_BOOK_AGGREGATE_TYPE, PolicyCommand, PolicyContext, PolicyScope, ResolvedPolicy,
    UpsertDecisionPolicy,
};

use super::Dispatcher;
use super::snapshot::SnapshotCache;
use crate::command_dispatcher::{DispatchError, Loaded};

/// Stream id of the deployment's single policy book.
pub fn policy_book_id() -> AggregateId {
    AggregateId::from_uuid(Uuid::from_u128(0x0001))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyActivation {
    pub version: u32,
    pub previous_version: Option<u32>,
}

pub struct PolicyService {
    dispatcher: Arc<Dispatcher>,
    required_roles: Vec<Role>,
    cache: SnapshotCache<DecisionPolicyBook>,
}

impl PolicyService {
    pub fn new(dispatcher: Arc<Dispatcher>, required_roles: &[String]) -> Self {
        Self {
            dispatcher,
            required_roles: required_roles.iter().cloned().map(Role::new).collect(),
            cache: SnapshotCache::new(),
        }
    }

    pub fn required_roles(&self) -> &[Role] {
        &self.required_roles
    }

    fn load(&self) -> Result<Loaded<DecisionPolicyBook>, DispatchError> {
        self.dispatcher.load(policy_book_id(), DecisionPolicyBook::empty)
    }

    /// Current book, from cache when warm.
    pub fn book(&self) -> Result<Arc<DecisionPolicyBook>, DispatchError> {
        self.cache.get_or_load(|| Ok(self.load()?.aggregate))
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_current()
    }

    fn invalidate(&self) {
        self.cache.invalidate();
    }

    fn execute(
        &self,
        loaded: Loaded<DecisionPolicyBook>,
        command: &PolicyCommand,
    ) -> Result<DecisionPolicyBook, DispatchError> {
        let result = self
            .dispatcher
            .execute(loaded, policy_book_id(), POLICY_BOOK_AGGREGATE_TYPE, command);
        self.invalidate();
        Ok(result?.aggregate)
    }

    pub fn upsert(
        &self,
        actor: &Actor,
        decision_key: &str,
        version: u32,
        scope: PolicyScope,
        value: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<DecisionPolicyEntry, DispatchError> {
        let command = PolicyCommand::Upsert(UpsertDecisionPolicy {
            decision_key: decision_key.to_string(),
            version,
            scope,
            value,
            changed_by: actor.emp_no.clone(),
            occurred_at: now,
        });
        let book = self.execute(self.load()?, &command)?;

        info!(decision_key, version, scope = scope.label(), emp_no = %actor.emp_no, "policy entry written");

        book.entries_for_version(version)
            .into_iter()
            .find(|e| e.decision_key == decision_key.trim() && e.scope == scope)
            .ok_or_else(|| {
                DispatchError::Workflow(orderflow_core::WorkflowError::not_found(format!(
                    "policy entry {decision_key} v{version}"
                )))
            })
    }

    pub fn add_signoff(
        &self,
        actor: &Actor,
        version: u32,
        function_role: Role,
        now: DateTime<Utc>,
    ) -> Result<Vec<DecisionSignoff>, DispatchError> {
        let command = PolicyCommand::AddSignoff(AddSignoff {
            version,
            function_role: function_role.clone(),
            approved_by: actor.emp_no.clone(),
            occurred_at: now,
        });
        let book = self.execute(self.load()?, &command)?;

        info!(version, function_role = %function_role, emp_no = %actor.emp_no, "policy signoff recorded");
        Ok(book.signoffs(version).to_vec())
    }

    pub fn activate(
        &self,
        actor: &Actor,
        version: u32,
        now: DateTime<Utc>,
    ) -> Result<PolicyActivation, DispatchError> {
        let loaded = self.load()?;
        let previous_version = loaded.aggregate.active_version();

        let command = PolicyCommand::Activate(ActivatePolicyVersion {
            version,
            required_roles: self.required_roles.clone(),
            activated_by: actor.emp_no.clone(),
            occurred_at: now,
        });
        self.execute(loaded, &command)?;

        info!(version, ?previous_version, emp_no = %actor.emp_no, "policy version activated");
        Ok(PolicyActivation {
            version,
            previous_version,
        })
    }

    pub fn lookup(
        &self,
        decision_key: &str,
        ctx: &PolicyContext,
    ) -> Result<Option<ResolvedPolicy>, DispatchError> {
        Ok(self.book()?.lookup(decision_key, ctx))
    }

    /// Roles allowed under `decision_key`; a missing entry grants nobody.
    pub fn role_grant(&self, decision_key: &str, ctx: &PolicyContext) -> Result<RoleGrant, DispatchError> {
        let allowed = self
            .lookup(decision_key, ctx)?
            .map(|p| p.as_string_list())
            .unwrap_or_default();
        Ok(RoleGrant::new(decision_key, allowed))
    }

    pub fn reason_codes(
        &self,
        decision_key: &str,
        ctx: &PolicyContext,
    ) -> Result<ActiveReasonCodes, DispatchError> {
        let codes = self
            .lookup(decision_key, ctx)?
            .map(|p| p.as_string_list())
            .unwrap_or_default();
        Ok(ActiveReasonCodes::new(decision_key, codes))
    }
}
