use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use orderflow_auth::{EmpNo, Role};
use orderflow_core::{Aggregate, AggregateId, AggregateRoot, WorkflowError};
use orderflow_events::Event;

use crate::scope::{PolicyContext, PolicyScope};

/// One keyed value inside a policy version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPolicyEntry {
    pub decision_key: String,
    pub version: u32,
    pub scope: PolicyScope,
    pub value: JsonValue,
    pub is_active: bool,
    pub updated_by: EmpNo,
    pub updated_at: DateTime<Utc>,
}

/// One function-role approval of a version. Never changes once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSignoff {
    pub version: u32,
    pub function_role: Role,
    pub approved_by: EmpNo,
    pub approved_at: DateTime<Utc>,
}

/// Lookup result: the winning entry plus the scope it was resolved at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPolicy {
    pub decision_key: String,
    pub version: u32,
    pub scope: PolicyScope,
    pub value: JsonValue,
}

impl ResolvedPolicy {
    /// Interpret the value as a list of strings (role grants, reason codes).
    ///
    /// A single string is treated as a one-element list; anything else is empty.
    pub fn as_string_list(&self) -> Vec<String> {
        match &self.value {
            JsonValue::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            JsonValue::String(s) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.as_string_list()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    version: u32,
    decision_key: String,
    scope: PolicyScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredEntry {
    value: JsonValue,
    updated_by: EmpNo,
    updated_at: DateTime<Utc>,
}

/// Stream type of the policy book.
pub const POLICY_BOOK_AGGREGATE_TYPE: &str = "policy.book";

/// Aggregate root: the deployment's decision-policy book.
///
/// All versions live in one stream so activation is a single atomic append and
/// concurrent activations are serialized by the stream version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionPolicyBook {
    id: AggregateId,
    entries: BTreeMap<EntryKey, StoredEntry>,
    signoffs: BTreeMap<u32, Vec<DecisionSignoff>>,
    active_version: Option<u32>,
    version: u64,
}

impl DecisionPolicyBook {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            entries: BTreeMap::new(),
            signoffs: BTreeMap::new(),
            active_version: None,
            version: 0,
        }
    }

    pub fn active_version(&self) -> Option<u32> {
        self.active_version
    }

    /// Every entry; `is_active` is derived from the active version so all
    /// entries of a version flip together.
    pub fn entries(&self) -> Vec<DecisionPolicyEntry> {
        self.entries
            .iter()
            .map(|(k, v)| DecisionPolicyEntry {
                decision_key: k.decision_key.clone(),
                version: k.version,
                scope: k.scope,
                value: v.value.clone(),
                is_active: self.active_version == Some(k.version),
                updated_by: v.updated_by.clone(),
                updated_at: v.updated_at,
            })
            .collect()
    }

    pub fn entries_for_version(&self, version: u32) -> Vec<DecisionPolicyEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.version == version)
            .collect()
    }

    pub fn signoffs(&self, version: u32) -> &[DecisionSignoff] {
        self.signoffs.get(&version).map(Vec::as_slice).unwrap_or(&[])
    }

    fn has_signoff(&self, version: u32, role: &Role) -> bool {
        self.signoffs(version)
            .iter()
            .any(|s| s.function_role.matches(role.as_str()))
    }

    /// Required roles that have not signed `version`, in configured order.
    pub fn missing_signoffs(&self, version: u32, required: &[Role]) -> Vec<Role> {
        let mut seen = BTreeSet::new();
        required
            .iter()
            .filter(|r| seen.insert(r.as_str().to_ascii_lowercase()))
            .filter(|r| !self.has_signoff(version, r))
            .cloned()
            .collect()
    }

    /// Resolve `decision_key` in the active version at the most specific scope
    /// matching `ctx`.
    pub fn lookup(&self, decision_key: &str, ctx: &PolicyContext) -> Option<ResolvedPolicy> {
        let version = self.active_version?;
        self.entries
            .iter()
            .filter(|(k, _)| k.version == version && k.decision_key == decision_key)
            .filter(|(k, _)| k.scope.matches(ctx))
            .max_by_key(|(k, _)| k.scope.specificity())
            .map(|(k, v)| ResolvedPolicy {
                decision_key: k.decision_key.clone(),
                version: k.version,
                scope: k.scope,
                value: v.value.clone(),
            })
    }
}

impl AggregateRoot for DecisionPolicyBook {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: write one entry into a not-yet-active version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertDecisionPolicy {
    pub decision_key: String,
    pub version: u32,
    pub scope: PolicyScope,
    pub value: JsonValue,
    pub changed_by: EmpNo,
    pub occurred_at: DateTime<Utc>,
}

/// Command: record one function role's approval of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSignoff {
    pub version: u32,
    pub function_role: Role,
    pub approved_by: EmpNo,
    pub occurred_at: DateTime<Utc>,
}

/// Command: activate a version; `required_roles` comes from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivatePolicyVersion {
    pub version: u32,
    pub required_roles: Vec<Role>,
    pub activated_by: EmpNo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyCommand {
    Upsert(UpsertDecisionPolicy),
    AddSignoff(AddSignoff),
    Activate(ActivatePolicyVersion),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPolicyUpserted {
    pub decision_key: String,
    pub version: u32,
    pub scope: PolicyScope,
    pub value: JsonValue,
    pub previous_value: Option<JsonValue>,
    pub changed_by: EmpNo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignoffRecorded {
    pub version: u32,
    pub function_role: Role,
    pub approved_by: EmpNo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVersionActivated {
    pub version: u32,
    pub previous_version: Option<u32>,
    pub activated_by: EmpNo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyEvent {
    DecisionPolicyUpserted(DecisionPolicyUpserted),
    SignoffRecorded(SignoffRecorded),
    PolicyVersionActivated(PolicyVersionActivated),
}

impl Event for PolicyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PolicyEvent::DecisionPolicyUpserted(_) => "policy.entry.upserted",
            PolicyEvent::SignoffRecorded(_) => "policy.signoff.recorded",
            PolicyEvent::PolicyVersionActivated(_) => "policy.version.activated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PolicyEvent::DecisionPolicyUpserted(e) => e.occurred_at,
            PolicyEvent::SignoffRecorded(e) => e.occurred_at,
            PolicyEvent::PolicyVersionActivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DecisionPolicyBook {
    type Command = PolicyCommand;
    type Event = PolicyEvent;
    type Error = WorkflowError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PolicyEvent::DecisionPolicyUpserted(e) => {
                self.entries.insert(
                    EntryKey {
                        version: e.version,
                        decision_key: e.decision_key.clone(),
                        scope: e.scope,
                    },
                    StoredEntry {
                        value: e.value.clone(),
                        updated_by: e.changed_by.clone(),
                        updated_at: e.occurred_at,
                    },
                );
            }
            PolicyEvent::SignoffRecorded(e) => {
                self.signoffs.entry(e.version).or_default().push(DecisionSignoff {
                    version: e.version,
                    function_role: e.function_role.clone(),
                    approved_by: e.approved_by.clone(),
                    approved_at: e.occurred_at,
                });
            }
            PolicyEvent::PolicyVersionActivated(e) => {
                self.active_version = Some(e.version);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PolicyCommand::Upsert(cmd) => self.handle_upsert(cmd),
            PolicyCommand::AddSignoff(cmd) => self.handle_signoff(cmd),
            PolicyCommand::Activate(cmd) => self.handle_activate(cmd),
        }
    }
}

impl DecisionPolicyBook {
    fn handle_upsert(&self, cmd: &UpsertDecisionPolicy) -> Result<Vec<PolicyEvent>, WorkflowError> {
        let key = cmd.decision_key.trim();
        if key.is_empty() {
            return Err(WorkflowError::validation("decision_key must not be empty"));
        }
        if cmd.version == 0 {
            return Err(WorkflowError::validation("policy version must be positive"));
        }
        if self.active_version == Some(cmd.version) {
            return Err(WorkflowError::validation(format!(
                "policy version {} is active; write a new version instead",
                cmd.version
            )));
        }

        let previous_value = self
            .entries
            .get(&EntryKey {
                version: cmd.version,
                decision_key: key.to_string(),
                scope: cmd.scope,
            })
            .map(|e| e.value.clone());

        Ok(vec![PolicyEvent::DecisionPolicyUpserted(DecisionPolicyUpserted {
            decision_key: key.to_string(),
            version: cmd.version,
            scope: cmd.scope,
            value: cmd.value.clone(),
            previous_value,
            changed_by: cmd.changed_by.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_signoff(&self, cmd: &AddSignoff) -> Result<Vec<PolicyEvent>, WorkflowError> {
        if cmd.function_role.as_str().trim().is_empty() {
            return Err(WorkflowError::validation("function_role must not be empty"));
        }
        if self.has_signoff(cmd.version, &cmd.function_role) {
            return Err(WorkflowError::DuplicateSignoff {
                version: cmd.version,
                role: cmd.function_role.to_string(),
            });
        }

        Ok(vec![PolicyEvent::SignoffRecorded(SignoffRecorded {
            version: cmd.version,
            function_role: cmd.function_role.clone(),
            approved_by: cmd.approved_by.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivatePolicyVersion) -> Result<Vec<PolicyEvent>, WorkflowError> {
        if self.active_version == Some(cmd.version) {
            return Err(WorkflowError::validation(format!(
                "policy version {} is already active",
                cmd.version
            )));
        }
        if !self.entries.keys().any(|k| k.version == cmd.version) {
            return Err(WorkflowError::validation(format!(
                "policy version {} has no entries",
                cmd.version
            )));
        }

        let missing = self.missing_signoffs(cmd.version, &cmd.required_roles);
        if !missing.is_empty() {
            return Err(WorkflowError::MissingSignoffs {
                version: cmd.version,
                roles: missing.iter().map(|r| r.to_string()).collect(),
            });
        }

        Ok(vec![PolicyEvent::PolicyVersionActivated(PolicyVersionActivated {
            version: cmd.version,
            previous_version: self.active_version,
            activated_by: cmd.activated_by.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::{CustomerId, SiteId};
    use orderflow_events::execute;
    use proptest::prelude::*;
    use serde_json::json;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn roles(names: &[&'static str]) -> Vec<Role> {
        names.iter().map(|n| Role::new(*n)).collect()
    }

    fn upsert(book: &mut DecisionPolicyBook, key: &str, version: u32, scope: PolicyScope, value: JsonValue) {
        execute(
            book,
            &PolicyCommand::Upsert(UpsertDecisionPolicy {
                decision_key: key.to_string(),
                version,
                scope,
                value,
                changed_by: EmpNo::new("E1"),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    fn sign(book: &mut DecisionPolicyBook, version: u32, role: &'static str) -> Result<Vec<PolicyEvent>, WorkflowError> {
        execute(
            book,
            &PolicyCommand::AddSignoff(AddSignoff {
                version,
                function_role: Role::new(role),
                approved_by: EmpNo::new("E2"),
                occurred_at: test_time(),
            }),
        )
    }

    fn activate(book: &mut DecisionPolicyBook, version: u32, required: &[&'static str]) -> Result<Vec<PolicyEvent>, WorkflowError> {
        execute(
            book,
            &PolicyCommand::Activate(ActivatePolicyVersion {
                version,
                required_roles: roles(required),
                activated_by: EmpNo::new("E3"),
                occurred_at: test_time(),
            }),
        )
    }

    const REQUIRED: [&str; 3] = ["Operations", "Finance", "Quality"];

    fn book_with_active_v2() -> DecisionPolicyBook {
        let mut book = DecisionPolicyBook::empty(AggregateId::new());
        upsert(&mut book, "order.transition.draft.inbound_logistics_planned", 2, PolicyScope::global(), json!(["Office"]));
        for r in REQUIRED {
            sign(&mut book, 2, r).unwrap();
        }
        activate(&mut book, 2, &REQUIRED).unwrap();
        book
    }

    #[test]
    fn activation_with_missing_signoff_lists_the_role_and_keeps_previous_version() {
        let mut book = book_with_active_v2();
        upsert(&mut book, "order.transition.draft.inbound_logistics_planned", 3, PolicyScope::global(), json!(["Office", "Planner"]));
        sign(&mut book, 3, "Operations").unwrap();
        sign(&mut book, 3, "Finance").unwrap();

        let err = activate(&mut book, 3, &REQUIRED).unwrap_err();

        assert_eq!(
            err,
            WorkflowError::MissingSignoffs {
                version: 3,
                roles: vec!["Quality".to_string()],
            }
        );
        assert_eq!(book.active_version(), Some(2));
        assert!(book.entries_for_version(2).iter().all(|e| e.is_active));
        assert!(book.entries_for_version(3).iter().all(|e| !e.is_active));
    }

    #[test]
    fn activation_flips_every_entry_of_the_version() {
        let mut book = book_with_active_v2();
        upsert(&mut book, "a", 3, PolicyScope::global(), json!(1));
        upsert(&mut book, "b", 3, PolicyScope::site(SiteId(4)), json!(2));
        for r in REQUIRED {
            sign(&mut book, 3, r).unwrap();
        }

        let events = activate(&mut book, 3, &REQUIRED).unwrap();

        match &events[0] {
            PolicyEvent::PolicyVersionActivated(e) => assert_eq!(e.previous_version, Some(2)),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(book.entries_for_version(3).iter().all(|e| e.is_active));
        assert!(book.entries_for_version(2).iter().all(|e| !e.is_active));
    }

    #[test]
    fn duplicate_signoff_is_rejected_case_insensitively() {
        let mut book = DecisionPolicyBook::empty(AggregateId::new());
        sign(&mut book, 5, "Quality").unwrap();

        let err = sign(&mut book, 5, "quality").unwrap_err();

        assert_eq!(
            err,
            WorkflowError::DuplicateSignoff {
                version: 5,
                role: "quality".to_string()
            }
        );
        assert_eq!(book.signoffs(5).len(), 1);
    }

    #[test]
    fn active_version_is_write_protected() {
        let book = book_with_active_v2();
        let err = book
            .handle(&PolicyCommand::Upsert(UpsertDecisionPolicy {
                decision_key: "x".to_string(),
                version: 2,
                scope: PolicyScope::global(),
                value: json!(true),
                changed_by: EmpNo::new("E1"),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn lookup_prefers_most_specific_scope() {
        let mut book = DecisionPolicyBook::empty(AggregateId::new());
        let key = "promise.reason_codes";
        upsert(&mut book, key, 1, PolicyScope::global(), json!(["G"]));
        upsert(&mut book, key, 1, PolicyScope::customer(CustomerId(7)), json!(["C"]));
        upsert(&mut book, key, 1, PolicyScope::site(SiteId(3)), json!(["S"]));
        upsert(&mut book, key, 1, PolicyScope::site_customer(SiteId(3), CustomerId(7)), json!(["SC"]));
        activate(&mut book, 1, &[]).unwrap();

        let lookup = |site, customer| {
            book.lookup(key, &PolicyContext { site_id: site, customer_id: customer })
                .unwrap()
                .as_string_list()
        };

        assert_eq!(lookup(Some(SiteId(3)), Some(CustomerId(7))), vec!["SC"]);
        assert_eq!(lookup(Some(SiteId(3)), Some(CustomerId(8))), vec!["S"]);
        assert_eq!(lookup(Some(SiteId(4)), Some(CustomerId(7))), vec!["C"]);
        assert_eq!(lookup(None, None), vec!["G"]);
    }

    #[test]
    fn lookup_ignores_inactive_versions() {
        let mut book = DecisionPolicyBook::empty(AggregateId::new());
        upsert(&mut book, "k", 1, PolicyScope::global(), json!("v1"));
        assert!(book.lookup("k", &PolicyContext::global()).is_none());
    }

    #[test]
    fn activating_empty_version_is_rejected() {
        let mut book = DecisionPolicyBook::empty(AggregateId::new());
        let err = activate(&mut book, 9, &[]).unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: whatever subset of roles signs, a version is active only
        /// when every required role signed it.
        #[test]
        fn version_never_active_without_all_signoffs(signed in prop::collection::vec(any::<bool>(), 3)) {
            let mut book = DecisionPolicyBook::empty(AggregateId::new());
            upsert(&mut book, "k", 1, PolicyScope::global(), json!(1));
            for (role, sign_it) in REQUIRED.iter().zip(&signed) {
                if *sign_it {
                    sign(&mut book, 1, *role).unwrap();
                }
            }

            let result = activate(&mut book, 1, &REQUIRED);

            let all_signed = signed.iter().all(|s| *s);
            prop_assert_eq!(result.is_ok(), all_signed);
            prop_assert_eq!(book.active_version() == Some(1), all_signed);
        }
    }
}
