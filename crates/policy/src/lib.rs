//! Versioned decision-policy engine (event-sourced).
//!
//! Policy values (transition role grants, active reason codes, ...) are written
//! into an inactive version, signed off by every required function role and
//! then activated as one atomic unit. Lookups always resolve the most specific
//! active scope for a site/customer context.

pub mod book;
pub mod scope;

pub use book::{
    ActivatePolicyVersion, AddSignoff, DecisionPolicyBook, DecisionPolicyEntry,
    DecisionPolicyUpserted, DecisionSignoff, POLICY_BOOK_AGGREGATE_TYPE, PolicyCommand, PolicyEvent, PolicyVersionActivated,
    ResolvedPolicy, SignoffRecorded, UpsertDecisionPolicy,
};
pub use scope::{PolicyContext, PolicyScope};
