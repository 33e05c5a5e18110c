//! Canonical order lifecycle and its transition table.
//!
//! Every legal edge is listed in [`TRANSITIONS`]; anything else is illegal.
//! The role allowed to walk an edge is never hardcoded here: it is looked up in
//! the decision policy under [`decision_key`].

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use orderflow_core::WorkflowError;

/// Workflow-engine status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLifecycleStatus {
    Draft,
    InboundLogisticsPlanned,
    Received,
    InProduction,
    ProductionComplete,
    ReadyToShip,
    Shipped,
    InvoiceReady,
    InvoiceSubmitted,
    Invoiced,
    Cancelled,
}

impl OrderLifecycleStatus {
    pub const ALL: [OrderLifecycleStatus; 11] = [
        OrderLifecycleStatus::Draft,
        OrderLifecycleStatus::InboundLogisticsPlanned,
        OrderLifecycleStatus::Received,
        OrderLifecycleStatus::InProduction,
        OrderLifecycleStatus::ProductionComplete,
        OrderLifecycleStatus::ReadyToShip,
        OrderLifecycleStatus::Shipped,
        OrderLifecycleStatus::InvoiceReady,
        OrderLifecycleStatus::InvoiceSubmitted,
        OrderLifecycleStatus::Invoiced,
        OrderLifecycleStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderLifecycleStatus::Draft => "draft",
            OrderLifecycleStatus::InboundLogisticsPlanned => "inbound_logistics_planned",
            OrderLifecycleStatus::Received => "received",
            OrderLifecycleStatus::InProduction => "in_production",
            OrderLifecycleStatus::ProductionComplete => "production_complete",
            OrderLifecycleStatus::ReadyToShip => "ready_to_ship",
            OrderLifecycleStatus::Shipped => "shipped",
            OrderLifecycleStatus::InvoiceReady => "invoice_ready",
            OrderLifecycleStatus::InvoiceSubmitted => "invoice_submitted",
            OrderLifecycleStatus::Invoiced => "invoiced",
            OrderLifecycleStatus::Cancelled => "cancelled",
        }
    }

    /// Position in the forward sequence. `Cancelled` sits outside it.
    pub fn sequence_index(&self) -> Option<usize> {
        match self {
            OrderLifecycleStatus::Cancelled => None,
            other => Self::ALL.iter().position(|s| s == other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderLifecycleStatus::Invoiced | OrderLifecycleStatus::Cancelled
        )
    }

    /// Lines may only be added before production starts.
    pub fn accepts_new_lines(&self) -> bool {
        matches!(
            self,
            OrderLifecycleStatus::Draft
                | OrderLifecycleStatus::InboundLogisticsPlanned
                | OrderLifecycleStatus::Received
        )
    }

    /// Shipped or beyond, or cancelled: a promise can no longer be missed.
    pub fn is_fulfilled(&self) -> bool {
        match self {
            OrderLifecycleStatus::Cancelled => true,
            other => other.sequence_index() >= OrderLifecycleStatus::Shipped.sequence_index(),
        }
    }

    /// Coarse operational status, always derived from the lifecycle status.
    pub fn coarse_status(&self) -> OrderStatus {
        match self {
            OrderLifecycleStatus::Draft
            | OrderLifecycleStatus::InboundLogisticsPlanned
            | OrderLifecycleStatus::Received => OrderStatus::Open,
            OrderLifecycleStatus::InProduction | OrderLifecycleStatus::ProductionComplete => {
                OrderStatus::InProduction
            }
            OrderLifecycleStatus::ReadyToShip => OrderStatus::ReadyToShip,
            OrderLifecycleStatus::Shipped => OrderStatus::Shipped,
            OrderLifecycleStatus::InvoiceReady | OrderLifecycleStatus::InvoiceSubmitted => {
                OrderStatus::Invoicing
            }
            OrderLifecycleStatus::Invoiced => OrderStatus::Closed,
            OrderLifecycleStatus::Cancelled => OrderStatus::Cancelled,
        }
    }
}

impl core::fmt::Display for OrderLifecycleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderLifecycleStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| WorkflowError::validation(format!("unknown lifecycle status '{s}'")))
    }
}

/// Coarse operational status shown to people outside the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    InProduction,
    ReadyToShip,
    Shipped,
    Invoicing,
    Closed,
    Cancelled,
}

/// How an edge may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionGate {
    /// Plain `AdvanceStatus`.
    Advance,
    /// Only through invoice submission.
    InvoiceSubmission,
    /// `AdvanceStatus`, once the ERP invoice reference is recorded.
    ErpReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: OrderLifecycleStatus,
    pub to: OrderLifecycleStatus,
    pub gate: TransitionGate,
}

const fn edge(
    from: OrderLifecycleStatus,
    to: OrderLifecycleStatus,
    gate: TransitionGate,
) -> TransitionRule {
    TransitionRule { from, to, gate }
}

use OrderLifecycleStatus as S;
use TransitionGate as G;

pub const TRANSITIONS: &[TransitionRule] = &[
    edge(S::Draft, S::InboundLogisticsPlanned, G::Advance),
    edge(S::InboundLogisticsPlanned, S::Received, G::Advance),
    edge(S::Received, S::InProduction, G::Advance),
    edge(S::InProduction, S::ProductionComplete, G::Advance),
    edge(S::ProductionComplete, S::ReadyToShip, G::Advance),
    edge(S::ReadyToShip, S::Shipped, G::Advance),
    edge(S::Shipped, S::InvoiceReady, G::Advance),
    edge(S::InvoiceReady, S::InvoiceSubmitted, G::InvoiceSubmission),
    edge(S::InvoiceSubmitted, S::Invoiced, G::ErpReference),
    edge(S::Draft, S::Cancelled, G::Advance),
    edge(S::InboundLogisticsPlanned, S::Cancelled, G::Advance),
    edge(S::Received, S::Cancelled, G::Advance),
    edge(S::InProduction, S::Cancelled, G::Advance),
    edge(S::ProductionComplete, S::Cancelled, G::Advance),
    edge(S::ReadyToShip, S::Cancelled, G::Advance),
];

pub fn rule(from: OrderLifecycleStatus, to: OrderLifecycleStatus) -> Option<&'static TransitionRule> {
    TRANSITIONS.iter().find(|r| r.from == from && r.to == to)
}

/// Policy key holding the role list for an edge, e.g.
/// `order.transition.draft.inbound_logistics_planned`.
pub fn decision_key(from: OrderLifecycleStatus, to: OrderLifecycleStatus) -> String {
    format!("order.transition.{}.{}", from.as_str(), to.as_str())
}

/// How a requested move relates to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPath {
    /// A listed edge.
    Direct(&'static TransitionRule),
    /// A forward skip over several `Advance` edges (guided override).
    Skip,
}

/// Adjacency check for `AdvanceStatus`.
///
/// `guided` asks for a forward skip; whether the caller may use it is checked
/// by the caller.
pub fn check_advance(
    from: OrderLifecycleStatus,
    to: OrderLifecycleStatus,
    guided: bool,
) -> Result<TransitionPath, WorkflowError> {
    if from.is_terminal() {
        return Err(WorkflowError::invalid_transition(from, to, "order is in a terminal state"));
    }

    if let Some(r) = rule(from, to) {
        return match r.gate {
            TransitionGate::InvoiceSubmission => Err(WorkflowError::invalid_transition(
                from,
                to,
                "edge is entered through invoice submission only",
            )),
            TransitionGate::Advance | TransitionGate::ErpReference => Ok(TransitionPath::Direct(r)),
        };
    }

    if !guided {
        return Err(WorkflowError::invalid_transition(from, to, "not a direct successor"));
    }

    if is_guided_skip(from, to) {
        Ok(TransitionPath::Skip)
    } else {
        Err(WorkflowError::invalid_transition(
            from,
            to,
            "guided override only skips forward to a later non-gated state",
        ))
    }
}

/// Forward skip that stays clear of the invoice-submission gate.
pub fn is_guided_skip(from: OrderLifecycleStatus, to: OrderLifecycleStatus) -> bool {
    let ceiling = OrderLifecycleStatus::InvoiceReady.sequence_index();
    match (from.sequence_index(), to.sequence_index()) {
        (Some(f), Some(t)) => t > f + 1 && Some(t) <= ceiling,
        _ => false,
    }
}
