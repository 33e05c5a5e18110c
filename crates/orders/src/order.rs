use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use orderflow_auth::{Actor, EmpNo, Permission, Role, authorize};
use orderflow_core::{Aggregate, AggregateRoot, CustomerId, ItemId, OrderId, SiteId, WorkflowError};
use orderflow_events::Event;

use crate::guard::{ActiveReasonCodes, RoleGrant};
use crate::hold::{ContactRetry, HoldOverlay, HoldOverlayType};
use crate::invoice::{
    AttachmentDecision, ErpStagingRequest, InvoiceReview, InvoiceStagingResult, StagingOutcome,
};
use crate::lifecycle::{
    self, OrderLifecycleStatus, OrderStatus, TransitionGate, TransitionPath,
};
use crate::promise::{PromiseChangeEvent, PromiseChangeKind, PromiseHistoryProjection};
use crate::route::{LineRouteOutcome, RouteInstance};
use crate::stamp::ActorStamp;

/// Stream type of order event streams.
pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub item_type: Option<String>,
    pub quantity: i64,
    pub route: Option<RouteInstance>,
}

/// Who last moved the lifecycle, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStamp {
    pub updated_at: DateTime<Utc>,
    pub updated_by: EmpNo,
    pub owner_role: Role,
    pub reason_code: Option<String>,
    pub note: Option<String>,
}

/// Invoice submission fields. Staging results never touch the stamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSubmission {
    pub requested_at: DateTime<Utc>,
    pub requested_by: EmpNo,
    pub channel: String,
    pub correlation_id: String,
    pub review_completed_by: EmpNo,
    pub attachments: AttachmentDecision,
    pub staging_result: InvoiceStagingResult,
    pub staging_error: Option<String>,
    pub erp_invoice_reference: Option<String>,
}

/// Aggregate root: a manufacturing sales order moving through the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    site_id: SiteId,
    order_priority: Option<i32>,
    ship_via: Option<String>,
    lines: Vec<OrderLine>,
    lifecycle: OrderLifecycleStatus,
    status_stamp: Option<StatusStamp>,
    hold: Option<HoldOverlay>,
    promise: PromiseHistoryProjection,
    invoice: Option<InvoiceSubmission>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            customer_id: CustomerId(0),
            site_id: SiteId(0),
            order_priority: None,
            ship_via: None,
            lines: Vec::new(),
            lifecycle: OrderLifecycleStatus::Draft,
            status_stamp: None,
            hold: None,
            promise: PromiseHistoryProjection::new(),
            invoice: None,
            version: 0,
            created: false,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn order_priority(&self) -> Option<i32> {
        self.order_priority
    }

    pub fn ship_via(&self) -> Option<&str> {
        self.ship_via.as_deref()
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn unrouted_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.iter().filter(|l| l.route.is_none())
    }

    pub fn lifecycle_status(&self) -> OrderLifecycleStatus {
        self.lifecycle
    }

    pub fn status(&self) -> OrderStatus {
        self.lifecycle.coarse_status()
    }

    pub fn status_stamp(&self) -> Option<&StatusStamp> {
        self.status_stamp.as_ref()
    }

    pub fn hold(&self) -> Option<&HoldOverlay> {
        self.hold.as_ref()
    }

    pub fn promise(&self) -> &PromiseHistoryProjection {
        &self.promise
    }

    pub fn invoice(&self) -> Option<&InvoiceSubmission> {
        self.invoice.as_ref()
    }

    /// The request to hand to the ERP channel for the current submission.
    pub fn staging_request(&self) -> Option<ErpStagingRequest> {
        self.invoice.as_ref().map(|inv| ErpStagingRequest {
            order_id: self.id,
            customer_id: self.customer_id,
            site_id: self.site_id,
            correlation_id: inv.correlation_id.clone(),
            channel: inv.channel.clone(),
            requested_by: inv.requested_by.clone(),
            requested_at: inv.requested_at,
            attachment_ids: inv.attachments.selected_attachment_ids.clone(),
        })
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub site_id: SiteId,
    pub order_priority: Option<i32>,
    pub ship_via: Option<String>,
    pub requested_date: Option<NaiveDate>,
    pub created_by: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub item_id: ItemId,
    pub item_type: Option<String>,
    pub quantity: i64,
    pub added_by: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceStatus.
///
/// `role_grant` and `route_outcomes` are resolved by the orchestrator against
/// the state at the expected stream version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceStatus {
    pub target: OrderLifecycleStatus,
    pub actor: Actor,
    pub reason_code: Option<String>,
    pub note: Option<String>,
    pub guided_override: bool,
    pub guardrail_override: bool,
    pub role_grant: RoleGrant,
    /// Set when `target` is production-eligible: every unrouted line needs an outcome.
    pub requires_routing: bool,
    pub route_outcomes: Vec<LineRouteOutcome>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyHold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyHold {
    pub overlay_type: HoldOverlayType,
    pub reason_code: String,
    pub actor: Actor,
    pub note: Option<String>,
    pub contact_retry: Option<ContactRetry>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClearHold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearHold {
    pub actor: Actor,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpsertCommitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCommitment {
    pub requested_date: Option<NaiveDate>,
    pub committed_date: NaiveDate,
    pub actor: Actor,
    pub reason_code: Option<String>,
    pub note: Option<String>,
    pub notification_channel: Option<String>,
    pub reason_codes: ActiveReasonCodes,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClassifyPromiseMiss. `occurred_at` is also the "now" the miss is judged against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyPromiseMiss {
    pub miss_reason_code: String,
    pub actor: Actor,
    pub note: Option<String>,
    pub miss_reason_codes: ActiveReasonCodes,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordNotification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordNotification {
    pub reason_code: String,
    pub channel: String,
    pub actor: Actor,
    pub note: Option<String>,
    pub reason_codes: ActiveReasonCodes,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitInvoice {
    pub review: InvoiceReview,
    pub attachments: AttachmentDecision,
    pub correlation_id: String,
    pub channel: String,
    pub submitted_by: Actor,
    pub review_completed_by: EmpNo,
    pub guardrail_override: bool,
    pub role_grant: RoleGrant,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordStagingResult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStagingResult {
    pub correlation_id: String,
    pub outcome: StagingOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    AddLine(AddLine),
    AdvanceStatus(AdvanceStatus),
    ApplyHold(ApplyHold),
    ClearHold(ClearHold),
    UpsertCommitment(UpsertCommitment),
    ClassifyPromiseMiss(ClassifyPromiseMiss),
    RecordNotification(RecordNotification),
    SubmitInvoice(SubmitInvoice),
    RecordStagingResult(RecordStagingResult),
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub site_id: SiteId,
    pub order_priority: Option<i32>,
    pub ship_via: Option<String>,
    pub requested_date: Option<NaiveDate>,
    pub created_by: ActorStamp,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub line_no: u32,
    pub item_id: ItemId,
    pub item_type: Option<String>,
    pub quantity: i64,
    pub added_by: ActorStamp,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LifecycleAdvanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleAdvanced {
    pub from: OrderLifecycleStatus,
    pub to: OrderLifecycleStatus,
    pub actor: ActorStamp,
    pub decision_key: String,
    pub reason_code: Option<String>,
    pub note: Option<String>,
    pub guided_override: bool,
    pub guardrail_override: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RouteInstanceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInstanceCreated {
    pub line_no: u32,
    pub route: RouteInstance,
    pub occurred_at: DateTime<Utc>,
}

/// Event: HoldApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldApplied {
    pub overlay: HoldOverlay,
}

/// Event: HoldCleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldCleared {
    pub overlay_type: HoldOverlayType,
    pub reason_code: String,
    pub cleared_by: ActorStamp,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSubmitted {
    pub correlation_id: String,
    pub channel: String,
    pub submitted_by: ActorStamp,
    pub review_completed_by: EmpNo,
    pub review: InvoiceReview,
    pub attachments: AttachmentDecision,
    pub guardrail_override: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceStagingRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStagingRecorded {
    pub correlation_id: String,
    pub outcome: StagingOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    LineAdded(LineAdded),
    LifecycleAdvanced(LifecycleAdvanced),
    RouteInstanceCreated(RouteInstanceCreated),
    HoldApplied(HoldApplied),
    HoldCleared(HoldCleared),
    PromiseChanged(PromiseChangeEvent),
    InvoiceSubmitted(InvoiceSubmitted),
    InvoiceStagingRecorded(InvoiceStagingRecorded),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::LineAdded(_) => "orders.order.line_added",
            OrderEvent::LifecycleAdvanced(_) => "orders.order.lifecycle_advanced",
            OrderEvent::RouteInstanceCreated(_) => "orders.order.route_instance_created",
            OrderEvent::HoldApplied(_) => "orders.hold.applied",
            OrderEvent::HoldCleared(_) => "orders.hold.cleared",
            OrderEvent::PromiseChanged(e) => match e.kind {
                PromiseChangeKind::CommitmentSet => "orders.promise.commitment_set",
                PromiseChangeKind::MissClassified => "orders.promise.miss_classified",
                PromiseChangeKind::CustomerNotified => "orders.promise.customer_notified",
            },
            OrderEvent::InvoiceSubmitted(_) => "orders.invoice.submitted",
            OrderEvent::InvoiceStagingRecorded(_) => "orders.invoice.staging_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::LineAdded(e) => e.occurred_at,
            OrderEvent::LifecycleAdvanced(e) => e.occurred_at,
            OrderEvent::RouteInstanceCreated(e) => e.occurred_at,
            OrderEvent::HoldApplied(e) => e.overlay.applied_at,
            OrderEvent::HoldCleared(e) => e.occurred_at,
            OrderEvent::PromiseChanged(e) => e.occurred_at,
            OrderEvent::InvoiceSubmitted(e) => e.occurred_at,
            OrderEvent::InvoiceStagingRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = WorkflowError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.customer_id = e.customer_id;
                self.site_id = e.site_id;
                self.order_priority = e.order_priority;
                self.ship_via = e.ship_via.clone();
                self.promise.requested_date = e.requested_date;
                self.lifecycle = OrderLifecycleStatus::Draft;
                self.created = true;
            }
            OrderEvent::LineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    item_id: e.item_id,
                    item_type: e.item_type.clone(),
                    quantity: e.quantity,
                    route: None,
                });
            }
            OrderEvent::LifecycleAdvanced(e) => {
                self.lifecycle = e.to;
                self.status_stamp = Some(StatusStamp {
                    updated_at: e.occurred_at,
                    updated_by: e.actor.emp_no.clone(),
                    owner_role: e.actor.role.clone(),
                    reason_code: e.reason_code.clone(),
                    note: e.note.clone(),
                });
            }
            OrderEvent::RouteInstanceCreated(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.route = Some(e.route.clone());
                }
            }
            OrderEvent::HoldApplied(e) => {
                self.hold = Some(e.overlay.clone());
            }
            OrderEvent::HoldCleared(_) => {
                self.hold = None;
            }
            OrderEvent::PromiseChanged(e) => {
                self.promise.record(e);
            }
            OrderEvent::InvoiceSubmitted(e) => {
                self.lifecycle = OrderLifecycleStatus::InvoiceSubmitted;
                self.status_stamp = Some(StatusStamp {
                    updated_at: e.occurred_at,
                    updated_by: e.submitted_by.emp_no.clone(),
                    owner_role: e.submitted_by.role.clone(),
                    reason_code: None,
                    note: None,
                });
                self.invoice = Some(InvoiceSubmission {
                    requested_at: e.occurred_at,
                    requested_by: e.submitted_by.emp_no.clone(),
                    channel: e.channel.clone(),
                    correlation_id: e.correlation_id.clone(),
                    review_completed_by: e.review_completed_by.clone(),
                    attachments: e.attachments.clone(),
                    staging_result: InvoiceStagingResult::Pending,
                    staging_error: None,
                    erp_invoice_reference: None,
                });
            }
            OrderEvent::InvoiceStagingRecorded(e) => {
                if let Some(inv) = self.invoice.as_mut() {
                    match &e.outcome {
                        StagingOutcome::Succeeded {
                            erp_invoice_reference,
                        } => {
                            inv.staging_result = InvoiceStagingResult::Succeeded;
                            inv.staging_error = None;
                            inv.erp_invoice_reference = Some(erp_invoice_reference.clone());
                        }
                        StagingOutcome::Failed { message } => {
                            inv.staging_result = InvoiceStagingResult::Failed;
                            inv.staging_error = Some(message.clone());
                        }
                        StagingOutcome::Resent => {
                            inv.staging_result = InvoiceStagingResult::Pending;
                        }
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            OrderCommand::AdvanceStatus(cmd) => self.handle_advance(cmd),
            OrderCommand::ApplyHold(cmd) => self.handle_apply_hold(cmd),
            OrderCommand::ClearHold(cmd) => self.handle_clear_hold(cmd),
            OrderCommand::UpsertCommitment(cmd) => self.handle_upsert_commitment(cmd),
            OrderCommand::ClassifyPromiseMiss(cmd) => self.handle_classify_miss(cmd),
            OrderCommand::RecordNotification(cmd) => self.handle_notification(cmd),
            OrderCommand::SubmitInvoice(cmd) => self.handle_submit_invoice(cmd),
            OrderCommand::RecordStagingResult(cmd) => self.handle_staging_result(cmd),
        }
    }
}

fn non_blank(value: &str, field: &str) -> Result<String, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(WorkflowError::validation(format!("{field} must not be empty")))
    } else {
        Ok(trimmed.to_string())
    }
}

impl Order {
    fn ensure_created(&self) -> Result<(), WorkflowError> {
        if self.created {
            Ok(())
        } else {
            Err(WorkflowError::not_found(format!("order {}", self.id)))
        }
    }

    fn ensure_not_blocked(&self, target: OrderLifecycleStatus) -> Result<(), WorkflowError> {
        match &self.hold {
            Some(hold) => Err(WorkflowError::Blocked {
                overlay: hold.overlay_type.to_string(),
                reason_code: hold.reason_code.clone(),
                target: target.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Role policy for one edge, or the guardrail override instead of it.
    fn ensure_role(
        &self,
        actor: &Actor,
        grant: &RoleGrant,
        guardrail_override: bool,
        to: OrderLifecycleStatus,
    ) -> Result<(), WorkflowError> {
        let expected_key = lifecycle::decision_key(self.lifecycle, to);
        if grant.decision_key != expected_key {
            return Err(WorkflowError::validation(format!(
                "role grant for '{}' does not match edge '{}'",
                grant.decision_key, expected_key
            )));
        }

        if guardrail_override {
            authorize(actor, &Permission::GUARDRAIL_OVERRIDE)?;
            return Ok(());
        }
        grant.check(&actor.role)
    }

    fn ensure_not_terminal(&self, what: &str) -> Result<(), WorkflowError> {
        if self.lifecycle.is_terminal() {
            return Err(WorkflowError::validation(format!(
                "cannot {what} on a {} order",
                self.lifecycle
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, WorkflowError> {
        if self.created {
            return Err(WorkflowError::validation(format!(
                "order {} already exists",
                cmd.order_id
            )));
        }
        if self.id != cmd.order_id {
            return Err(WorkflowError::validation("order_id mismatch"));
        }

        let ship_via = match &cmd.ship_via {
            Some(v) => Some(non_blank(v, "ship_via")?),
            None => None,
        };

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            site_id: cmd.site_id,
            order_priority: cmd.order_priority,
            ship_via,
            requested_date: cmd.requested_date,
            created_by: ActorStamp::from(&cmd.created_by),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;

        if !self.lifecycle.accepts_new_lines() {
            return Err(WorkflowError::validation(format!(
                "cannot add lines to an order in {}",
                self.lifecycle
            )));
        }
        if cmd.quantity <= 0 {
            return Err(WorkflowError::validation("quantity must be positive"));
        }

        let next_line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;

        Ok(vec![OrderEvent::LineAdded(LineAdded {
            line_no: next_line_no,
            item_id: cmd.item_id,
            item_type: cmd.item_type.clone(),
            quantity: cmd.quantity,
            added_by: ActorStamp::from(&cmd.added_by),
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Checks run in a fixed order: adjacency, hold, role, then routing.
    fn handle_advance(&self, cmd: &AdvanceStatus) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;
        let from = self.lifecycle;
        let to = cmd.target;

        let path = lifecycle::check_advance(from, to, cmd.guided_override)?;
        match path {
            TransitionPath::Skip => authorize(&cmd.actor, &Permission::GUIDED_OVERRIDE)?,
            TransitionPath::Direct(rule) => {
                if rule.gate == TransitionGate::ErpReference && !self.has_erp_reference() {
                    return Err(WorkflowError::invalid_transition(
                        from,
                        to,
                        "ERP invoice reference has not been recorded",
                    ));
                }
            }
        }

        self.ensure_not_blocked(to)?;
        self.ensure_role(&cmd.actor, &cmd.role_grant, cmd.guardrail_override, to)?;

        let routes = self.collect_routes(cmd)?;

        let mut events = Vec::with_capacity(1 + routes.len());
        events.push(OrderEvent::LifecycleAdvanced(LifecycleAdvanced {
            from,
            to,
            actor: ActorStamp::from(&cmd.actor),
            decision_key: cmd.role_grant.decision_key.clone(),
            reason_code: cmd.reason_code.clone(),
            note: cmd.note.clone(),
            guided_override: path == TransitionPath::Skip,
            guardrail_override: cmd.guardrail_override,
            occurred_at: cmd.occurred_at,
        }));
        events.extend(routes.into_iter().map(|(line_no, route)| {
            OrderEvent::RouteInstanceCreated(RouteInstanceCreated {
                line_no,
                route,
                occurred_at: cmd.occurred_at,
            })
        }));
        Ok(events)
    }

    fn has_erp_reference(&self) -> bool {
        self.invoice
            .as_ref()
            .is_some_and(|inv| inv.erp_invoice_reference.is_some())
    }

    /// One route per unrouted line; any failed line rejects the whole transition.
    fn collect_routes(&self, cmd: &AdvanceStatus) -> Result<Vec<(u32, RouteInstance)>, WorkflowError> {
        let mut routes = Vec::with_capacity(cmd.route_outcomes.len());
        for outcome in &cmd.route_outcomes {
            let line = self
                .lines
                .iter()
                .find(|l| l.line_no == outcome.line_no)
                .ok_or_else(|| {
                    WorkflowError::validation(format!("order has no line {}", outcome.line_no))
                })?;
            if line.route.is_some() {
                return Err(WorkflowError::validation(format!(
                    "line {} already has a route instance",
                    line.line_no
                )));
            }
            match &outcome.outcome {
                Ok(route) => routes.push((line.line_no, route.clone())),
                Err(err) => return Err(err.clone().for_line(line.line_no)),
            }
        }

        if cmd.requires_routing {
            if let Some(line) = self
                .unrouted_lines()
                .find(|l| !routes.iter().any(|(n, _)| *n == l.line_no))
            {
                return Err(WorkflowError::validation(format!(
                    "line {} was not resolved to a route",
                    line.line_no
                )));
            }
        }
        Ok(routes)
    }

    fn handle_apply_hold(&self, cmd: &ApplyHold) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;
        self.ensure_not_terminal("apply a hold")?;

        if let Some(active) = &self.hold {
            return Err(WorkflowError::AlreadyOnHold {
                overlay: active.overlay_type.to_string(),
                reason_code: active.reason_code.clone(),
            });
        }
        let reason_code = non_blank(&cmd.reason_code, "reason_code")?;

        Ok(vec![OrderEvent::HoldApplied(HoldApplied {
            overlay: HoldOverlay {
                overlay_type: cmd.overlay_type,
                reason_code,
                applied_by: ActorStamp::from(&cmd.actor),
                applied_at: cmd.occurred_at,
                note: cmd.note.clone(),
                contact_retry: cmd.contact_retry.clone(),
            },
        })])
    }

    fn handle_clear_hold(&self, cmd: &ClearHold) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;
        let active = self.hold.as_ref().ok_or(WorkflowError::NoActiveHold)?;

        Ok(vec![OrderEvent::HoldCleared(HoldCleared {
            overlay_type: active.overlay_type,
            reason_code: active.reason_code.clone(),
            cleared_by: ActorStamp::from(&cmd.actor),
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_upsert_commitment(
        &self,
        cmd: &UpsertCommitment,
    ) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;
        self.ensure_not_terminal("change the promise date")?;

        let reason_code = match &cmd.reason_code {
            Some(code) => Some(cmd.reason_codes.check(code)?),
            None => None,
        };

        Ok(vec![OrderEvent::PromiseChanged(PromiseChangeEvent {
            kind: PromiseChangeKind::CommitmentSet,
            old_committed_date: self.promise.current_committed_date,
            new_committed_date: Some(cmd.committed_date),
            requested_date: cmd.requested_date,
            reason_code,
            note: cmd.note.clone(),
            actor: ActorStamp::from(&cmd.actor),
            notification_channel: cmd.notification_channel.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_classify_miss(
        &self,
        cmd: &ClassifyPromiseMiss,
    ) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;

        let committed = self
            .promise
            .current_committed_date
            .ok_or_else(|| WorkflowError::PromiseNotMissed {
                reason: "order has no committed date".to_string(),
            })?;
        if committed >= cmd.occurred_at.date_naive() {
            return Err(WorkflowError::PromiseNotMissed {
                reason: format!("committed date {committed} has not passed"),
            });
        }
        if self.lifecycle.is_fulfilled() {
            return Err(WorkflowError::PromiseNotMissed {
                reason: format!("order is already {}", self.lifecycle),
            });
        }

        let code = cmd.miss_reason_codes.check(&cmd.miss_reason_code)?;

        Ok(vec![OrderEvent::PromiseChanged(PromiseChangeEvent {
            kind: PromiseChangeKind::MissClassified,
            old_committed_date: Some(committed),
            new_committed_date: Some(committed),
            requested_date: None,
            reason_code: Some(code),
            note: cmd.note.clone(),
            actor: ActorStamp::from(&cmd.actor),
            notification_channel: None,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_notification(
        &self,
        cmd: &RecordNotification,
    ) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;
        let code = cmd.reason_codes.check(&cmd.reason_code)?;
        let channel = non_blank(&cmd.channel, "channel")?;

        let current = self.promise.current_committed_date;
        Ok(vec![OrderEvent::PromiseChanged(PromiseChangeEvent {
            kind: PromiseChangeKind::CustomerNotified,
            old_committed_date: current,
            new_committed_date: current,
            requested_date: None,
            reason_code: Some(code),
            note: cmd.note.clone(),
            actor: ActorStamp::from(&cmd.actor),
            notification_channel: Some(channel),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit_invoice(&self, cmd: &SubmitInvoice) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;
        let target = OrderLifecycleStatus::InvoiceSubmitted;

        if self.lifecycle != OrderLifecycleStatus::InvoiceReady {
            return Err(WorkflowError::invalid_transition(
                self.lifecycle,
                target,
                "invoice submission starts from invoice_ready",
            ));
        }
        self.ensure_not_blocked(target)?;
        self.ensure_role(&cmd.submitted_by, &cmd.role_grant, cmd.guardrail_override, target)?;

        let missing = cmd.review.missing();
        if !missing.is_empty() {
            return Err(WorkflowError::ReviewIncomplete { missing });
        }
        cmd.attachments.validate()?;

        let correlation_id = non_blank(&cmd.correlation_id, "correlation_id")?;
        let channel = non_blank(&cmd.channel, "channel")?;

        Ok(vec![OrderEvent::InvoiceSubmitted(InvoiceSubmitted {
            correlation_id,
            channel,
            submitted_by: ActorStamp::from(&cmd.submitted_by),
            review_completed_by: cmd.review_completed_by.clone(),
            review: cmd.review,
            attachments: cmd.attachments.clone(),
            guardrail_override: cmd.guardrail_override,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_staging_result(
        &self,
        cmd: &RecordStagingResult,
    ) -> Result<Vec<OrderEvent>, WorkflowError> {
        self.ensure_created()?;
        let inv = self
            .invoice
            .as_ref()
            .ok_or_else(|| WorkflowError::validation("order has no invoice submission"))?;

        if inv.correlation_id != cmd.correlation_id.trim() {
            return Err(WorkflowError::validation(format!(
                "correlation id '{}' does not match submission '{}'",
                cmd.correlation_id, inv.correlation_id
            )));
        }
        if inv.staging_result == InvoiceStagingResult::Succeeded {
            return Err(WorkflowError::validation("invoice staging already succeeded"));
        }

        let outcome = match &cmd.outcome {
            StagingOutcome::Succeeded {
                erp_invoice_reference,
            } => StagingOutcome::Succeeded {
                erp_invoice_reference: non_blank(erp_invoice_reference, "erp_invoice_reference")?,
            },
            StagingOutcome::Failed { message } => StagingOutcome::Failed {
                message: message.clone(),
            },
            StagingOutcome::Resent => {
                if inv.staging_result != InvoiceStagingResult::Failed {
                    return Err(WorkflowError::validation(
                        "staging can only be retried after a failure",
                    ));
                }
                StagingOutcome::Resent
            }
        };

        Ok(vec![OrderEvent::InvoiceStagingRecorded(InvoiceStagingRecorded {
            correlation_id: inv.correlation_id.clone(),
            outcome,
            occurred_at: cmd.occurred_at,
        })])
    }
}
