//! Workflow orchestrator.
//!
//! Every order operation follows the same path: load the order stream, resolve
//! the policy facts and route outcomes the command needs against that loaded
//! state, let the aggregate decide, append at the loaded version, publish, and
//! fold the published envelopes into the order views and the audit trail.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use orderflow_auth::{Actor, EmpNo, Role};
use orderflow_core::{
    AggregateId, AggregateRoot, CustomerId, ExpectedVersion, ItemId, OrderId, SiteId,
    WorkflowError,
};
use orderflow_events::{EventBus, EventEnvelope, Subscription};
use orderflow_orders::{
    AddLine, AdvanceStatus, ApplyHold, AttachmentDecision, ClassifyPromiseMiss, ClearHold,
    ContactRetry, CreateOrder, HoldOverlayType, InvoiceReview, InvoiceStagingResult,
    ORDER_AGGREGATE_TYPE, Order, OrderCommand, OrderLifecycleStatus, PROMISE_MISS_REASON_CODES_KEY,
    PROMISE_REASON_CODES_KEY, RecordNotification, RecordStagingResult, StagingOutcome,
    StagingTicket, SubmitInvoice, UpsertCommitment, decision_key,
};
use orderflow_policy::{DecisionPolicyEntry, DecisionSignoff, PolicyContext, PolicyScope, ResolvedPolicy};
use orderflow_routing::{
    RouteQuery, RouteRuleSimulation, RouteTemplate, RouteTemplateAssignment,
};

use super::policy::{PolicyActivation, PolicyService};
use super::routing::RouteCatalogService;
use super::{Dispatcher, EnvelopeBus};
use crate::command_dispatcher::{DispatchError, Loaded};
use crate::config::{OrderflowConfig, WorkflowConfig};
use crate::erp::ErpChannel;
use crate::event_store::EventStore;
use crate::projections::{AuditRecord, AuditTrailProjection, OrderView, OrderViewsProjection};
use crate::read_model::InMemoryReadModelStore;

/// Reloads allowed for an append that only needs the latest version.
const LATEST_APPEND_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderRequest {
    #[serde(default)]
    pub order_id: Option<OrderId>,
    pub customer_id: CustomerId,
    pub site_id: SiteId,
    #[serde(default)]
    pub order_priority: Option<i32>,
    #[serde(default)]
    pub ship_via: Option<String>,
    #[serde(default)]
    pub requested_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub item_id: ItemId,
    #[serde(default)]
    pub item_type: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceRequest {
    pub target: OrderLifecycleStatus,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub guided_override: bool,
    #[serde(default)]
    pub guardrail_override: bool,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRequest {
    pub overlay_type: HoldOverlayType,
    pub reason_code: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub contact_retry: Option<ContactRetry>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRequest {
    #[serde(default)]
    pub requested_date: Option<NaiveDate>,
    pub committed_date: NaiveDate,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub notification_channel: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissRequest {
    pub miss_reason_code: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub reason_code: String,
    pub channel: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub review: InvoiceReview,
    #[serde(default)]
    pub attachments: AttachmentDecision,
    /// Generated when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub channel: String,
    pub review_completed_by: EmpNo,
    #[serde(default)]
    pub guardrail_override: bool,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceSubmissionOutcome {
    pub order: OrderView,
    pub ticket: StagingTicket,
}

type Views = OrderViewsProjection<InMemoryReadModelStore<OrderId, OrderView>>;

pub struct WorkflowService {
    dispatcher: Arc<Dispatcher>,
    policy: PolicyService,
    routes: RouteCatalogService,
    erp: Arc<dyn ErpChannel>,
    config: WorkflowConfig,
    views: Views,
    audit: AuditTrailProjection,
    feed: Mutex<Subscription<EventEnvelope<JsonValue>>>,
}

impl WorkflowService {
    /// Wire the service over `store` and rebuild the read side from it.
    pub fn new(
        config: &OrderflowConfig,
        store: Arc<dyn EventStore>,
        erp: Arc<dyn ErpChannel>,
    ) -> Result<Self, DispatchError> {
        let bus = Arc::new(EnvelopeBus::new());
        let feed = bus.subscribe();
        let dispatcher = Arc::new(Dispatcher::new(store, bus));

        let service = Self {
            policy: PolicyService::new(Arc::clone(&dispatcher), &config.policy.required_signoff_roles),
            routes: RouteCatalogService::new(),
            dispatcher,
            erp,
            config: config.workflow.clone(),
            views: OrderViewsProjection::new(InMemoryReadModelStore::new()),
            audit: AuditTrailProjection::new(),
            feed: Mutex::new(feed),
        };
        service.rebuild_projections()?;
        Ok(service)
    }

    pub fn policy(&self) -> &PolicyService {
        &self.policy
    }

    pub fn routes(&self) -> &RouteCatalogService {
        &self.routes
    }

    /// Replay the whole store into fresh order views and audit trail.
    pub fn rebuild_projections(&self) -> Result<(), DispatchError> {
        // Anything already buffered is contained in the replay.
        self.feed.lock().unwrap_or_else(PoisonError::into_inner).drain();

        let envelopes: Vec<_> = self
            .dispatcher
            .store()
            .load_all()?
            .iter()
            .map(|e| e.to_envelope())
            .collect();

        self.views
            .rebuild_from_scratch(envelopes.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        self.audit.rebuild_from_scratch(envelopes);
        Ok(())
    }

    /// Fold newly published envelopes into the read side.
    fn sync_projections(&self) {
        let pending = self.feed.lock().unwrap_or_else(PoisonError::into_inner).drain();
        for env in &pending {
            if let Err(err) = self.views.apply_envelope(env) {
                warn!(aggregate_id = %env.aggregate_id(), seq = env.sequence_number(), error = %err, "order view projection failed");
            }
            self.audit.apply_envelope(env);
        }
    }

    fn load_order(&self, order_id: OrderId) -> Result<Loaded<Order>, DispatchError> {
        self.dispatcher
            .load(order_id.aggregate_id(), |id: AggregateId| Order::empty(OrderId::from(id)))
    }

    /// Load, check existence and the caller's expected version, build the
    /// command from the loaded state, then execute at that version.
    fn mutate(
        &self,
        order_id: OrderId,
        expected_version: Option<u64>,
        operation: &'static str,
        build: impl FnOnce(&Order) -> Result<OrderCommand, DispatchError>,
    ) -> Result<Order, DispatchError> {
        let result = self.try_mutate(order_id, expected_version, build);
        self.sync_projections();

        match &result {
            Ok(order) => info!(%order_id, operation, version = order.version(), "order updated"),
            Err(DispatchError::Workflow(err)) => {
                info!(%order_id, operation, code = err.code(), error = %err, "order command rejected")
            }
            Err(err) => warn!(%order_id, operation, error = %err, "order command failed"),
        }
        result
    }

    /// Append at whatever version the order is at, reloading when another
    /// writer lands between load and append.
    fn mutate_latest(
        &self,
        order_id: OrderId,
        operation: &'static str,
        build: impl Fn(&Order) -> Result<OrderCommand, DispatchError>,
    ) -> Result<Order, DispatchError> {
        let mut attempt = 1;
        loop {
            match self.mutate(order_id, None, operation, &build) {
                Err(DispatchError::Workflow(WorkflowError::ConcurrentModification(_)))
                    if attempt < LATEST_APPEND_ATTEMPTS =>
                {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn try_mutate(
        &self,
        order_id: OrderId,
        expected_version: Option<u64>,
        build: impl FnOnce(&Order) -> Result<OrderCommand, DispatchError>,
    ) -> Result<Order, DispatchError> {
        let loaded = self.load_order(order_id)?;
        if !loaded.aggregate.is_created() {
            return Err(WorkflowError::not_found(format!("order {order_id}")).into());
        }
        ExpectedVersion::from(expected_version).check(loaded.version)?;

        let command = build(&loaded.aggregate)?;
        let dispatched =
            self.dispatcher
                .execute(loaded, order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, &command)?;
        Ok(dispatched.aggregate)
    }

    fn view_of(&self, order: &Order) -> OrderView {
        self.views
            .get(&order.order_id())
            .filter(|v| v.version == order.version())
            .unwrap_or_else(|| OrderView::from(order))
    }

    fn context_of(order: &Order) -> PolicyContext {
        PolicyContext::new(order.site_id(), order.customer_id())
    }

    pub fn get_order(&self, order_id: OrderId) -> Result<OrderView, DispatchError> {
        if let Some(view) = self.views.get(&order_id) {
            return Ok(view);
        }
        let loaded = self.load_order(order_id)?;
        if !loaded.aggregate.is_created() {
            return Err(WorkflowError::not_found(format!("order {order_id}")).into());
        }
        Ok(OrderView::from(&loaded.aggregate))
    }

    pub fn list_orders(&self) -> Vec<OrderView> {
        self.views.list()
    }

    pub fn audit_trail(&self, order_id: OrderId) -> Vec<AuditRecord> {
        self.audit.for_aggregate(order_id.aggregate_id())
    }

    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.audit.all()
    }

    pub fn create_order(
        &self,
        actor: &Actor,
        request: NewOrderRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order_id = request.order_id.unwrap_or_default();
        let command = OrderCommand::CreateOrder(CreateOrder {
            order_id,
            customer_id: request.customer_id,
            site_id: request.site_id,
            order_priority: request.order_priority,
            ship_via: request.ship_via,
            requested_date: request.requested_date,
            created_by: actor.clone(),
            occurred_at: now,
        });

        let loaded = self.load_order(order_id)?;
        let result =
            self.dispatcher
                .execute(loaded, order_id.aggregate_id(), ORDER_AGGREGATE_TYPE, &command);
        self.sync_projections();

        let order = result?.aggregate;
        info!(%order_id, customer_id = %order.customer_id(), site_id = %order.site_id(), "order created");
        Ok(self.view_of(&order))
    }

    pub fn add_line(
        &self,
        actor: &Actor,
        order_id: OrderId,
        request: LineRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, request.expected_version, "add_line", |_| {
            Ok(OrderCommand::AddLine(AddLine {
                item_id: request.item_id,
                item_type: request.item_type,
                quantity: request.quantity,
                added_by: actor.clone(),
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    pub fn advance_status(
        &self,
        actor: &Actor,
        order_id: OrderId,
        request: AdvanceRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, request.expected_version, "advance_status", |order| {
            let from = order.lifecycle_status();
            let role_grant = self
                .policy
                .role_grant(&decision_key(from, request.target), &Self::context_of(order))?;

            let requires_routing = self.config.enters_production(from, request.target);
            let route_outcomes = if requires_routing {
                self.routes.resolve_unrouted_lines(order, now)
            } else {
                Vec::new()
            };

            Ok(OrderCommand::AdvanceStatus(AdvanceStatus {
                target: request.target,
                actor: actor.clone(),
                reason_code: request.reason_code,
                note: request.note,
                guided_override: request.guided_override,
                guardrail_override: request.guardrail_override,
                role_grant,
                requires_routing,
                route_outcomes,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    pub fn apply_hold(
        &self,
        actor: &Actor,
        order_id: OrderId,
        request: HoldRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, request.expected_version, "apply_hold", |_| {
            Ok(OrderCommand::ApplyHold(ApplyHold {
                overlay_type: request.overlay_type,
                reason_code: request.reason_code,
                actor: actor.clone(),
                note: request.note,
                contact_retry: request.contact_retry,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    pub fn clear_hold(
        &self,
        actor: &Actor,
        order_id: OrderId,
        note: Option<String>,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, expected_version, "clear_hold", |_| {
            Ok(OrderCommand::ClearHold(ClearHold {
                actor: actor.clone(),
                note,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    pub fn upsert_commitment(
        &self,
        actor: &Actor,
        order_id: OrderId,
        request: CommitmentRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, request.expected_version, "upsert_commitment", |order| {
            let reason_codes = self
                .policy
                .reason_codes(PROMISE_REASON_CODES_KEY, &Self::context_of(order))?;
            Ok(OrderCommand::UpsertCommitment(UpsertCommitment {
                requested_date: request.requested_date,
                committed_date: request.committed_date,
                actor: actor.clone(),
                reason_code: request.reason_code,
                note: request.note,
                notification_channel: request.notification_channel,
                reason_codes,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    pub fn classify_promise_miss(
        &self,
        actor: &Actor,
        order_id: OrderId,
        request: MissRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, request.expected_version, "classify_promise_miss", |order| {
            let miss_reason_codes = self
                .policy
                .reason_codes(PROMISE_MISS_REASON_CODES_KEY, &Self::context_of(order))?;
            Ok(OrderCommand::ClassifyPromiseMiss(ClassifyPromiseMiss {
                miss_reason_code: request.miss_reason_code,
                actor: actor.clone(),
                note: request.note,
                miss_reason_codes,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    pub fn record_notification(
        &self,
        actor: &Actor,
        order_id: OrderId,
        request: NotificationRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, request.expected_version, "record_notification", |order| {
            let reason_codes = self
                .policy
                .reason_codes(PROMISE_REASON_CODES_KEY, &Self::context_of(order))?;
            Ok(OrderCommand::RecordNotification(RecordNotification {
                reason_code: request.reason_code,
                channel: request.channel,
                actor: actor.clone(),
                note: request.note,
                reason_codes,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    /// Submit through the invoice gate, then hand the staging request to the
    /// ERP channel. A channel failure is recorded on the order, not returned.
    pub fn submit_invoice(
        &self,
        actor: &Actor,
        order_id: OrderId,
        request: InvoiceRequest,
        now: DateTime<Utc>,
    ) -> Result<InvoiceSubmissionOutcome, DispatchError> {
        let correlation_id = request
            .correlation_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let mut order = self.mutate(order_id, request.expected_version, "submit_invoice", |order| {
            let role_grant = self.policy.role_grant(
                &decision_key(order.lifecycle_status(), OrderLifecycleStatus::InvoiceSubmitted),
                &Self::context_of(order),
            )?;
            Ok(OrderCommand::SubmitInvoice(SubmitInvoice {
                review: request.review,
                attachments: request.attachments,
                correlation_id: correlation_id.clone(),
                channel: request.channel,
                submitted_by: actor.clone(),
                review_completed_by: request.review_completed_by,
                guardrail_override: request.guardrail_override,
                role_grant,
                occurred_at: now,
            }))
        })?;

        let staging = order
            .staging_request()
            .ok_or_else(|| WorkflowError::validation("order has no invoice submission"))?;
        let ticket = StagingTicket {
            order_id,
            correlation_id: staging.correlation_id.clone(),
            channel: staging.channel.clone(),
            requested_at: staging.requested_at,
        };

        if let Err(err) = self.erp.stage(&staging) {
            warn!(%order_id, correlation_id = %staging.correlation_id, error = %err, "erp staging send failed");
            let recorded = self.mutate_latest(order_id, "record_staging_failure", |_| {
                Ok(OrderCommand::RecordStagingResult(RecordStagingResult {
                    correlation_id: staging.correlation_id.clone(),
                    outcome: StagingOutcome::Failed {
                        message: err.to_string(),
                    },
                    occurred_at: now,
                }))
            });
            match recorded {
                Ok(updated) => order = updated,
                Err(record_err) => {
                    warn!(%order_id, correlation_id = %staging.correlation_id, error = %record_err, "staging failure not recorded");
                }
            }
        } else {
            info!(%order_id, correlation_id = %staging.correlation_id, channel = %staging.channel, "erp staging requested");
        }

        Ok(InvoiceSubmissionOutcome {
            order: self.view_of(&order),
            ticket,
        })
    }

    /// Record the asynchronous staging result reported by the ERP side.
    pub fn reconcile_staging(
        &self,
        order_id: OrderId,
        correlation_id: &str,
        outcome: StagingOutcome,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let order = self.mutate(order_id, None, "reconcile_staging", |_| {
            if matches!(outcome, StagingOutcome::Resent) {
                return Err(WorkflowError::validation("reconciliation reports a result, not a resend").into());
            }
            Ok(OrderCommand::RecordStagingResult(RecordStagingResult {
                correlation_id: correlation_id.to_string(),
                outcome,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    /// Resend the staging request with the same correlation id after a failure.
    pub fn retry_staging(
        &self,
        actor: &Actor,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<OrderView, DispatchError> {
        let loaded = self.load_order(order_id)?;
        if !loaded.aggregate.is_created() {
            return Err(WorkflowError::not_found(format!("order {order_id}")).into());
        }
        let staging = loaded
            .aggregate
            .staging_request()
            .ok_or_else(|| WorkflowError::validation("order has no invoice submission"))?;
        let last = loaded.aggregate.invoice().map(|inv| inv.staging_result);
        if last != Some(InvoiceStagingResult::Failed) {
            return Err(WorkflowError::validation("staging can only be retried after a failure").into());
        }

        self.erp.stage(&staging).map_err(|err| {
            warn!(%order_id, correlation_id = %staging.correlation_id, error = %err, "erp staging retry failed");
            WorkflowError::ErpStagingFailed {
                correlation_id: staging.correlation_id.clone(),
                message: err.to_string(),
            }
        })?;

        info!(%order_id, correlation_id = %staging.correlation_id, emp_no = %actor.emp_no, "erp staging resent");
        let order = self.mutate_latest(order_id, "retry_staging", |_| {
            Ok(OrderCommand::RecordStagingResult(RecordStagingResult {
                correlation_id: staging.correlation_id.clone(),
                outcome: StagingOutcome::Resent,
                occurred_at: now,
            }))
        })?;
        Ok(self.view_of(&order))
    }

    pub fn simulate_route(&self, query: &RouteQuery, now: DateTime<Utc>) -> RouteRuleSimulation {
        self.routes.simulate(query, now)
    }

    pub fn upsert_template(&self, template: RouteTemplate) -> Result<Option<RouteTemplate>, DispatchError> {
        Ok(self.routes.upsert_template(template)?)
    }

    pub fn upsert_assignment(
        &self,
        assignment: RouteTemplateAssignment,
    ) -> Result<Option<RouteTemplateAssignment>, DispatchError> {
        Ok(self.routes.upsert_assignment(assignment)?)
    }

    pub fn upsert_policy(
        &self,
        actor: &Actor,
        decision_key: &str,
        version: u32,
        scope: PolicyScope,
        value: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<DecisionPolicyEntry, DispatchError> {
        let result = self.policy.upsert(actor, decision_key, version, scope, value, now);
        self.sync_projections();
        result
    }

    pub fn add_signoff(
        &self,
        actor: &Actor,
        version: u32,
        function_role: Role,
        now: DateTime<Utc>,
    ) -> Result<Vec<DecisionSignoff>, DispatchError> {
        let result = self.policy.add_signoff(actor, version, function_role, now);
        self.sync_projections();
        result
    }

    pub fn activate_policy(
        &self,
        actor: &Actor,
        version: u32,
        now: DateTime<Utc>,
    ) -> Result<PolicyActivation, DispatchError> {
        let result = self.policy.activate(actor, version, now);
        self.sync_projections();
        result
    }

    pub fn lookup_policy(
        &self,
        decision_key: &str,
        ctx: &PolicyContext,
    ) -> Result<Option<ResolvedPolicy>, DispatchError> {
        self.policy.lookup(decision_key, ctx)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use orderflow_orders::{OrderStatus, OrderLifecycleStatus as S};
    use orderflow_routing::{
        CaptureRequirements, RouteAssignmentId, RouteTemplateId, RouteTemplateStep, ScopePredicate,
    };

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Barrier, OnceLock, Weak};

    use orderflow_auth::Permission;
    use orderflow_orders::ErpStagingRequest;

    use super::*;
    use crate::erp::{ErpChannelError, InMemoryErpChannel};
    use crate::event_store::InMemoryEventStore;

    struct Harness {
        svc: WorkflowService,
        erp: Arc<InMemoryErpChannel>,
        store: Arc<InMemoryEventStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let erp = Arc::new(InMemoryErpChannel::new());
        let svc = WorkflowService::new(
            &OrderflowConfig::default(),
            store.clone() as Arc<dyn EventStore>,
            erp.clone() as Arc<dyn ErpChannel>,
        )
        .unwrap();
        Harness { svc, erp, store }
    }

    fn office() -> Actor {
        Actor::new("E100", Role::new("Office"))
    }

    fn seed_policy(svc: &WorkflowService) {
        let now = Utc::now();
        let admin = office();
        for from_to in orderflow_orders::TRANSITIONS {
            svc.upsert_policy(
                &admin,
                &decision_key(from_to.from, from_to.to),
                1,
                PolicyScope::global(),
                json!(["Office"]),
                now,
            )
            .unwrap();
        }
        svc.upsert_policy(&admin, PROMISE_REASON_CODES_KEY, 1, PolicyScope::global(), json!(["SUPPLIER_DELAY"]), now)
            .unwrap();
        for role in ["Office", "Production", "Quality"] {
            svc.add_signoff(&admin, 1, Role::new(role), now).unwrap();
        }
        svc.activate_policy(&admin, 1, now).unwrap();
    }

    fn seed_routes(svc: &WorkflowService) {
        svc.upsert_template(RouteTemplate {
            id: RouteTemplateId(1),
            code: "STD".to_string(),
            name: "Standard".to_string(),
            steps: vec![RouteTemplateStep {
                sequence: 10,
                name: "weld".to_string(),
                work_center: "WELD".to_string(),
                captures: CaptureRequirements::default(),
            }],
        })
        .unwrap();
        svc.upsert_assignment(RouteTemplateAssignment {
            id: RouteAssignmentId(1),
            predicates: vec![ScopePredicate::Item(ItemId(10))],
            priority: 0,
            revision_no: 1,
            is_active: true,
            effective_from: None,
            effective_to: None,
            route_template_id: RouteTemplateId(1),
        })
        .unwrap();
    }

    fn new_order(svc: &WorkflowService, items: &[i64]) -> OrderId {
        let view = svc
            .create_order(
                &office(),
                NewOrderRequest {
                    order_id: None,
                    customer_id: CustomerId(5),
                    site_id: SiteId(1),
                    order_priority: Some(3),
                    ship_via: None,
                    requested_date: None,
                },
                Utc::now(),
            )
            .unwrap();
        for item in items {
            svc.add_line(
                &office(),
                view.order_id,
                LineRequest {
                    item_id: ItemId(*item),
                    item_type: None,
                    quantity: 1,
                    expected_version: None,
                },
                Utc::now(),
            )
            .unwrap();
        }
        view.order_id
    }

    fn advance(svc: &WorkflowService, order_id: OrderId, target: S) -> Result<OrderView, DispatchError> {
        svc.advance_status(
            &office(),
            order_id,
            AdvanceRequest {
                target,
                reason_code: None,
                note: None,
                guided_override: false,
                guardrail_override: false,
                expected_version: None,
            },
            Utc::now(),
        )
    }

    fn code(err: &DispatchError) -> &'static str {
        err.as_workflow().map(WorkflowError::code).unwrap_or("infra")
    }

    fn walk(svc: &WorkflowService, order_id: OrderId, path: &[S]) {
        for target in path {
            advance(svc, order_id, *target).unwrap();
        }
    }

    fn invoice_request() -> InvoiceRequest {
        InvoiceRequest {
            review: InvoiceReview::all_confirmed(),
            attachments: AttachmentDecision::default(),
            correlation_id: Some("corr-1".to_string()),
            channel: "edi".to_string(),
            review_completed_by: EmpNo::new("E200"),
            guardrail_override: false,
            expected_version: None,
        }
    }

    const TO_INVOICE_READY: [S; 7] = [
        S::InboundLogisticsPlanned,
        S::Received,
        S::InProduction,
        S::ProductionComplete,
        S::ReadyToShip,
        S::Shipped,
        S::InvoiceReady,
    ];

    #[test]
    fn office_moves_draft_order_and_audit_records_it() {
        let h = harness();
        seed_policy(&h.svc);
        let order_id = new_order(&h.svc, &[]);

        let view = advance(&h.svc, order_id, S::InboundLogisticsPlanned).unwrap();

        assert_eq!(view.lifecycle_status, S::InboundLogisticsPlanned);
        assert_eq!(view.promise.revision_count, 0);
        let trail = h.svc.audit_trail(order_id);
        assert_eq!(trail.last().unwrap().event_type, "orders.order.lifecycle_advanced");
        assert_eq!(trail.last().unwrap().actor.as_ref().unwrap().emp_no, "E100");
    }

    #[test]
    fn unpublished_policy_blocks_everyone() {
        let h = harness();
        let order_id = new_order(&h.svc, &[]);

        let err = advance(&h.svc, order_id, S::InboundLogisticsPlanned).unwrap_err();
        assert_eq!(code(&err), "role_not_authorized");
        assert_eq!(h.svc.audit_trail(order_id).len(), 1);
    }

    #[test]
    fn stale_expected_version_is_a_concurrent_modification() {
        let h = harness();
        seed_policy(&h.svc);
        let order_id = new_order(&h.svc, &[]);
        let stale = h.svc.get_order(order_id).unwrap().version;
        advance(&h.svc, order_id, S::InboundLogisticsPlanned).unwrap();

        let err = h
            .svc
            .advance_status(
                &office(),
                order_id,
                AdvanceRequest {
                    target: S::Received,
                    reason_code: None,
                    note: None,
                    guided_override: false,
                    guardrail_override: false,
                    expected_version: Some(stale),
                },
                Utc::now(),
            )
            .unwrap_err();

        assert_eq!(code(&err), "concurrent_modification");
        assert_eq!(h.svc.get_order(order_id).unwrap().lifecycle_status, S::InboundLogisticsPlanned);
    }

    #[test]
    fn entering_production_creates_route_instances_in_the_same_append() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10, 10]);
        walk(&h.svc, order_id, &[S::InboundLogisticsPlanned, S::Received]);
        let before = h.store.load_stream(order_id.aggregate_id()).unwrap().len();

        let view = advance(&h.svc, order_id, S::InProduction).unwrap();

        assert!(view.lines.iter().all(|l| l.route.is_some()));
        assert_eq!(view.status, OrderStatus::InProduction);
        let stream = h.store.load_stream(order_id.aggregate_id()).unwrap();
        assert_eq!(stream.len(), before + 3);
    }

    fn skip_ahead(svc: &WorkflowService, order_id: OrderId, target: S) -> Result<OrderView, DispatchError> {
        let supervisor = Actor::new("E900", Role::new("Supervisor")).with_permission(Permission::new("*"));
        svc.advance_status(
            &supervisor,
            order_id,
            AdvanceRequest {
                target,
                reason_code: None,
                note: Some("expedite".to_string()),
                guided_override: true,
                guardrail_override: true,
                expected_version: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn guided_skip_past_production_still_routes_every_line() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10, 10]);
        walk(&h.svc, order_id, &[S::InboundLogisticsPlanned, S::Received]);

        let view = skip_ahead(&h.svc, order_id, S::ReadyToShip).unwrap();

        assert_eq!(view.lifecycle_status, S::ReadyToShip);
        assert!(view.lines.iter().all(|l| l.route.is_some()));
    }

    #[test]
    fn guided_skip_past_production_rejects_unmatched_line() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10, 99]);
        walk(&h.svc, order_id, &[S::InboundLogisticsPlanned, S::Received]);

        let err = skip_ahead(&h.svc, order_id, S::ReadyToShip).unwrap_err();

        assert_eq!(code(&err), "no_match");
        let view = h.svc.get_order(order_id).unwrap();
        assert_eq!(view.lifecycle_status, S::Received);
        assert!(view.lines.iter().all(|l| l.route.is_none()));
    }

    #[test]
    fn racing_transitions_on_one_version_have_a_single_winner() {
        let h = harness();
        seed_policy(&h.svc);
        let order_id = new_order(&h.svc, &[]);
        let version = h.svc.get_order(order_id).unwrap().version;
        let barrier = Barrier::new(2);

        let results: Vec<Result<OrderView, DispatchError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = [S::InboundLogisticsPlanned, S::Cancelled]
                .into_iter()
                .map(|target| {
                    let (svc, barrier) = (&h.svc, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        svc.advance_status(
                            &office(),
                            order_id,
                            AdvanceRequest {
                                target,
                                reason_code: None,
                                note: None,
                                guided_override: false,
                                guardrail_override: false,
                                expected_version: Some(version),
                            },
                            Utc::now(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(code(loser), "concurrent_modification");
        assert_eq!(h.svc.get_order(order_id).unwrap().version, version + 1);
    }

    #[test]
    fn unmatched_line_rejects_production_entry_with_line_number() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10, 99]);
        walk(&h.svc, order_id, &[S::InboundLogisticsPlanned, S::Received]);

        let err = advance(&h.svc, order_id, S::InProduction).unwrap_err();

        match err.as_workflow() {
            Some(WorkflowError::NoMatch { diagnostic }) => assert!(diagnostic.starts_with("line 2:")),
            other => panic!("unexpected {other:?}"),
        }
        let view = h.svc.get_order(order_id).unwrap();
        assert_eq!(view.lifecycle_status, S::Received);
        assert!(view.lines.iter().all(|l| l.route.is_none()));
    }

    #[test]
    fn credit_hold_blocks_production_entry() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10]);
        walk(&h.svc, order_id, &[S::InboundLogisticsPlanned, S::Received]);
        h.svc
            .apply_hold(
                &office(),
                order_id,
                HoldRequest {
                    overlay_type: HoldOverlayType::CreditHold,
                    reason_code: "CREDIT_LIMIT".to_string(),
                    note: None,
                    contact_retry: None,
                    expected_version: None,
                },
                Utc::now(),
            )
            .unwrap();

        let err = advance(&h.svc, order_id, S::InProduction).unwrap_err();
        assert_eq!(code(&err), "blocked");

        h.svc
            .clear_hold(&office(), order_id, Some("paid".to_string()), None, Utc::now())
            .unwrap();
        advance(&h.svc, order_id, S::InProduction).unwrap();
    }

    #[test]
    fn commitment_requires_active_reason_code() {
        let h = harness();
        seed_policy(&h.svc);
        let order_id = new_order(&h.svc, &[]);
        let request = |code: &str| CommitmentRequest {
            requested_date: None,
            committed_date: NaiveDate::from_ymd_opt(2031, 5, 1).unwrap(),
            reason_code: Some(code.to_string()),
            note: None,
            notification_channel: None,
            expected_version: None,
        };

        let err = h
            .svc
            .upsert_commitment(&office(), order_id, request("WEATHER"), Utc::now())
            .unwrap_err();
        assert_eq!(code(&err), "invalid_reason_code");

        let view = h
            .svc
            .upsert_commitment(&office(), order_id, request("supplier_delay"), Utc::now())
            .unwrap();
        assert_eq!(view.promise.revision_count, 1);
        assert_eq!(view.promise.history[0].reason_code.as_deref(), Some("SUPPLIER_DELAY"));
    }

    #[test]
    fn staging_failure_is_recorded_and_retry_resends() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10]);
        walk(&h.svc, order_id, &TO_INVOICE_READY);
        h.erp.set_failure(Some("ERP offline"));

        let outcome = h
            .svc
            .submit_invoice(&office(), order_id, invoice_request(), Utc::now())
            .unwrap();

        let invoice = outcome.order.invoice.clone().unwrap();
        assert_eq!(outcome.ticket.correlation_id, "corr-1");
        assert_eq!(outcome.order.lifecycle_status, S::InvoiceSubmitted);
        assert_eq!(invoice.staging_result, InvoiceStagingResult::Failed);
        assert_eq!(invoice.requested_by.as_str(), "E100");
        assert!(invoice.staging_error.unwrap().contains("ERP offline"));

        let err = h.svc.retry_staging(&office(), order_id, Utc::now()).unwrap_err();
        assert_eq!(code(&err), "erp_staging_failed");

        h.erp.set_failure(None);
        let view = h.svc.retry_staging(&office(), order_id, Utc::now()).unwrap();
        assert_eq!(view.invoice.unwrap().staging_result, InvoiceStagingResult::Pending);
        assert_eq!(h.erp.sent().len(), 1);
        assert_eq!(h.erp.sent()[0].correlation_id, "corr-1");
    }

    /// Lands one hold on the order while the send is in flight, then fails.
    #[derive(Default)]
    struct InterleavingErp {
        svc: OnceLock<Weak<WorkflowService>>,
        interleaved: AtomicBool,
    }

    impl ErpChannel for InterleavingErp {
        fn stage(&self, request: &ErpStagingRequest) -> Result<(), ErpChannelError> {
            let svc = self.svc.get().and_then(Weak::upgrade);
            if let Some(svc) = svc.filter(|_| !self.interleaved.swap(true, Ordering::SeqCst)) {
                svc.apply_hold(
                    &office(),
                    request.order_id,
                    HoldRequest {
                        overlay_type: HoldOverlayType::CreditHold,
                        reason_code: "CREDIT_LIMIT".to_string(),
                        note: None,
                        contact_retry: None,
                        expected_version: None,
                    },
                    Utc::now(),
                )
                .unwrap();
            }
            Err(ErpChannelError::Unavailable {
                channel: request.channel.clone(),
                message: "ERP offline".to_string(),
            })
        }
    }

    #[test]
    fn staging_failure_is_recorded_after_a_concurrent_write() {
        let erp = Arc::new(InterleavingErp::default());
        let svc = Arc::new(
            WorkflowService::new(
                &OrderflowConfig::default(),
                Arc::new(InMemoryEventStore::new()) as Arc<dyn EventStore>,
                erp.clone() as Arc<dyn ErpChannel>,
            )
            .unwrap(),
        );
        erp.svc.set(Arc::downgrade(&svc)).unwrap();
        seed_policy(&svc);
        seed_routes(&svc);
        let order_id = new_order(&svc, &[10]);
        walk(&svc, order_id, &TO_INVOICE_READY);

        let outcome = svc
            .submit_invoice(&office(), order_id, invoice_request(), Utc::now())
            .unwrap();

        assert_eq!(outcome.order.lifecycle_status, S::InvoiceSubmitted);
        assert!(outcome.order.hold.is_some());
        assert_eq!(
            outcome.order.invoice.unwrap().staging_result,
            InvoiceStagingResult::Failed
        );

        let err = svc.retry_staging(&office(), order_id, Utc::now()).unwrap_err();
        assert_eq!(code(&err), "erp_staging_failed");
        let view = svc.get_order(order_id).unwrap();
        assert_eq!(view.invoice.unwrap().staging_result, InvoiceStagingResult::Failed);
    }

    #[test]
    fn reconciliation_unlocks_invoiced() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10]);
        walk(&h.svc, order_id, &TO_INVOICE_READY);
        h.svc
            .submit_invoice(&office(), order_id, invoice_request(), Utc::now())
            .unwrap();

        let err = h
            .svc
            .reconcile_staging(
                order_id,
                "other",
                StagingOutcome::Succeeded {
                    erp_invoice_reference: "INV-1".to_string(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(code(&err), "validation");

        h.svc
            .reconcile_staging(
                order_id,
                "corr-1",
                StagingOutcome::Succeeded {
                    erp_invoice_reference: "INV-1".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        let view = advance(&h.svc, order_id, S::Invoiced).unwrap();
        assert_eq!(view.status, OrderStatus::Closed);
    }

    #[test]
    fn unconfirmed_pricing_leaves_order_invoice_ready() {
        let h = harness();
        seed_policy(&h.svc);
        seed_routes(&h.svc);
        let order_id = new_order(&h.svc, &[10]);
        walk(&h.svc, order_id, &TO_INVOICE_READY);
        let mut request = invoice_request();
        request.review.pricing = false;

        let err = h
            .svc
            .submit_invoice(&office(), order_id, request, Utc::now())
            .unwrap_err();

        assert_eq!(code(&err), "review_incomplete");
        assert_eq!(h.svc.get_order(order_id).unwrap().lifecycle_status, S::InvoiceReady);
        assert!(h.erp.sent().is_empty());
    }

    #[test]
    fn projections_rebuild_from_the_store() {
        let h = harness();
        seed_policy(&h.svc);
        let order_id = new_order(&h.svc, &[10]);
        advance(&h.svc, order_id, S::InboundLogisticsPlanned).unwrap();
        let before = h.svc.get_order(order_id).unwrap();
        let audit_len = h.svc.audit_log().len();

        let restarted = WorkflowService::new(
            &OrderflowConfig::default(),
            h.store.clone() as Arc<dyn EventStore>,
            h.erp.clone() as Arc<dyn ErpChannel>,
        )
        .unwrap();

        assert_eq!(restarted.get_order(order_id).unwrap(), before);
        assert_eq!(restarted.audit_log().len(), audit_len);
        assert_eq!(before.version, 3);
        assert_eq!(
            restarted
                .lookup_policy(PROMISE_REASON_CODES_KEY, &PolicyContext::global())
                .unwrap()
                .map(|p| p.version),
            Some(1)
        );
    }

    #[test]
    fn unknown_order_is_not_found() {
        let h = harness();
        let err = advance(&h.svc, OrderId::new(), S::Received).unwrap_err();
        assert_eq!(code(&err), "not_found");
    }
}
