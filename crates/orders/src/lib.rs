//! `orderflow-orders`: the order aggregate and its lifecycle rules.
//!
//! Holds, promise dates, route instances and the invoice gate all live on the
//! order stream, so every change to an order commits as one append.

pub mod guard;
pub mod hold;
pub mod invoice;
pub mod lifecycle;
pub mod order;
pub mod promise;
pub mod route;
pub mod stamp;

pub use guard::{ActiveReasonCodes, RoleGrant};
pub use hold::{ContactRetry, HoldOverlay, HoldOverlayType};
pub use invoice::{
    AttachmentDecision, ErpStagingRequest, InvoiceReview, InvoiceStagingResult, StagingOutcome,
    StagingTicket,
};
pub use lifecycle::{
    OrderLifecycleStatus, OrderStatus, TRANSITIONS, TransitionGate, TransitionPath, TransitionRule,
    check_advance, decision_key,
};
pub use order::{
    AddLine, AdvanceStatus, ApplyHold, ClassifyPromiseMiss, ClearHold, CreateOrder,
    HoldApplied, HoldCleared, InvoiceStagingRecorded, InvoiceSubmission, InvoiceSubmitted,
    LifecycleAdvanced, LineAdded, ORDER_AGGREGATE_TYPE, Order, OrderCommand, OrderCreated,
    OrderEvent, OrderLine, RecordNotification, RecordStagingResult, RouteInstanceCreated,
    StatusStamp, SubmitInvoice, UpsertCommitment,
};
pub use promise::{
    PROMISE_MISS_REASON_CODES_KEY, PROMISE_REASON_CODES_KEY, PromiseChangeEvent,
    PromiseChangeKind, PromiseHistoryProjection,
};
pub use route::{LineRouteOutcome, RouteInstance};
pub use stamp::ActorStamp;
