//! Read-side projections.
//!
//! Both projections are fed only from published envelopes, skip redelivered
//! sequence numbers, and can be rebuilt from the full store.

pub mod audit_trail;
pub mod order_views;

pub use audit_trail::{AuditActor, AuditRecord, AuditTrailProjection};
pub use order_views::{OrderView, OrderViewProjectionError, OrderViewsProjection};
