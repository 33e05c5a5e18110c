//! `orderflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! aggregate contracts, strongly-typed identifiers and the workflow error model
//! shared by every order-orchestration crate.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{WorkflowError, WorkflowResult};
pub use id::{AggregateId, CustomerId, ItemId, OrderId, SiteId};
