//! Append-only event store boundary.
//!
//! Orders and the decision-policy book are each stored as event streams; the
//! store makes no assumptions about the backing storage.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
