//! Disposable read-model storage.

pub mod store;

pub use store::{InMemoryReadModelStore, ReadModelStore};
