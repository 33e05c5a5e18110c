//! Infrastructure layer: event storage, dispatch, read side, config, ERP channel.

pub mod command_dispatcher;
pub mod config;
pub mod erp;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;

pub use config::{ConfigError, OrderflowConfig};
pub use services::WorkflowService;
