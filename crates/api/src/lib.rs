//! HTTP API: routing, acting-actor extraction, and error mapping.

pub mod app;
pub mod context;
pub mod middleware;
