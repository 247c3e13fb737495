//! Structure and data-flow maps for web services
//!
//! [`core::Mapper`] builds a snapshot of a service's routes, schema models,
//! injected dependencies and per-route call chains, and serves it as JSON
//! documents under a configurable base path.

pub mod config;
pub mod core;
pub mod error;
