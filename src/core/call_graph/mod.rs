// src/core/call_graph/mod.rs
//! Call-chain tracing and persistence detection
//!
//! Handlers are walked statically from their source text; nothing is
//! executed. Each call site becomes a chain entry, and entries whose shape
//! matches a known persistence API are classified as database operations.

mod call_chain_tracer;
mod persistence;

pub use call_chain_tracer::{CallChainTracer, CallSite, TracedCall, TracedChain};
pub use persistence::{DbOperation, PersistenceClassifier};
