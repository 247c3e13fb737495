//! Source-level adapters for host frameworks
//!
//! `python` wraps the Tree-sitter grammar and the node helpers shared by the
//! tracer; `fastapi` reads a FastAPI application's registration surface.

pub(crate) mod python;
mod fastapi;

pub use fastapi::FastApiSource;
pub use python::PythonParser;
