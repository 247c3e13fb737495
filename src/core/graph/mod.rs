//! Structure and data-flow graph types and their assembly

mod builder;
mod model;

pub use builder::{GraphBuilder, RouteFlow};
pub use model::*;
