// src/core/mod.rs
mod app;
mod parser;
mod dependencies;
mod snapshot;
mod export;
mod engine;
mod mapper;

// Registry extraction
mod extract;

// Call-chain tracing and persistence detection
mod call_graph;

// Graph model and assembly
mod graph;

// Language-specific parsers
mod languages;

pub use app::{
    DependencyDescriptor, DependencyRef, DependencyScope, FieldDescriptor, FunctionSource, InMemoryRegistry,
    ModelDescriptor, ParamDescriptor, ParamSource, RouteDescriptor, ServiceIntrospector, SourceLocation,
};
pub use parser::{CodeParser, SourceFile};
pub use languages::{FastApiSource, PythonParser};
pub use extract::{ExtractedRoute, ModelExtraction, ModelExtractor, RouteExtractor};
pub use dependencies::{DependencyResolution, DependencyResolver};
pub use call_graph::{CallChainTracer, CallSite, DbOperation, PersistenceClassifier, TracedCall, TracedChain};
pub use graph::{
    CallChain, CallChainEntry, DataAccess, DataFlowGraph, DataReference, DbOperationKind, DbOperationNode, DbTarget,
    DependencyNode, Edge, EdgeKind, GraphBuilder, ModelField, ModelNode, NodeId, RouteFlow, RouteNode,
    RouteParameter, StructureGraph, Truncation,
};
pub use snapshot::{Snapshot, SnapshotStore};
pub use export::{Exporter, GraphKind, PayloadEdge, PayloadNode, RendererPayload};
pub use mapper::{EndpointResponse, Mapper, Surface};

// Export the main engines
pub use engine::{AnalysisEngine, Engine};
