// src/core/graph/model.rs
use std::fmt;
use serde::{Deserialize, Serialize};

use super::super::app::{DependencyScope, ParamSource, SourceLocation};

/// Identity of a node inside one snapshot
///
/// Identities are built from node content, so both graphs of a snapshot agree
/// on them and unchanged structure reproduces them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn route(method: &str, path: &str) -> Self {
        Self(format!("route:{} {}", method, path))
    }

    pub fn model(name: &str) -> Self {
        Self(format!("model:{}", name))
    }

    pub fn dependency(name: &str) -> Self {
        Self(format!("dep:{}", name))
    }

    pub fn call(route: &NodeId, order: usize) -> Self {
        Self(format!("call:{}#{}", route.route_key(), order))
    }

    pub fn db_operation(route: &NodeId, order: usize) -> Self {
        Self(format!("db:{}#{}", route.route_key(), order))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn route_key(&self) -> &str {
        self.0.strip_prefix("route:").unwrap_or(&self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteParameter {
    pub name: String,
    pub source: ParamSource,
    pub declared_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteNode {
    pub id: NodeId,
    pub method: String,
    pub path: String,
    pub handler: String,
    pub parameters: Vec<RouteParameter>,
    pub response_model: Option<String>,
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Set when registry metadata was malformed; recoverable fields are kept
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub declared_type: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelNode {
    pub id: NodeId,
    pub name: String,
    pub fields: Vec<ModelField>,
    /// Routes that use this model as body or response, sorted
    pub referenced_by: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: NodeId,
    pub callable: String,
    pub scope: DependencyScope,
    pub dependencies: Vec<NodeId>,
    /// The analyzer could not follow this reference
    pub unresolved: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataAccess {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataReference {
    pub name: String,
    pub access: DataAccess,
}

/// Why the tracer stopped expanding a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Callee is already on the active call stack
    Recursion,
    /// Expanding would exceed the configured depth
    DepthLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallChainEntry {
    pub id: NodeId,
    pub route: NodeId,
    pub order: usize,
    pub depth: usize,
    pub caller: String,
    pub callee: String,
    pub location: Option<SourceLocation>,
    pub data_references: Vec<DataReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<Truncation>,
}

/// Rooted call chain of one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallChain {
    pub route: NodeId,
    pub entries: Vec<CallChainEntry>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbOperationKind {
    Read,
    Insert,
    Update,
    Delete,
    Unknown,
}

/// Table or collection an operation touches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "name", rename_all = "lowercase")]
pub enum DbTarget {
    Resolved(String),
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbOperationNode {
    pub id: NodeId,
    /// Parent call chain entry
    pub entry: NodeId,
    pub kind: DbOperationKind,
    pub target: DbTarget,
    /// Catalog family that matched, e.g. `sql.dbapi`
    pub api: String,
    pub operation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DependsOn,
    Calls,
    Returns,
    References,
    PersistsVia,
}

impl EdgeKind {
    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::DependsOn => "depends_on",
            EdgeKind::Calls => "calls",
            EdgeKind::Returns => "returns",
            EdgeKind::References => "references",
            EdgeKind::PersistsVia => "persists_via",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    /// Marks `depends_on` edges that close a cycle
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flagged: bool,
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId, kind: EdgeKind) -> Self {
        Self { from, to, kind, flagged: false }
    }
}

/// Routes, models and dependency-injection relationships
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureGraph {
    pub routes: Vec<RouteNode>,
    pub models: Vec<ModelNode>,
    pub dependencies: Vec<DependencyNode>,
    pub edges: Vec<Edge>,
}

/// Per-route call chains, data references and persistence operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFlowGraph {
    pub routes: Vec<RouteNode>,
    pub call_chains: Vec<CallChain>,
    pub db_operations: Vec<DbOperationNode>,
    pub edges: Vec<Edge>,
}

impl DataFlowGraph {
    pub fn chain_for(&self, route: &NodeId) -> Option<&CallChain> {
        self.call_chains.iter().find(|chain| &chain.route == route)
    }

    pub fn operations_for(&self, route: &NodeId) -> Vec<&DbOperationNode> {
        let Some(chain) = self.chain_for(route) else {
            return Vec::new();
        };
        self.db_operations
            .iter()
            .filter(|op| chain.entries.iter().any(|entry| entry.id == op.entry))
            .collect()
    }
}
