// src/core/export.rs
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::config::OutputConfig;
use crate::error::Result;
use super::graph::{DbTarget, Edge, EdgeKind, Truncation};
use super::snapshot::Snapshot;

const MAP_TEMPLATE: &str = include_str!("../../templates/map.html.tera");

/// Which graph of a snapshot to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphKind {
    Structure,
    Dataflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadNode {
    pub id: String,
    pub label: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub label: String,
}

/// Flat node/edge lists for diagram renderers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererPayload {
    pub graph: GraphKind,
    pub nodes: Vec<PayloadNode>,
    pub edges: Vec<PayloadEdge>,
}

#[derive(Serialize)]
struct NodeGroup<'a> {
    name: &'a str,
    nodes: Vec<&'a PayloadNode>,
}

/// Serializes snapshots into the exported documents
pub struct Exporter {
    pretty: bool,
}

impl Exporter {
    pub fn new(output: &OutputConfig) -> Self {
        Self { pretty: output.pretty }
    }

    /// `{ routes, models, dependencies, edges }`
    pub fn structure_json(&self, snapshot: &Snapshot) -> Result<String> {
        self.to_json(&snapshot.structure)
    }

    /// `{ routes, call_chains, db_operations, edges }`
    pub fn dataflow_json(&self, snapshot: &Snapshot) -> Result<String> {
        self.to_json(&snapshot.dataflow)
    }

    pub fn graph_json(&self, snapshot: &Snapshot, graph: GraphKind) -> Result<String> {
        match graph {
            GraphKind::Structure => self.structure_json(snapshot),
            GraphKind::Dataflow => self.dataflow_json(snapshot),
        }
    }

    pub fn payload(&self, snapshot: &Snapshot, graph: GraphKind) -> RendererPayload {
        match graph {
            GraphKind::Structure => structure_payload(snapshot),
            GraphKind::Dataflow => dataflow_payload(snapshot),
        }
    }

    pub fn payload_json(&self, snapshot: &Snapshot, graph: GraphKind) -> Result<String> {
        self.to_json(&self.payload(snapshot, graph))
    }

    /// Standalone page embedding the renderer payload
    pub fn render_html(&self, snapshot: &Snapshot, graph: GraphKind, title: &str) -> Result<String> {
        let payload = self.payload(snapshot, graph);

        let mut groups: IndexMap<&str, Vec<&PayloadNode>> = IndexMap::new();
        for node in &payload.nodes {
            groups.entry(node.group.as_str()).or_default().push(node);
        }
        let groups: Vec<NodeGroup> = groups
            .into_iter()
            .map(|(name, nodes)| NodeGroup { name, nodes })
            .collect();

        // Keep the embedded JSON from closing the script element
        let embedded = serde_json::to_string(&payload)?.replace("</", "<\\/");

        let mut tera = Tera::default();
        tera.add_raw_template("map.html", MAP_TEMPLATE)?;

        let mut context = Context::new();
        context.insert("title", title);
        context.insert("fingerprint", &snapshot.fingerprint);
        context.insert("built_at", &snapshot.built_at.to_rfc3339());
        context.insert("node_count", &payload.nodes.len());
        context.insert("edge_count", &payload.edges.len());
        context.insert("groups", &groups);
        context.insert("payload", &embedded);

        Ok(tera.render("map.html", &context)?)
    }

    fn to_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }
}

fn structure_payload(snapshot: &Snapshot) -> RendererPayload {
    let graph = &snapshot.structure;
    let mut nodes = Vec::new();

    for route in &graph.routes {
        nodes.push(node(route.id.as_str(), format!("{} {}", route.method, route.path), "route"));
    }
    for model in &graph.models {
        nodes.push(node(model.id.as_str(), model.name.clone(), "model"));
    }
    for dependency in &graph.dependencies {
        let group = if dependency.unresolved { "dependency-unresolved" } else { "dependency" };
        nodes.push(node(dependency.id.as_str(), dependency.callable.clone(), group));
    }

    RendererPayload {
        graph: GraphKind::Structure,
        nodes,
        edges: graph.edges.iter().map(payload_edge).collect(),
    }
}

fn dataflow_payload(snapshot: &Snapshot) -> RendererPayload {
    let graph = &snapshot.dataflow;
    let mut nodes = Vec::new();

    for route in &graph.routes {
        nodes.push(node(route.id.as_str(), format!("{} {}", route.method, route.path), "route"));
    }
    for entry in graph.call_chains.iter().flat_map(|chain| chain.entries.iter()) {
        let (label, group) = match entry.truncated {
            Some(Truncation::Recursion) => (format!("{} (recursion)", entry.callee), "call-truncated"),
            Some(Truncation::DepthLimit) => (format!("{} (depth limit)", entry.callee), "call-truncated"),
            None => (entry.callee.clone(), "call"),
        };
        nodes.push(node(entry.id.as_str(), label, group));
    }
    for operation in &graph.db_operations {
        let target = match &operation.target {
            DbTarget::Resolved(name) => name.as_str(),
            DbTarget::Unresolved => "?",
        };
        let kind = serde_json::to_value(operation.kind)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        nodes.push(node(operation.id.as_str(), format!("{} {}", kind, target), "db_operation"));
    }

    RendererPayload {
        graph: GraphKind::Dataflow,
        nodes,
        edges: graph.edges.iter().map(payload_edge).collect(),
    }
}

fn node(id: &str, label: String, group: &str) -> PayloadNode {
    PayloadNode {
        id: id.to_string(),
        label,
        group: group.to_string(),
    }
}

fn payload_edge(edge: &Edge) -> PayloadEdge {
    let label = if edge.flagged {
        format!("{} (cycle)", edge.kind.label())
    } else {
        edge.kind.label().to_string()
    };
    PayloadEdge {
        from: edge.from.to_string(),
        to: edge.to.to_string(),
        kind: edge.kind,
        label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{
        CallChain, CallChainEntry, DataFlowGraph, DbOperationKind, DbOperationNode, ModelNode, NodeId,
        RouteNode, StructureGraph,
    };

    fn snapshot() -> Snapshot {
        let route_id = NodeId::route("GET", "/items");
        let route = RouteNode {
            id: route_id.clone(),
            method: "GET".to_string(),
            path: "/items".to_string(),
            handler: "read_items".to_string(),
            parameters: Vec::new(),
            response_model: Some("Item".to_string()),
            location: None,
            signature: None,
            docstring: None,
            error: None,
        };
        let entry = NodeId::call(&route_id, 0);

        let structure = StructureGraph {
            routes: vec![route.clone()],
            models: vec![ModelNode {
                id: NodeId::model("Item"),
                name: "Item".to_string(),
                fields: Vec::new(),
                referenced_by: vec![route_id.clone()],
            }],
            dependencies: Vec::new(),
            edges: vec![Edge::new(route_id.clone(), NodeId::model("Item"), EdgeKind::References)],
        };
        let dataflow = DataFlowGraph {
            routes: vec![route],
            call_chains: vec![CallChain {
                route: route_id.clone(),
                entries: vec![CallChainEntry {
                    id: entry.clone(),
                    route: route_id.clone(),
                    order: 0,
                    depth: 0,
                    caller: "read_items".to_string(),
                    callee: "cursor.execute".to_string(),
                    location: None,
                    data_references: Vec::new(),
                    truncated: None,
                }],
                error: None,
            }],
            db_operations: vec![DbOperationNode {
                id: NodeId::db_operation(&route_id, 0),
                entry: entry.clone(),
                kind: DbOperationKind::Read,
                target: DbTarget::Resolved("items".to_string()),
                api: "sql.dbapi".to_string(),
                operation: "execute".to_string(),
            }],
            edges: vec![
                Edge::new(route_id.clone(), entry.clone(), EdgeKind::Calls),
                Edge::new(entry, NodeId::db_operation(&route_id, 0), EdgeKind::PersistsVia),
            ],
        };

        Snapshot::new(structure, dataflow).unwrap()
    }

    fn exporter() -> Exporter {
        Exporter::new(&OutputConfig { pretty: false })
    }

    #[test]
    fn test_structure_json_has_stable_top_level_keys() {
        let json: serde_json::Value = serde_json::from_str(&exporter().structure_json(&snapshot()).unwrap()).unwrap();
        for key in ["routes", "models", "dependencies", "edges"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["edges"][0]["kind"], "references");
        assert!(json["edges"][0].get("flagged").is_none());

        let json: serde_json::Value = serde_json::from_str(&exporter().dataflow_json(&snapshot()).unwrap()).unwrap();
        for key in ["routes", "call_chains", "db_operations", "edges"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["db_operations"][0]["target"]["name"], "items");
    }

    #[test]
    fn test_dataflow_payload_groups_and_labels() {
        let payload = exporter().payload(&snapshot(), GraphKind::Dataflow);

        let groups: Vec<_> = payload.nodes.iter().map(|n| n.group.as_str()).collect();
        assert_eq!(groups, vec!["route", "call", "db_operation"]);
        assert_eq!(payload.nodes[2].label, "read items");
        assert_eq!(payload.edges[1].label, "persists_via");

        let json = exporter().payload_json(&snapshot(), GraphKind::Structure).unwrap();
        assert!(json.starts_with("{\"graph\":\"structure\""));
    }

    #[test]
    fn test_html_shell_embeds_payload() {
        let html = exporter().render_html(&snapshot(), GraphKind::Structure, "Items <API>").unwrap();

        assert!(html.contains("<title>Items &lt;API&gt;</title>"));
        assert!(html.contains("\"graph\":\"structure\""));
        assert!(html.contains("model:Item"));
    }
}
