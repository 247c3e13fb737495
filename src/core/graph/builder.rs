// src/core/graph/builder.rs
use std::collections::HashSet;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{MapperError, Result};
use super::super::app::DependencyScope;
use super::super::call_graph::{DbOperation, TracedChain};
use super::super::dependencies::DependencyResolution;
use super::super::extract::{ExtractedRoute, ModelExtraction};
use super::model::{
    CallChain, CallChainEntry, DataFlowGraph, DbOperationNode, DependencyNode, Edge, EdgeKind, NodeId,
    StructureGraph,
};

/// Traced and classified calls of one route
#[derive(Debug, Clone)]
pub struct RouteFlow {
    pub route: NodeId,
    pub chain: TracedChain,
    /// Classified operations keyed by the order of their call
    pub operations: Vec<(usize, DbOperation)>,
}

/// Merges stage outputs into the two graphs of a snapshot
pub struct GraphBuilder {
    strict_cycles: bool,
}

impl GraphBuilder {
    pub fn new(strict_cycles: bool) -> Self {
        Self { strict_cycles }
    }

    pub fn build(
        &self,
        routes: &[ExtractedRoute],
        models: ModelExtraction,
        dependencies: DependencyResolution,
        flows: Vec<RouteFlow>,
    ) -> Result<(StructureGraph, DataFlowGraph)> {
        let route_nodes: Vec<_> = routes.iter().map(|r| r.node.clone()).collect();

        let mut dependency_nodes = dependencies.nodes;
        let mut structure_edges = dependencies.edges;
        self.check_cycles(&mut dependency_nodes, &mut structure_edges)?;
        structure_edges.extend(models.edges);

        let structure = StructureGraph {
            routes: route_nodes.clone(),
            models: models.models,
            dependencies: dependency_nodes,
            edges: structure_edges,
        };

        let mut dataflow = DataFlowGraph {
            routes: route_nodes,
            call_chains: Vec::with_capacity(flows.len()),
            db_operations: Vec::new(),
            edges: Vec::new(),
        };
        for flow in flows {
            add_flow(&mut dataflow, flow);
        }

        verify_integrity(&structure, &dataflow)?;

        debug!(
            "Built structure graph ({} nodes, {} edges) and data-flow graph ({} chains, {} operations)",
            structure.routes.len() + structure.models.len() + structure.dependencies.len(),
            structure.edges.len(),
            dataflow.call_chains.len(),
            dataflow.db_operations.len()
        );

        Ok((structure, dataflow))
    }

    /// Flag `depends_on` cycles among injectables
    fn check_cycles(&self, nodes: &mut [DependencyNode], edges: &mut [Edge]) -> Result<()> {
        let mut detector = CycleDetector::new(nodes, edges);
        detector.run(nodes);

        for cycle in &detector.cycles {
            let names: Vec<String> = cycle
                .iter()
                .chain(cycle.first())
                .map(|id| callable_of(nodes, id))
                .collect();
            warn!("Dependency cycle detected: {}", names.join(" -> "));

            let all_request = cycle.iter().all(|id| {
                nodes
                    .iter()
                    .find(|n| &n.id == id)
                    .map_or(false, |n| n.scope == DependencyScope::Request)
            });
            if self.strict_cycles && all_request {
                return Err(MapperError::DependencyCycle { cycle: names });
            }

            let message = format!("dependency cycle: {}", names.join(" -> "));
            for node in nodes.iter_mut().filter(|n| cycle.contains(&n.id)) {
                if node.error.is_none() {
                    node.error = Some(message.clone());
                }
            }
        }

        for edge in edges.iter_mut() {
            if edge.kind == EdgeKind::DependsOn && detector.back_edges.contains(&(edge.from.clone(), edge.to.clone())) {
                edge.flagged = true;
            }
        }

        Ok(())
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(false)
    }
}

fn add_flow(dataflow: &mut DataFlowGraph, flow: RouteFlow) {
    let route = flow.route;
    let mut entries = Vec::with_capacity(flow.chain.calls.len());

    for call in flow.chain.calls {
        let id = NodeId::call(&route, call.order);
        let caller = match call.parent {
            Some(parent) => NodeId::call(&route, parent),
            None => route.clone(),
        };
        dataflow.edges.push(Edge::new(caller, id.clone(), EdgeKind::Calls));
        if call.returned {
            dataflow.edges.push(Edge::new(id.clone(), route.clone(), EdgeKind::Returns));
        }

        entries.push(CallChainEntry {
            id,
            route: route.clone(),
            order: call.order,
            depth: call.depth,
            caller: call.caller,
            callee: call.site.callee,
            location: Some(call.location),
            data_references: call.data_references,
            truncated: call.truncated,
        });
    }

    for (order, operation) in flow.operations {
        let entry = NodeId::call(&route, order);
        let id = NodeId::db_operation(&route, order);
        dataflow.edges.push(Edge::new(entry.clone(), id.clone(), EdgeKind::PersistsVia));
        dataflow.db_operations.push(DbOperationNode {
            id,
            entry,
            kind: operation.kind,
            target: operation.target,
            api: operation.api.to_string(),
            operation: operation.operation,
        });
    }

    dataflow.call_chains.push(CallChain {
        route,
        entries,
        error: flow.chain.error,
    });
}

/// Both graphs must agree on route identity, and every operation needs its entry
fn verify_integrity(structure: &StructureGraph, dataflow: &DataFlowGraph) -> Result<()> {
    let structure_ids: Vec<&NodeId> = structure.routes.iter().map(|r| &r.id).collect();
    let dataflow_ids: Vec<&NodeId> = dataflow.routes.iter().map(|r| &r.id).collect();
    if structure_ids != dataflow_ids {
        return Err(MapperError::Build("route identities differ between graphs".to_string()));
    }

    let entries: HashSet<&NodeId> = dataflow
        .call_chains
        .iter()
        .flat_map(|chain| chain.entries.iter().map(|e| &e.id))
        .collect();
    if let Some(orphan) = dataflow.db_operations.iter().find(|op| !entries.contains(&op.entry)) {
        return Err(MapperError::Build(format!(
            "operation {} has no call chain entry {}",
            orphan.id, orphan.entry
        )));
    }

    Ok(())
}

fn callable_of(nodes: &[DependencyNode], id: &NodeId) -> String {
    nodes
        .iter()
        .find(|n| &n.id == id)
        .map(|n| n.callable.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Depth-first cycle search over dependency-to-dependency edges
struct CycleDetector {
    adjacency: IndexMap<NodeId, Vec<NodeId>>,
    visited: HashSet<NodeId>,
    rec_stack: HashSet<NodeId>,
    current_path: Vec<NodeId>,
    cycles: Vec<Vec<NodeId>>,
    back_edges: HashSet<(NodeId, NodeId)>,
}

impl CycleDetector {
    fn new(nodes: &[DependencyNode], edges: &[Edge]) -> Self {
        let known: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();
        let mut adjacency: IndexMap<NodeId, Vec<NodeId>> = nodes.iter().map(|n| (n.id.clone(), Vec::new())).collect();

        for edge in edges {
            if edge.kind != EdgeKind::DependsOn || !known.contains(&edge.from) || !known.contains(&edge.to) {
                continue;
            }
            if let Some(targets) = adjacency.get_mut(&edge.from) {
                targets.push(edge.to.clone());
            }
        }

        Self {
            adjacency,
            visited: HashSet::new(),
            rec_stack: HashSet::new(),
            current_path: Vec::new(),
            cycles: Vec::new(),
            back_edges: HashSet::new(),
        }
    }

    fn run(&mut self, nodes: &[DependencyNode]) {
        for node in nodes {
            if !self.visited.contains(&node.id) {
                self.visit(&node.id);
            }
        }
    }

    fn visit(&mut self, node: &NodeId) {
        self.visited.insert(node.clone());
        self.rec_stack.insert(node.clone());
        self.current_path.push(node.clone());

        let targets = self.adjacency.get(node).cloned().unwrap_or_default();
        for target in targets {
            if !self.visited.contains(&target) {
                self.visit(&target);
            } else if self.rec_stack.contains(&target) {
                self.back_edges.insert((node.clone(), target.clone()));
                if let Some(start) = self.current_path.iter().position(|n| n == &target) {
                    self.cycles.push(self.current_path[start..].to_vec());
                }
            }
        }

        self.rec_stack.remove(node);
        self.current_path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app::{DependencyRef, InMemoryRegistry, RouteDescriptor, ServiceIntrospector, SourceLocation};
    use crate::core::call_graph::{CallSite, TracedCall};
    use crate::core::dependencies::DependencyResolver;
    use crate::core::extract::{ModelExtractor, RouteExtractor};
    use crate::core::graph::{DbOperationKind, DbTarget};

    fn named(name: &str) -> DependencyRef {
        DependencyRef::Named(name.to_string())
    }

    fn build(registry: &InMemoryRegistry, strict: bool, flows: Vec<RouteFlow>) -> Result<(StructureGraph, DataFlowGraph)> {
        let descriptors = registry.routes().unwrap();
        let routes = RouteExtractor::new().unwrap().extract(&descriptors, registry);
        let models = ModelExtractor::new().extract(&routes, registry);
        let dependencies = DependencyResolver::new().resolve(&routes, registry);
        GraphBuilder::new(strict).build(&routes, models, dependencies, flows)
    }

    fn cyclic_registry(scope: DependencyScope) -> InMemoryRegistry {
        InMemoryRegistry::new()
            .dependency("a", DependencyScope::Request, vec![named("b")])
            .dependency("b", scope, vec![named("a")])
            .route(RouteDescriptor::new("GET", "/loop", "loop_handler").with_dependency(named("a")))
    }

    fn call(order: usize, depth: usize, parent: Option<usize>, callee: &str) -> TracedCall {
        TracedCall {
            order,
            depth,
            parent,
            caller: "handler".to_string(),
            site: CallSite {
                callee: callee.to_string(),
                literal_args: Vec::new(),
                subscript_literal: None,
            },
            location: SourceLocation::new("main.py", 1 + order),
            data_references: Vec::new(),
            truncated: None,
            returned: false,
        }
    }

    #[test]
    fn test_cycles_are_flagged_not_fatal() {
        let (structure, _) = build(&cyclic_registry(DependencyScope::Request), false, Vec::new()).unwrap();

        let flagged: Vec<_> = structure.edges.iter().filter(|e| e.flagged).collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].from, NodeId::dependency("b"));
        assert_eq!(flagged[0].to, NodeId::dependency("a"));
        for node in &structure.dependencies {
            assert_eq!(node.error.as_deref(), Some("dependency cycle: a -> b -> a"));
        }
    }

    #[test]
    fn test_strict_mode_rejects_request_scoped_cycles_only() {
        let err = build(&cyclic_registry(DependencyScope::Request), true, Vec::new()).unwrap_err();
        assert!(matches!(err, MapperError::DependencyCycle { .. }));

        // A process-scoped member breaks the cycle at runtime
        let (structure, _) = build(&cyclic_registry(DependencyScope::Process), true, Vec::new()).unwrap();
        assert!(structure.edges.iter().any(|e| e.flagged));
    }

    #[test]
    fn test_dataflow_edges_and_shared_route_identity() {
        let registry = InMemoryRegistry::new().route(RouteDescriptor::new("POST", "/users", "create_user"));
        let route = NodeId::route("POST", "/users");

        let mut top = call(0, 0, None, "save_user");
        top.returned = true;
        let nested = call(1, 1, Some(0), "db.add");
        let flow = RouteFlow {
            route: route.clone(),
            chain: TracedChain { calls: vec![top, nested], error: None },
            operations: vec![(
                1,
                DbOperation {
                    kind: DbOperationKind::Insert,
                    target: DbTarget::Unresolved,
                    api: "sql.session",
                    operation: "add".to_string(),
                },
            )],
        };

        let (structure, dataflow) = build(&registry, false, vec![flow]).unwrap();

        assert_eq!(structure.routes[0].id, dataflow.routes[0].id);
        let edge = |from: &NodeId, to: &NodeId, kind| dataflow.edges.contains(&Edge::new(from.clone(), to.clone(), kind));
        let first = NodeId::call(&route, 0);
        let second = NodeId::call(&route, 1);
        assert!(edge(&route, &first, EdgeKind::Calls));
        assert!(edge(&first, &second, EdgeKind::Calls));
        assert!(edge(&first, &route, EdgeKind::Returns));
        assert!(edge(&second, &NodeId::db_operation(&route, 1), EdgeKind::PersistsVia));
        assert_eq!(dataflow.operations_for(&route).len(), 1);
    }

    #[test]
    fn test_orphan_operation_fails_the_build() {
        let registry = InMemoryRegistry::new().route(RouteDescriptor::new("GET", "/x", "x"));
        let flow = RouteFlow {
            route: NodeId::route("GET", "/x"),
            chain: TracedChain::default(),
            operations: vec![(
                3,
                DbOperation {
                    kind: DbOperationKind::Read,
                    target: DbTarget::Unresolved,
                    api: "sql.dbapi",
                    operation: "fetchall".to_string(),
                },
            )],
        };

        let err = build(&registry, false, vec![flow]).unwrap_err();
        assert!(matches!(err, MapperError::Build(_)));
    }
}
