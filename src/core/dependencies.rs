// src/core/dependencies.rs
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use super::app::{DependencyRef, DependencyScope, ServiceIntrospector};
use super::extract::ExtractedRoute;
use super::graph::{DependencyNode, Edge, EdgeKind, NodeId};

/// Builds the dependency-injection graph reachable from route handlers
pub struct DependencyResolver;

#[derive(Debug, Clone, Default)]
pub struct DependencyResolution {
    pub nodes: Vec<DependencyNode>,
    /// Route -> dependency and dependency -> dependency `depends_on` edges
    pub edges: Vec<Edge>,
}

struct ResolutionPass<'a> {
    introspector: &'a dyn ServiceIntrospector,
    nodes: IndexMap<NodeId, DependencyNode>,
    edges: IndexSet<Edge>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve depth-first from each route; nodes are shared across routes
    pub fn resolve(&self, routes: &[ExtractedRoute], introspector: &dyn ServiceIntrospector) -> DependencyResolution {
        let mut pass = ResolutionPass {
            introspector,
            nodes: IndexMap::new(),
            edges: IndexSet::new(),
        };

        for route in routes {
            for reference in &route.dependencies {
                let id = pass.resolve(reference);
                pass.edges.insert(Edge::new(route.node.id.clone(), id, EdgeKind::DependsOn));
            }
        }

        let unresolved = pass.nodes.values().filter(|n| n.unresolved).count();
        debug!(
            "Resolved {} dependencies ({} unresolved)",
            pass.nodes.len(),
            unresolved
        );

        DependencyResolution {
            nodes: pass.nodes.into_values().collect(),
            edges: pass.edges.into_iter().collect(),
        }
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionPass<'_> {
    fn resolve(&mut self, reference: &DependencyRef) -> NodeId {
        match reference {
            DependencyRef::Named(name) => self.resolve_named(name),
            DependencyRef::Dynamic(expression) => {
                let id = NodeId::dependency(&format!("<dynamic> {}", expression));
                if !self.nodes.contains_key(&id) {
                    warn!("Cannot follow dynamically constructed dependency `{}`", expression);
                    self.nodes.insert(id.clone(), unresolved_node(&id, expression));
                }
                id
            }
        }
    }

    fn resolve_named(&mut self, name: &str) -> NodeId {
        let id = NodeId::dependency(name);
        // Already resolved or currently on the resolution path
        if self.nodes.contains_key(&id) {
            return id;
        }

        let Some(descriptor) = self.introspector.dependency(name) else {
            warn!("No definition found for dependency `{}`", name);
            self.nodes.insert(id.clone(), unresolved_node(&id, name));
            return id;
        };

        self.nodes.insert(
            id.clone(),
            DependencyNode {
                id: id.clone(),
                callable: descriptor.name.clone(),
                scope: descriptor.scope,
                dependencies: Vec::new(),
                unresolved: false,
                error: None,
            },
        );

        let mut children = Vec::new();
        for reference in &descriptor.dependencies {
            let child = self.resolve(reference);
            self.edges.insert(Edge::new(id.clone(), child.clone(), EdgeKind::DependsOn));
            if !children.contains(&child) {
                children.push(child);
            }
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.dependencies = children;
        }
        id
    }
}

fn unresolved_node(id: &NodeId, callable: &str) -> DependencyNode {
    DependencyNode {
        id: id.clone(),
        callable: callable.to_string(),
        scope: DependencyScope::Request,
        dependencies: Vec::new(),
        unresolved: true,
        error: None,
    }
}
