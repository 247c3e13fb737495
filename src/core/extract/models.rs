// src/core/extract/models.rs
use std::collections::{BTreeSet, HashMap};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use super::super::app::{ModelDescriptor, ServiceIntrospector};
use super::super::graph::{Edge, EdgeKind, ModelField, ModelNode, NodeId};
use super::{type_identifiers, ExtractedRoute};

/// Collects schema types reachable from route declarations
pub struct ModelExtractor;

#[derive(Debug, Clone, Default)]
pub struct ModelExtraction {
    pub models: Vec<ModelNode>,
    /// Route -> model and model -> model `references` edges
    pub edges: Vec<Edge>,
}

impl ModelExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, routes: &[ExtractedRoute], introspector: &dyn ServiceIntrospector) -> ModelExtraction {
        let mut lookup = ModelLookup::new(introspector);
        let mut emitted: IndexMap<String, ModelNode> = IndexMap::new();
        let mut referenced_by: HashMap<String, BTreeSet<NodeId>> = HashMap::new();
        let mut edges: IndexSet<Edge> = IndexSet::new();

        for route in routes {
            let roots = route.body_models.iter().chain(route.response_models.iter());
            for root in roots {
                if lookup.get(root).is_none() {
                    continue;
                }
                edges.insert(Edge::new(route.node.id.clone(), NodeId::model(root), EdgeKind::References));
                referenced_by.entry(root.clone()).or_default().insert(route.node.id.clone());
                self.expand(root, &mut lookup, &mut emitted, &mut edges);
            }
        }

        let models = emitted
            .into_iter()
            .map(|(name, mut node)| {
                node.referenced_by = referenced_by.remove(&name).unwrap_or_default().into_iter().collect();
                node
            })
            .collect::<Vec<_>>();

        debug!("Extracted {} models", models.len());

        ModelExtraction {
            models,
            edges: edges.into_iter().collect(),
        }
    }

    /// Depth-first expansion guarded by the emitted set; revisits become edges only
    fn expand(
        &self,
        root: &str,
        lookup: &mut ModelLookup<'_>,
        emitted: &mut IndexMap<String, ModelNode>,
        edges: &mut IndexSet<Edge>,
    ) {
        let mut stack = vec![root.to_string()];

        while let Some(name) = stack.pop() {
            if emitted.contains_key(&name) {
                continue;
            }
            let Some(descriptor) = lookup.get(&name) else {
                continue;
            };

            let mut nested = Vec::new();
            for field in &descriptor.fields {
                for candidate in type_identifiers(&field.declared_type) {
                    if lookup.get(&candidate).is_none() {
                        continue;
                    }
                    edges.insert(Edge::new(
                        NodeId::model(&name),
                        NodeId::model(&candidate),
                        EdgeKind::References,
                    ));
                    if !nested.contains(&candidate) {
                        nested.push(candidate);
                    }
                }
            }

            emitted.insert(
                name.clone(),
                ModelNode {
                    id: NodeId::model(&name),
                    name: descriptor.name.clone(),
                    fields: descriptor
                        .fields
                        .iter()
                        .map(|f| ModelField {
                            name: f.name.clone(),
                            declared_type: f.declared_type.clone(),
                            required: f.required,
                            default: f.default.clone(),
                        })
                        .collect(),
                    referenced_by: Vec::new(),
                },
            );

            for candidate in nested.into_iter().rev() {
                if !emitted.contains_key(&candidate) {
                    stack.push(candidate);
                }
            }
        }
    }
}

impl Default for ModelExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Memoizes introspector lookups for one extraction pass
struct ModelLookup<'a> {
    introspector: &'a dyn ServiceIntrospector,
    cache: HashMap<String, Option<ModelDescriptor>>,
}

impl<'a> ModelLookup<'a> {
    fn new(introspector: &'a dyn ServiceIntrospector) -> Self {
        Self { introspector, cache: HashMap::new() }
    }

    fn get(&mut self, name: &str) -> Option<ModelDescriptor> {
        let introspector = self.introspector;
        self.cache
            .entry(name.to_string())
            .or_insert_with(|| introspector.model(name))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app::{FieldDescriptor, InMemoryRegistry, ParamDescriptor, ParamSource, RouteDescriptor};
    use crate::core::extract::RouteExtractor;

    fn extract(registry: &InMemoryRegistry) -> ModelExtraction {
        let descriptors = registry.routes().unwrap();
        let routes = RouteExtractor::new().unwrap().extract(&descriptors, registry);
        ModelExtractor::new().extract(&routes, registry)
    }

    fn has_edge(extraction: &ModelExtraction, from: NodeId, to: NodeId) -> bool {
        extraction
            .edges
            .iter()
            .any(|e| e.from == from && e.to == to && e.kind == EdgeKind::References)
    }

    #[test]
    fn test_items_scenario_emits_two_models() {
        let registry = InMemoryRegistry::new()
            .model("Item", vec![
                FieldDescriptor::new("id", "int", true),
                FieldDescriptor::new("name", "str", true),
            ])
            .model("ItemCreate", vec![FieldDescriptor::new("name", "str", true)])
            .route(RouteDescriptor::new("GET", "/items", "read_items").with_response_model("Item"))
            .route(
                RouteDescriptor::new("POST", "/items", "create_item")
                    .with_param(ParamDescriptor::new("item", Some(ParamSource::Body), Some("ItemCreate")))
                    .with_response_model("Item"),
            );

        let extraction = extract(&registry);

        let names: Vec<_> = extraction.models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Item", "ItemCreate"]);

        let get = NodeId::route("GET", "/items");
        let post = NodeId::route("POST", "/items");
        assert!(has_edge(&extraction, get.clone(), NodeId::model("Item")));
        assert!(!has_edge(&extraction, get.clone(), NodeId::model("ItemCreate")));
        assert!(has_edge(&extraction, post.clone(), NodeId::model("ItemCreate")));
        assert!(has_edge(&extraction, post.clone(), NodeId::model("Item")));

        let item = &extraction.models[0];
        assert_eq!(item.referenced_by, vec![get, post]);
    }

    #[test]
    fn test_self_referential_model_terminates_with_self_edge() {
        let registry = InMemoryRegistry::new()
            .model("Category", vec![
                FieldDescriptor::new("name", "str", true),
                FieldDescriptor::new("children", "List[Category]", false).with_default("[]"),
            ])
            .route(RouteDescriptor::new("GET", "/categories", "tree").with_response_model("List[Category]"));

        let extraction = extract(&registry);

        assert_eq!(extraction.models.len(), 1);
        let fields = &extraction.models[0].fields;
        assert_eq!(fields[0].default, None);
        assert_eq!(fields[1].default.as_deref(), Some("[]"));
        let category = NodeId::model("Category");
        assert!(has_edge(&extraction, category.clone(), category));
    }

    #[test]
    fn test_mutual_references_emit_each_model_once() {
        let registry = InMemoryRegistry::new()
            .model("Author", vec![FieldDescriptor::new("books", "list[Book]", false)])
            .model("Book", vec![
                FieldDescriptor::new("author", "Optional[Author]", false),
                FieldDescriptor::new("tags", "list[Tag]", false),
            ])
            .model("Tag", vec![FieldDescriptor::new("label", "str", true)])
            .route(RouteDescriptor::new("GET", "/authors/{author_id}", "author")
                .with_param(ParamDescriptor::new("author_id", None, Some("int")))
                .with_response_model("Author"));

        let extraction = extract(&registry);

        let names: Vec<_> = extraction.models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Author", "Book", "Tag"]);
        assert!(has_edge(&extraction, NodeId::model("Book"), NodeId::model("Author")));
        assert!(has_edge(&extraction, NodeId::model("Author"), NodeId::model("Book")));
        // only the response model is referenced directly by the route
        assert!(extraction.models[1].referenced_by.is_empty());
    }
}
