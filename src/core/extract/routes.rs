// src/core/extract/routes.rs
use std::collections::HashSet;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{MapperError, Result};
use super::super::app::{DependencyRef, ParamSource, RouteDescriptor, ServiceIntrospector};
use super::super::graph::{NodeId, RouteNode, RouteParameter};
use super::type_identifiers;

const KNOWN_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE"];

/// Turns registry descriptors into route nodes, one per (method, path)
pub struct RouteExtractor {
    placeholder: Regex,
}

/// A route node plus the registry details later stages need
#[derive(Debug, Clone)]
pub struct ExtractedRoute {
    pub node: RouteNode,
    /// Schema names used as request bodies, in declaration order
    pub body_models: Vec<String>,
    /// Schema names mentioned by the response model
    pub response_models: Vec<String>,
    pub dependencies: Vec<DependencyRef>,
}

impl RouteExtractor {
    pub fn new() -> Result<Self> {
        let placeholder = Regex::new(r"\{([^{}/]+)\}")
            .map_err(|e| MapperError::Parser(format!("Invalid placeholder pattern: {}", e)))?;
        Ok(Self { placeholder })
    }

    /// Extract route nodes in registry order
    pub fn extract(
        &self,
        descriptors: &[RouteDescriptor],
        introspector: &dyn ServiceIntrospector,
    ) -> Vec<ExtractedRoute> {
        let mut routes = Vec::new();
        let mut seen = HashSet::new();

        for descriptor in descriptors {
            let methods = if descriptor.methods.is_empty() {
                vec![String::new()]
            } else {
                descriptor.methods.clone()
            };

            for method in methods {
                let route = self.extract_one(descriptor, &method, introspector);
                if !seen.insert(route.node.id.clone()) {
                    warn!("Duplicate registration for {}, keeping the first one", route.node.id);
                    continue;
                }
                if let Some(error) = &route.node.error {
                    warn!("Route {} has malformed metadata: {}", route.node.id, error);
                } else {
                    debug!("Extracted route {} -> {}", route.node.id, route.node.handler);
                }
                routes.push(route);
            }
        }

        routes
    }

    fn extract_one(
        &self,
        descriptor: &RouteDescriptor,
        method: &str,
        introspector: &dyn ServiceIntrospector,
    ) -> ExtractedRoute {
        let mut issues = Vec::new();

        let method = method.trim().to_uppercase();
        let method = if method.is_empty() {
            issues.push("no HTTP method registered".to_string());
            "UNKNOWN".to_string()
        } else {
            if !KNOWN_METHODS.contains(&method.as_str()) {
                issues.push(format!("unknown HTTP method `{}`", method));
            }
            method
        };

        let path = descriptor.path.trim().to_string();
        if !path.starts_with('/') {
            issues.push(format!("path `{}` does not start with '/'", path));
        }
        if !braces_balanced(&path) {
            issues.push(format!("unbalanced braces in path `{}`", path));
        }
        if descriptor.handler.trim().is_empty() {
            issues.push("missing handler name".to_string());
        }

        let placeholders = self.placeholders(&path);
        let mut parameters = Vec::new();
        let mut body_models = Vec::new();

        for param in &descriptor.parameters {
            let models = known_models(param.declared_type.as_deref(), introspector);
            let source = match param.source {
                Some(source) => source,
                None if placeholders.contains(&param.name) => ParamSource::Path,
                None if !models.is_empty() => ParamSource::Body,
                None => ParamSource::Query,
            };

            if source == ParamSource::Path && !placeholders.contains(&param.name) {
                issues.push(format!("path parameter `{}` is not in the path template", param.name));
            }
            if source == ParamSource::Body {
                for model in models {
                    if !body_models.contains(&model) {
                        body_models.push(model);
                    }
                }
            }

            parameters.push(RouteParameter {
                name: param.name.clone(),
                source,
                declared_type: param.declared_type.clone(),
            });
        }

        for placeholder in &placeholders {
            if !parameters.iter().any(|p| &p.name == placeholder) {
                issues.push(format!("placeholder `{{{}}}` has no matching parameter", placeholder));
            }
        }

        let response_models = known_models(descriptor.response_model.as_deref(), introspector);

        ExtractedRoute {
            node: RouteNode {
                id: NodeId::route(&method, &path),
                method,
                path,
                handler: descriptor.handler.clone(),
                parameters,
                response_model: descriptor.response_model.clone(),
                location: descriptor.location.clone(),
                signature: descriptor.signature.clone(),
                docstring: descriptor.docstring.clone(),
                error: if issues.is_empty() { None } else { Some(issues.join("; ")) },
            },
            body_models,
            response_models,
            dependencies: descriptor.dependencies.clone(),
        }
    }

    /// Placeholder names in a path template, without converters (`{p:path}` -> `p`)
    fn placeholders(&self, path: &str) -> Vec<String> {
        self.placeholder
            .captures_iter(path)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str().split(':').next().unwrap_or_default().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

fn braces_balanced(path: &str) -> bool {
    let mut open = false;
    for ch in path.chars() {
        match ch {
            '{' if open => return false,
            '{' => open = true,
            '}' if !open => return false,
            '}' => open = false,
            _ => {}
        }
    }
    !open
}

fn known_models(declared: Option<&str>, introspector: &dyn ServiceIntrospector) -> Vec<String> {
    declared
        .map(type_identifiers)
        .unwrap_or_default()
        .into_iter()
        .filter(|name| introspector.model(name).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app::{FieldDescriptor, InMemoryRegistry, ParamDescriptor};

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new()
            .model("Item", vec![FieldDescriptor::new("id", "int", true)])
            .model("ItemCreate", vec![FieldDescriptor::new("name", "str", true)])
    }

    #[test]
    fn test_infers_parameter_sources() {
        let route = RouteDescriptor::new("put", "/items/{item_id}", "update_item")
            .with_param(ParamDescriptor::new("item_id", None, Some("int")))
            .with_param(ParamDescriptor::new("item", None, Some("ItemCreate")))
            .with_param(ParamDescriptor::new("notify", None, Some("bool")))
            .with_response_model("Item");

        let extractor = RouteExtractor::new().unwrap();
        let routes = extractor.extract(&[route], &registry());

        assert_eq!(routes.len(), 1);
        let node = &routes[0].node;
        assert_eq!(node.id, NodeId::route("PUT", "/items/{item_id}"));
        assert_eq!(node.error, None);
        let sources: Vec<_> = node.parameters.iter().map(|p| p.source).collect();
        assert_eq!(sources, vec![ParamSource::Path, ParamSource::Body, ParamSource::Query]);
        assert_eq!(routes[0].body_models, vec!["ItemCreate"]);
        assert_eq!(routes[0].response_models, vec!["Item"]);
    }

    #[test]
    fn test_routes_without_parameters_or_response_are_clean() {
        let extractor = RouteExtractor::new().unwrap();
        let routes = extractor.extract(&[RouteDescriptor::new("GET", "/", "read_root")], &registry());

        assert_eq!(routes[0].node.error, None);
        assert!(routes[0].node.parameters.is_empty());
        assert_eq!(routes[0].node.response_model, None);
    }

    #[test]
    fn test_malformed_route_is_flagged_but_kept() {
        let mut route = RouteDescriptor::new("FETCH", "items/{id", "broken")
            .with_response_model("Item");
        route.parameters.push(ParamDescriptor::new("id", Some(ParamSource::Path), Some("int")));

        let extractor = RouteExtractor::new().unwrap();
        let routes = extractor.extract(&[route], &registry());

        assert_eq!(routes.len(), 1);
        let error = routes[0].node.error.as_deref().unwrap();
        assert!(error.contains("unknown HTTP method"));
        assert!(error.contains("does not start with '/'"));
        assert!(error.contains("unbalanced braces"));
        assert_eq!(routes[0].node.response_model.as_deref(), Some("Item"));
        assert_eq!(routes[0].node.handler, "broken");
    }

    #[test]
    fn test_multi_method_registration_expands_and_duplicates_are_dropped() {
        let mut multi = RouteDescriptor::new("GET", "/health", "health");
        multi.methods.push("HEAD".to_string());
        let duplicate = RouteDescriptor::new("GET", "/health", "health_again");

        let extractor = RouteExtractor::new().unwrap();
        let routes = extractor.extract(&[multi, duplicate], &registry());

        let ids: Vec<_> = routes.iter().map(|r| r.node.id.to_string()).collect();
        assert_eq!(ids, vec!["route:GET /health", "route:HEAD /health"]);
        assert_eq!(routes[0].node.handler, "health");
    }

    #[test]
    fn test_undeclared_placeholder_is_reported() {
        let extractor = RouteExtractor::new().unwrap();
        let routes = extractor.extract(
            &[RouteDescriptor::new("GET", "/files/{file_path:path}", "read_file")],
            &registry(),
        );
        let error = routes[0].node.error.as_deref().unwrap();
        assert!(error.contains("{file_path}"));
    }
}
