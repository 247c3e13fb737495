//! Capability seam between the analysis core and the host service
//!
//! The core never talks to a web framework directly. Anything that can
//! enumerate routes, describe schema types, describe injectables and hand back
//! callable source text can be mapped by implementing [`ServiceIntrospector`].

use std::path::PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where a route parameter is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamSource {
    Path,
    Query,
    Body,
    Header,
}

/// Lifetime of an injected dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScope {
    /// Constructed once per request
    Request,
    /// Cached for the lifetime of the process
    Process,
}

/// File and 1-based line of a piece of source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self { file: file.into(), line }
    }
}

/// Reference from a handler or injectable to something it depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyRef {
    /// A callable the adapter can name
    Named(String),
    /// Constructed at runtime; carries the expression text
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    /// `None` lets the route extractor infer the source
    pub source: Option<ParamSource>,
    pub declared_type: Option<String>,
}

impl ParamDescriptor {
    pub fn new(name: &str, source: Option<ParamSource>, declared_type: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            source,
            declared_type: declared_type.map(|t| t.to_string()),
        }
    }
}

/// One registration in the host's route registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub path: String,
    pub methods: Vec<String>,
    pub handler: String,
    pub parameters: Vec<ParamDescriptor>,
    pub response_model: Option<String>,
    pub dependencies: Vec<DependencyRef>,
    pub location: Option<SourceLocation>,
    /// Handler parameter list as written, e.g. `(item: Item, db=Depends(get_db))`
    pub signature: Option<String>,
    /// Handler docstring, when the host exposes one
    pub docstring: Option<String>,
}

impl RouteDescriptor {
    pub fn new(method: &str, path: &str, handler: &str) -> Self {
        Self {
            path: path.to_string(),
            methods: vec![method.to_string()],
            handler: handler.to_string(),
            parameters: Vec::new(),
            response_model: None,
            dependencies: Vec::new(),
            location: None,
            signature: None,
            docstring: None,
        }
    }

    pub fn with_param(mut self, param: ParamDescriptor) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_response_model(mut self, model: &str) -> Self {
        self.response_model = Some(model.to_string());
        self
    }

    pub fn with_dependency(mut self, dependency: DependencyRef) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_docstring(mut self, docstring: &str) -> Self {
        self.docstring = Some(docstring.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub declared_type: String,
    pub required: bool,
    /// Default value expression as written
    pub default: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: &str, declared_type: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            required,
            default: None,
        }
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// Field structure of a request/response schema type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    pub name: String,
    pub scope: DependencyScope,
    pub dependencies: Vec<DependencyRef>,
}

/// Source text of a callable, starting at its definition line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSource {
    pub name: String,
    pub location: SourceLocation,
    pub text: String,
}

/// Capability set the mapper is polymorphic over
pub trait ServiceIntrospector: Send + Sync {
    /// Enumerate registered routes in registration order
    fn routes(&self) -> Result<Vec<RouteDescriptor>>;

    /// Describe a schema type by name
    fn model(&self, name: &str) -> Option<ModelDescriptor>;

    /// Describe an injectable callable by name
    fn dependency(&self, name: &str) -> Option<DependencyDescriptor>;

    /// Source of a callable, when it can be located
    fn function_source(&self, name: &str) -> Option<FunctionSource>;

    /// Source of `callee` as written inside the body of `caller`
    ///
    /// Adapters that know module scopes override this; the default treats the
    /// written name as a global identity.
    fn resolve_callee(&self, caller: &str, callee: &str) -> Option<FunctionSource> {
        let _ = caller;
        self.function_source(callee)
    }
}

/// Programmatic registry for hosts that can enumerate themselves at runtime
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    routes: Vec<RouteDescriptor>,
    models: IndexMap<String, ModelDescriptor>,
    dependencies: IndexMap<String, DependencyDescriptor>,
    functions: IndexMap<String, FunctionSource>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, route: RouteDescriptor) -> Self {
        self.routes.push(route);
        self
    }

    pub fn model(mut self, name: &str, fields: Vec<FieldDescriptor>) -> Self {
        self.models.insert(
            name.to_string(),
            ModelDescriptor { name: name.to_string(), fields },
        );
        self
    }

    pub fn dependency(mut self, name: &str, scope: DependencyScope, dependencies: Vec<DependencyRef>) -> Self {
        self.dependencies.insert(
            name.to_string(),
            DependencyDescriptor { name: name.to_string(), scope, dependencies },
        );
        self
    }

    /// Register callable source; `text` must start at the `def` line
    pub fn function(mut self, name: &str, location: SourceLocation, text: &str) -> Self {
        self.functions.insert(
            name.to_string(),
            FunctionSource {
                name: name.to_string(),
                location,
                text: text.to_string(),
            },
        );
        self
    }
}

impl ServiceIntrospector for InMemoryRegistry {
    fn routes(&self) -> Result<Vec<RouteDescriptor>> {
        Ok(self.routes.clone())
    }

    fn model(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.get(name).cloned()
    }

    fn dependency(&self, name: &str) -> Option<DependencyDescriptor> {
        self.dependencies.get(name).cloned()
    }

    fn function_source(&self, name: &str) -> Option<FunctionSource> {
        self.functions.get(name).cloned()
    }
}
