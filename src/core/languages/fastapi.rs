// src/core/languages/fastapi.rs
//! Static adapter over FastAPI source trees
//!
//! Reads the same registration surface FastAPI itself evaluates at import
//! time (route decorators, `APIRouter` prefixes, `include_router` calls,
//! pydantic models and `Depends` markers) without importing the application.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use indexmap::IndexMap;
use tracing::{debug, info, warn};
use tree_sitter::Node;

use crate::config::Config;
use crate::error::Result;
use super::super::app::{
    DependencyDescriptor, DependencyRef, DependencyScope, FieldDescriptor, FunctionSource,
    ModelDescriptor, ParamDescriptor, ParamSource, RouteDescriptor, ServiceIntrospector,
    SourceLocation,
};
use super::super::parser::{CodeParser, SourceFile};
use super::python::{dotted_name, first_error_row, named_children, node_text, string_literal, PythonParser};

const ROUTE_VERBS: &[&str] = &["get", "post", "put", "patch", "delete", "head", "options", "trace"];
const MODEL_BASES: &[&str] = &["BaseModel", "SQLModel"];
const INJECTED_TYPES: &[&str] = &["Request", "Response", "BackgroundTasks", "WebSocket", "HTTPConnection", "SecurityScopes"];
const CACHE_DECORATORS: &[&str] = &["lru_cache", "cache"];

/// How FastAPI treats one handler parameter
#[derive(Debug, Clone)]
enum ParamMarker {
    Plain,
    Source(ParamSource),
    Depends(DependencyRef),
    Injected,
}

#[derive(Debug, Clone)]
struct PyParam {
    name: String,
    annotation: Option<String>,
    marker: ParamMarker,
}

/// A function or method, keyed `module.name` or `module.Class.name`
#[derive(Debug, Clone)]
struct FunctionRecord {
    module: String,
    class: Option<String>,
    source: FunctionSource,
    params: Vec<PyParam>,
    return_annotation: Option<String>,
    decorators: Vec<String>,
    /// Parameter list and return annotation as written
    signature: Option<String>,
    docstring: Option<String>,
}

#[derive(Debug, Clone)]
struct ClassRecord {
    name: String,
    module: String,
    bases: Vec<String>,
    fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Default)]
struct RouterDecl {
    module: String,
    prefix: String,
    dependencies: Vec<DependencyRef>,
}

#[derive(Debug, Clone)]
struct Include {
    module: String,
    parent: String,
    child: String,
    prefix: String,
    dependencies: Vec<DependencyRef>,
}

#[derive(Debug, Clone)]
struct PendingRoute {
    router: String,
    module: String,
    descriptor: RouteDescriptor,
}

/// Source index collected while walking module trees
#[derive(Default)]
struct ModuleIndex {
    functions: IndexMap<String, FunctionRecord>,
    /// Name inside its module (`get_db`, `Repo.save`) -> qualified keys
    locals: HashMap<String, Vec<String>>,
    /// Per module: bound name -> dotted import path
    imports: HashMap<String, HashMap<String, String>>,
    classes: IndexMap<String, ClassRecord>,
    routers: IndexMap<String, RouterDecl>,
    includes: Vec<Include>,
    routes: Vec<PendingRoute>,
}

/// [`ServiceIntrospector`] backed by parsed FastAPI sources
pub struct FastApiSource {
    routes: Vec<RouteDescriptor>,
    models: IndexMap<String, ModelDescriptor>,
    index: ModuleIndex,
}

impl FastApiSource {
    /// Scan the configured source directories
    pub fn scan(config: &Config) -> Result<Self> {
        let parser = CodeParser::new(&config.project, &config.parsing);
        let files = parser.load_sources(&config.project.source_dirs)?;
        Self::from_sources(&files)
    }

    pub fn from_sources(files: &[SourceFile]) -> Result<Self> {
        let mut parser = PythonParser::new()?;
        let mut index = ModuleIndex::default();

        for file in files {
            let tree = parser.parse(&file.content)?;
            let root = tree.root_node();
            if let Some(row) = first_error_row(root) {
                warn!("Syntax error in {} near line {}, indexing what parsed", file.path.display(), row + 1);
            }
            index.collect_module(root, file);
        }

        let models = index.models();
        let routes = index.resolve_routes();

        info!(
            "Indexed {} routes, {} models and {} functions from {} files",
            routes.len(),
            models.len(),
            index.functions.len(),
            files.len()
        );

        index.routes.clear();
        Ok(Self { routes, models, index })
    }
}

impl ServiceIntrospector for FastApiSource {
    fn routes(&self) -> Result<Vec<RouteDescriptor>> {
        Ok(self.routes.clone())
    }

    fn model(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.get(name).cloned()
    }

    fn dependency(&self, name: &str) -> Option<DependencyDescriptor> {
        if let Some(function) = self.index.lookup(name) {
            let cached = function
                .decorators
                .iter()
                .any(|d| CACHE_DECORATORS.contains(&last_segment(decorator_callee(d))));
            return Some(DependencyDescriptor {
                name: name.to_string(),
                scope: if cached { DependencyScope::Process } else { DependencyScope::Request },
                dependencies: self.index.depends_of(&function.module, &function.params),
            });
        }

        // Classes are valid dependencies; their constructor declares the inputs
        let class = self.index.classes.get(name)?;
        let dependencies = self
            .index
            .functions
            .get(&format!("{}.{}.__init__", class.module, class.name))
            .map(|init| self.index.depends_of(&class.module, &init.params))
            .unwrap_or_default();
        Some(DependencyDescriptor {
            name: name.to_string(),
            scope: DependencyScope::Request,
            dependencies,
        })
    }

    fn function_source(&self, name: &str) -> Option<FunctionSource> {
        self.index.lookup(name).map(|f| f.source.clone())
    }

    fn resolve_callee(&self, caller: &str, callee: &str) -> Option<FunctionSource> {
        let Some(record) = self.index.functions.get(caller) else {
            return self.function_source(callee);
        };

        let method = callee
            .strip_prefix("self.")
            .or_else(|| callee.strip_prefix("cls."))
            .zip(record.class.as_deref())
            .and_then(|(method, class)| {
                self.index
                    .functions
                    .get(&format!("{}.{}.{}", record.module, class, method))
            });

        method
            .or_else(|| self.index.resolve(&record.module, callee))
            .map(|f| f.source.clone())
    }
}

impl ModuleIndex {
    fn collect_module(&mut self, root: Node, file: &SourceFile) {
        let source = file.content.as_str();
        let module = module_name(&file.path);

        for child in named_children(root) {
            match child.kind() {
                "decorated_definition" => {
                    let decorators: Vec<Node> = named_children(child)
                        .into_iter()
                        .filter(|n| n.kind() == "decorator")
                        .collect();
                    let Some(definition) = child.child_by_field_name("definition") else {
                        continue;
                    };
                    match definition.kind() {
                        "function_definition" => {
                            let record = self.collect_function(definition, &decorators, file, &module, None);
                            for decorator in &decorators {
                                if let Some(route) = route_from_decorator(*decorator, &record, &module, source) {
                                    self.routes.push(route);
                                }
                            }
                        }
                        "class_definition" => self.collect_class(definition, file, &module),
                        _ => {}
                    }
                }
                "function_definition" => {
                    self.collect_function(child, &[], file, &module, None);
                }
                "class_definition" => self.collect_class(child, file, &module),
                "expression_statement" => self.collect_statement(child, &module, source),
                "import_statement" | "import_from_statement" => self.collect_import(child, &module, source),
                _ => {}
            }
        }
    }

    fn collect_function(
        &mut self,
        node: Node,
        decorators: &[Node],
        file: &SourceFile,
        module: &str,
        class: Option<&str>,
    ) -> FunctionRecord {
        let source = file.content.as_str();
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default();
        let local = match class {
            Some(class) => format!("{}.{}", class, name),
            None => name.clone(),
        };
        let key = format!("{}.{}", module, local);

        let record = FunctionRecord {
            module: module.to_string(),
            class: class.map(|c| c.to_string()),
            source: FunctionSource {
                name: key.clone(),
                location: SourceLocation::new(file.path.clone(), node.start_position().row + 1),
                text: node_text(node, source).to_string(),
            },
            params: node
                .child_by_field_name("parameters")
                .map(|params| parse_parameters(params, source))
                .unwrap_or_default(),
            return_annotation: node
                .child_by_field_name("return_type")
                .map(|n| node_text(n, source).to_string()),
            decorators: decorators
                .iter()
                .filter_map(|d| d.named_child(0))
                .map(|n| node_text(n, source).to_string())
                .collect(),
            signature: node.child_by_field_name("parameters").map(|params| {
                let mut signature = node_text(params, source).to_string();
                if let Some(returns) = node.child_by_field_name("return_type") {
                    signature.push_str(" -> ");
                    signature.push_str(node_text(returns, source));
                }
                signature
            }),
            docstring: node.child_by_field_name("body").and_then(|body| docstring(body, source)),
        };

        if self.functions.contains_key(&key) {
            debug!("Function {} defined more than once, keeping the first definition", key);
        } else {
            self.locals.entry(local).or_default().push(key.clone());
            self.functions.insert(key, record.clone());
        }
        record
    }

    fn collect_class(&mut self, node: Node, file: &SourceFile, module: &str) {
        let source = file.content.as_str();
        let Some(name) = node.child_by_field_name("name").map(|n| node_text(n, source).to_string()) else {
            return;
        };

        let bases = node
            .child_by_field_name("superclasses")
            .map(|list| {
                named_children(list)
                    .into_iter()
                    .filter(|n| n.kind() != "keyword_argument")
                    .map(|n| last_segment(&dotted_name(n, source)).to_string())
                    .collect()
            })
            .unwrap_or_default();

        let mut fields = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for statement in named_children(body) {
                match statement.kind() {
                    "expression_statement" => {
                        if let Some(field) = statement.named_child(0).and_then(|n| parse_field(n, source)) {
                            fields.push(field);
                        }
                    }
                    "function_definition" => {
                        self.collect_function(statement, &[], file, module, Some(&name));
                    }
                    "decorated_definition" => {
                        let decorators: Vec<Node> = named_children(statement)
                            .into_iter()
                            .filter(|n| n.kind() == "decorator")
                            .collect();
                        if let Some(definition) = statement.child_by_field_name("definition") {
                            if definition.kind() == "function_definition" {
                                self.collect_function(definition, &decorators, file, module, Some(&name));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if !self.classes.contains_key(&name) {
            let module = module.to_string();
            self.classes.insert(name.clone(), ClassRecord { name, module, bases, fields });
        }
    }

    /// Names bound by `import` statements, mapped to dotted module paths
    fn collect_import(&mut self, statement: Node, module: &str, source: &str) {
        // Relative imports resolve by module name, so leading dots are dropped
        let from = statement
            .child_by_field_name("module_name")
            .map(|n| node_text(n, source).trim_start_matches('.').to_string());

        let mut cursor = statement.walk();
        let names: Vec<Node> = statement.children_by_field_name("name", &mut cursor).collect();
        let bindings = self.imports.entry(module.to_string()).or_default();

        for name in names {
            let (path, alias) = match name.kind() {
                "aliased_import" => {
                    let Some(path) = name.child_by_field_name("name") else {
                        continue;
                    };
                    let alias = name.child_by_field_name("alias").map(|a| node_text(a, source).to_string());
                    (node_text(path, source).to_string(), alias)
                }
                _ => (node_text(name, source).to_string(), None),
            };

            let (bound, target) = match (alias, from.as_deref()) {
                (Some(alias), Some(prefix)) if !prefix.is_empty() => (alias, format!("{}.{}", prefix, path)),
                (Some(alias), _) => (alias, path),
                (None, Some(prefix)) if !prefix.is_empty() => (path.clone(), format!("{}.{}", prefix, path)),
                (None, Some(_)) => (path.clone(), path),
                // `import a.b` binds `a`
                (None, None) => {
                    let head = path.split('.').next().unwrap_or_default().to_string();
                    (head.clone(), head)
                }
            };
            bindings.insert(bound, target);
        }
    }

    /// Function a name written inside `module` refers to
    ///
    /// Checks the module's own definitions, then its imports. A dotted name
    /// only resolves through an imported receiver; a bare name may also match
    /// a definition that is unique across the tree.
    fn resolve(&self, module: &str, name: &str) -> Option<&FunctionRecord> {
        if let Some(function) = self.functions.get(&format!("{}.{}", module, name)) {
            return Some(function);
        }

        let (head, rest) = match name.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (name, None),
        };
        if let Some(target) = self.imports.get(module).and_then(|bound| bound.get(head)) {
            let path = match rest {
                Some(rest) => format!("{}.{}", target, rest),
                None => target.clone(),
            };
            return key_candidates(&path).iter().find_map(|key| self.functions.get(key));
        }

        match rest {
            None => self.unique(name),
            Some(_) => None,
        }
    }

    /// Qualified key, or a name defined exactly once in the tree
    fn lookup(&self, name: &str) -> Option<&FunctionRecord> {
        self.functions.get(name).or_else(|| self.unique(name))
    }

    fn unique(&self, local: &str) -> Option<&FunctionRecord> {
        match self.locals.get(local).map(Vec::as_slice) {
            Some([key]) => self.functions.get(key),
            _ => None,
        }
    }

    /// Rewrite a dependency name written in `module` to its qualified key
    fn resolve_ref(&self, module: &str, reference: &DependencyRef) -> DependencyRef {
        let DependencyRef::Named(name) = reference else {
            return reference.clone();
        };
        if let Some(function) = self.resolve(module, name) {
            return DependencyRef::Named(function.source.name.clone());
        }
        let class = last_segment(name);
        if self.classes.contains_key(class) {
            return DependencyRef::Named(class.to_string());
        }
        reference.clone()
    }

    fn depends_of(&self, module: &str, params: &[PyParam]) -> Vec<DependencyRef> {
        params
            .iter()
            .filter_map(|p| match &p.marker {
                ParamMarker::Depends(reference) => Some(self.resolve_ref(module, reference)),
                _ => None,
            })
            .collect()
    }

    /// Router declarations and `include_router` calls
    fn collect_statement(&mut self, statement: Node, module: &str, source: &str) {
        let Some(expression) = statement.named_child(0) else {
            return;
        };

        match expression.kind() {
            "assignment" => {
                let (Some(left), Some(right)) = (
                    expression.child_by_field_name("left"),
                    expression.child_by_field_name("right"),
                ) else {
                    return;
                };
                if left.kind() != "identifier" || right.kind() != "call" {
                    return;
                }
                let callee = call_callee(right, source);
                if !matches!(last_segment(&callee), "APIRouter" | "FastAPI") {
                    return;
                }
                let arguments = CallArguments::read(right, source);
                let var = format!("{}.{}", module, node_text(left, source));
                self.routers.insert(
                    var,
                    RouterDecl {
                        module: module.to_string(),
                        prefix: arguments.keyword_literal("prefix").unwrap_or_default(),
                        dependencies: arguments.dependency_list("dependencies"),
                    },
                );
            }
            "call" => {
                let callee = call_callee(expression, source);
                let Some((parent, "include_router")) = callee.rsplit_once('.') else {
                    return;
                };
                let arguments = CallArguments::read(expression, source);
                let Some(child) = arguments.positional.first() else {
                    return;
                };
                self.includes.push(Include {
                    module: module.to_string(),
                    parent: qualify(parent, module),
                    child: qualify(&dotted_name(*child, source), module),
                    prefix: arguments.keyword_literal("prefix").unwrap_or_default(),
                    dependencies: arguments.dependency_list("dependencies"),
                });
            }
            _ => {}
        }
    }

    /// Pydantic models: classes deriving from a model base, transitively
    fn models(&self) -> IndexMap<String, ModelDescriptor> {
        let mut model_names: HashSet<String> = HashSet::new();
        loop {
            let before = model_names.len();
            for class in self.classes.values() {
                let is_model = class
                    .bases
                    .iter()
                    .any(|b| MODEL_BASES.contains(&b.as_str()) || model_names.contains(b));
                if is_model {
                    model_names.insert(class.name.clone());
                }
            }
            if model_names.len() == before {
                break;
            }
        }

        self.classes
            .values()
            .filter(|class| model_names.contains(&class.name))
            .map(|class| {
                let mut visiting = HashSet::new();
                let descriptor = ModelDescriptor {
                    name: class.name.clone(),
                    fields: self.inherited_fields(&class.name, &mut visiting),
                };
                (class.name.clone(), descriptor)
            })
            .collect()
    }

    fn inherited_fields(&self, name: &str, visiting: &mut HashSet<String>) -> Vec<FieldDescriptor> {
        let Some(class) = self.classes.get(name) else {
            return Vec::new();
        };
        if !visiting.insert(name.to_string()) {
            return Vec::new();
        }

        let mut fields: Vec<FieldDescriptor> = Vec::new();
        for base in &class.bases {
            for field in self.inherited_fields(base, visiting) {
                fields.retain(|f| f.name != field.name);
                fields.push(field);
            }
        }
        for field in &class.fields {
            fields.retain(|f| f.name != field.name);
            fields.push(field.clone());
        }
        fields
    }

    /// Apply router prefixes and router-level dependencies
    fn resolve_routes(&self) -> Vec<RouteDescriptor> {
        let mut mounts: HashMap<String, (String, Vec<DependencyRef>)> = HashMap::new();

        self.routes
            .iter()
            .map(|pending| {
                let (prefix, dependencies) = mounts
                    .entry(pending.router.clone())
                    .or_insert_with(|| self.mount(&pending.router, &mut HashSet::new()))
                    .clone();

                let mut descriptor = pending.descriptor.clone();
                descriptor.path = format!("{}{}", prefix, descriptor.path);
                let mut all = dependencies;
                all.extend(
                    descriptor
                        .dependencies
                        .iter()
                        .map(|reference| self.resolve_ref(&pending.module, reference)),
                );
                descriptor.dependencies = all;
                descriptor
            })
            .collect()
    }

    /// Full prefix and inherited dependencies of a router variable
    fn mount(&self, router: &str, visiting: &mut HashSet<String>) -> (String, Vec<DependencyRef>) {
        let declaration = self.routers.get(router).cloned().unwrap_or_default();
        let own: Vec<DependencyRef> = declaration
            .dependencies
            .iter()
            .map(|reference| self.resolve_ref(&declaration.module, reference))
            .collect();
        if !visiting.insert(router.to_string()) {
            return (declaration.prefix, own);
        }

        let (mut prefix, mut dependencies) = match self.includes.iter().find(|inc| inc.child == router) {
            Some(include) => {
                let (outer, mut outer_deps) = self.mount(&include.parent, visiting);
                outer_deps.extend(
                    include
                        .dependencies
                        .iter()
                        .map(|reference| self.resolve_ref(&include.module, reference)),
                );
                (format!("{}{}", outer, include.prefix), outer_deps)
            }
            None => (String::new(), Vec::new()),
        };

        prefix.push_str(&declaration.prefix);
        dependencies.extend(own);
        (prefix, dependencies)
    }
}

/// Positional and keyword arguments of a call node
struct CallArguments<'tree, 'src> {
    positional: Vec<Node<'tree>>,
    keywords: Vec<(String, Node<'tree>)>,
    source: &'src str,
}

impl<'tree, 'src> CallArguments<'tree, 'src> {
    fn read(call: Node<'tree>, source: &'src str) -> Self {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();

        if let Some(arguments) = call.child_by_field_name("arguments") {
            for argument in named_children(arguments) {
                match argument.kind() {
                    "keyword_argument" => {
                        if let (Some(name), Some(value)) = (
                            argument.child_by_field_name("name"),
                            argument.child_by_field_name("value"),
                        ) {
                            keywords.push((node_text(name, source).to_string(), value));
                        }
                    }
                    "comment" | "list_splat" | "dictionary_splat" => {}
                    _ => positional.push(argument),
                }
            }
        }

        Self { positional, keywords, source }
    }

    fn keyword(&self, name: &str) -> Option<Node<'tree>> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    fn keyword_literal(&self, name: &str) -> Option<String> {
        self.keyword(name).and_then(|node| string_literal(node, self.source))
    }

    fn keyword_text(&self, name: &str) -> Option<String> {
        self.keyword(name).map(|node| node_text(node, self.source).to_string())
    }

    /// `dependencies=[Depends(a), Depends(b)]`
    fn dependency_list(&self, name: &str) -> Vec<DependencyRef> {
        let Some(list) = self.keyword(name) else {
            return Vec::new();
        };
        named_children(list)
            .into_iter()
            .filter_map(|item| match marker_from_call(item, None, self.source) {
                Some(ParamMarker::Depends(reference)) => Some(reference),
                _ => None,
            })
            .collect()
    }
}

fn route_from_decorator(decorator: Node, handler: &FunctionRecord, module: &str, source: &str) -> Option<PendingRoute> {
    let call = decorator.named_child(0).filter(|n| n.kind() == "call")?;
    let callee = call_callee(call, source);
    let (router, verb) = callee.rsplit_once('.')?;

    let arguments = CallArguments::read(call, source);
    let methods = if ROUTE_VERBS.contains(&verb) {
        vec![verb.to_uppercase()]
    } else if verb == "api_route" {
        let listed: Vec<String> = arguments
            .keyword("methods")
            .map(|list| {
                named_children(list)
                    .into_iter()
                    .filter_map(|n| string_literal(n, source))
                    .map(|m| m.to_uppercase())
                    .collect()
            })
            .unwrap_or_default();
        if listed.is_empty() { vec!["GET".to_string()] } else { listed }
    } else {
        return None;
    };

    let path = arguments
        .positional
        .first()
        .and_then(|n| string_literal(*n, source))
        .or_else(|| arguments.keyword_literal("path"))
        .unwrap_or_default();

    let mut parameters = Vec::new();
    let mut dependencies = arguments.dependency_list("dependencies");
    for param in &handler.params {
        match &param.marker {
            ParamMarker::Injected => {}
            ParamMarker::Depends(reference) => dependencies.push(reference.clone()),
            ParamMarker::Source(param_source) => {
                parameters.push(ParamDescriptor::new(&param.name, Some(*param_source), param.annotation.as_deref()))
            }
            ParamMarker::Plain => {
                parameters.push(ParamDescriptor::new(&param.name, None, param.annotation.as_deref()))
            }
        }
    }

    let response_model = arguments
        .keyword_text("response_model")
        .filter(|text| text != "None")
        .or_else(|| handler.return_annotation.clone());

    Some(PendingRoute {
        router: qualify(router, module),
        module: module.to_string(),
        descriptor: RouteDescriptor {
            path,
            methods,
            handler: handler.source.name.clone(),
            parameters,
            response_model,
            dependencies,
            location: Some(handler.source.location.clone()),
            signature: handler.signature.clone(),
            docstring: handler.docstring.clone(),
        },
    })
}

fn parse_parameters(parameters: Node, source: &str) -> Vec<PyParam> {
    let mut params = Vec::new();

    for param in named_children(parameters) {
        let (name, type_node, value) = match param.kind() {
            "identifier" => (Some(node_text(param, source).to_string()), None, None),
            "typed_parameter" => (
                param
                    .named_child(0)
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| node_text(n, source).to_string()),
                param.child_by_field_name("type"),
                None,
            ),
            "default_parameter" | "typed_default_parameter" => (
                param
                    .child_by_field_name("name")
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| node_text(n, source).to_string()),
                param.child_by_field_name("type"),
                param.child_by_field_name("value"),
            ),
            _ => continue,
        };

        let Some(name) = name else { continue };
        if name == "self" || name == "cls" {
            continue;
        }

        let (annotation, annotated_marker) = match type_node {
            Some(node) => split_annotated(node, source),
            None => (None, None),
        };

        let marker = annotated_marker
            .or_else(|| value.and_then(|v| marker_from_call(v, annotation.as_deref(), source)))
            .unwrap_or_else(|| {
                let injected = annotation
                    .as_deref()
                    .map(|a| INJECTED_TYPES.contains(&last_segment(a)))
                    .unwrap_or(false);
                if injected { ParamMarker::Injected } else { ParamMarker::Plain }
            });

        params.push(PyParam { name, annotation, marker });
    }

    params
}

/// `Annotated[T, Depends(x)]` carries its marker inside the annotation
fn split_annotated(type_node: Node, source: &str) -> (Option<String>, Option<ParamMarker>) {
    let text = node_text(type_node, source).to_string();
    let Some(subscript) = type_node.named_child(0).filter(|n| n.kind() == "subscript") else {
        return (Some(text), None);
    };
    let is_annotated = subscript
        .child_by_field_name("value")
        .map(|v| last_segment(&dotted_name(v, source)) == "Annotated")
        .unwrap_or(false);
    if !is_annotated {
        return (Some(text), None);
    }

    let mut cursor = subscript.walk();
    let parts: Vec<Node> = subscript.children_by_field_name("subscript", &mut cursor).collect();
    let Some(inner) = parts.first() else {
        return (Some(text), None);
    };
    let inner_text = node_text(*inner, source).to_string();
    let marker = parts
        .iter()
        .skip(1)
        .find_map(|part| marker_from_call(*part, Some(&inner_text), source));
    (Some(inner_text), marker)
}

fn marker_from_call(value: Node, annotation: Option<&str>, source: &str) -> Option<ParamMarker> {
    if value.kind() != "call" {
        return None;
    }
    let callee = call_callee(value, source);
    let marker = match last_segment(&callee) {
        "Depends" | "Security" => {
            let arguments = CallArguments::read(value, source);
            let target = arguments
                .positional
                .first()
                .copied()
                .or_else(|| arguments.keyword("dependency"));
            let reference = match target {
                Some(node) if matches!(node.kind(), "identifier" | "attribute") => {
                    DependencyRef::Named(dotted_name(node, source))
                }
                Some(node) => DependencyRef::Dynamic(node_text(node, source).to_string()),
                None => match annotation {
                    Some(a) if a.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') => {
                        DependencyRef::Named(a.to_string())
                    }
                    _ => DependencyRef::Dynamic(node_text(value, source).to_string()),
                },
            };
            ParamMarker::Depends(reference)
        }
        "Query" => ParamMarker::Source(ParamSource::Query),
        "Path" => ParamMarker::Source(ParamSource::Path),
        "Body" | "Form" | "File" => ParamMarker::Source(ParamSource::Body),
        "Header" | "Cookie" => ParamMarker::Source(ParamSource::Header),
        _ => return None,
    };
    Some(marker)
}

/// Annotated class attribute, e.g. `price: float = 0.0`
fn parse_field(node: Node, source: &str) -> Option<FieldDescriptor> {
    if node.kind() != "assignment" {
        return None;
    }
    let left = node.child_by_field_name("left").filter(|n| n.kind() == "identifier")?;
    let declared = node.child_by_field_name("type")?;
    let declared_type = node_text(declared, source).to_string();
    if declared_type.starts_with("ClassVar") {
        return None;
    }

    let (required, default) = match node.child_by_field_name("right") {
        None => (!is_optional(&declared_type), None),
        Some(value) if value.kind() == "call" && last_segment(&call_callee(value, source)) == "Field" => {
            let arguments = CallArguments::read(value, source);
            match arguments.positional.first().copied().or_else(|| arguments.keyword("default")) {
                Some(first) if first.kind() == "ellipsis" => (true, None),
                Some(first) => (false, Some(node_text(first, source).to_string())),
                None => (arguments.keyword("default_factory").is_none(), None),
            }
        }
        Some(value) => (false, Some(node_text(value, source).to_string())),
    };

    Some(FieldDescriptor {
        name: node_text(left, source).to_string(),
        declared_type,
        required,
        default,
    })
}

fn is_optional(declared: &str) -> bool {
    declared.starts_with("Optional[")
        || declared.split('|').any(|part| part.trim() == "None")
}

/// First statement of a body when it is a plain string, dedented
fn docstring(body: Node, source: &str) -> Option<String> {
    let first = body.named_child(0).filter(|n| n.kind() == "expression_statement")?;
    let text = string_literal(first.named_child(0)?, source)?;
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let doc = lines.join("\n").trim().to_string();
    if doc.is_empty() { None } else { Some(doc) }
}

/// Candidate function keys for a dotted import path, innermost module first
///
/// `app.deps.get_db` -> `deps.get_db`, `app.deps.get_db`
fn key_candidates(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('.').collect();
    (0..segments.len().saturating_sub(1))
        .rev()
        .map(|start| segments[start..].join("."))
        .collect()
}

fn call_callee(call: Node, source: &str) -> String {
    call.child_by_field_name("function")
        .map(|f| dotted_name(f, source))
        .unwrap_or_default()
}

fn decorator_callee(decorator: &str) -> &str {
    decorator.split('(').next().unwrap_or(decorator)
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// `router` -> `users.router`; `routers.users.router` -> `users.router`
fn qualify(name: &str, module: &str) -> String {
    let segments: Vec<&str> = name.split('.').collect();
    match segments.as_slice() {
        [single] => format!("{}.{}", module, single),
        [.., module, var] => format!("{}.{}", module, var),
        [] => format!("{}.", module),
    }
}
