// src/core/call_graph/call_chain_tracer.rs
use tracing::{debug, warn};
use tree_sitter::Node;

use crate::error::{MapperError, Result};
use super::super::app::{FunctionSource, ServiceIntrospector, SourceLocation};
use super::super::graph::{DataAccess, DataReference, Truncation};
use super::super::languages::python::{
    dotted_name, find_first, first_error_row, named_children, node_text, string_literal, PythonParser,
};

/// Traces execution paths from route handlers through sourced callees
pub struct CallChainTracer {
    parser: PythonParser,
    /// Maximum depth to trace (prevents runaway expansion)
    max_depth: usize,
}

/// Shape of one call expression, as much as static reading can recover
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// Dotted callee chain, e.g. `db.query(...).filter`
    pub callee: String,
    /// Positional arguments that are plain string literals
    pub literal_args: Vec<Option<String>>,
    /// Literal key of a subscripted or `get_collection("x")` receiver
    pub subscript_literal: Option<String>,
}

/// One call in a traced chain, in source-appearance order
#[derive(Debug, Clone)]
pub struct TracedCall {
    pub order: usize,
    pub depth: usize,
    /// Order of the call whose callee body contains this one
    pub parent: Option<usize>,
    pub caller: String,
    pub site: CallSite,
    pub location: SourceLocation,
    pub data_references: Vec<DataReference>,
    pub truncated: Option<Truncation>,
    /// Direct operand of the handler's `return`
    pub returned: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TracedChain {
    pub calls: Vec<TracedCall>,
    pub error: Option<String>,
}

/// Call site collected from one function body before expansion
struct RawCall {
    site: CallSite,
    row: usize,
    data_references: Vec<DataReference>,
    returned: bool,
}

/// Mutable state shared across one handler's expansion
struct TraceState<'a> {
    introspector: &'a dyn ServiceIntrospector,
    stack: Vec<String>,
    calls: Vec<TracedCall>,
}

impl CallChainTracer {
    pub fn new(max_depth: usize) -> Result<Self> {
        Ok(Self {
            parser: PythonParser::new()?,
            max_depth,
        })
    }

    /// Trace the chain rooted at a handler
    ///
    /// A handler without available source yields an empty chain and no error;
    /// a handler that fails to parse yields an empty chain carrying the error.
    pub fn trace(&mut self, handler: &str, introspector: &dyn ServiceIntrospector) -> TracedChain {
        let Some(function) = introspector.function_source(handler) else {
            debug!("No source available for handler {}", handler);
            return TracedChain::default();
        };

        let mut state = TraceState {
            introspector,
            stack: vec![function.name.clone()],
            calls: Vec::new(),
        };

        match self.trace_function(&function, 0, None, &mut state) {
            Ok(()) => {
                debug!("Traced {} calls from {}", state.calls.len(), handler);
                TracedChain { calls: state.calls, error: None }
            }
            Err(e) => {
                warn!("Cannot trace handler {}: {}", handler, e);
                TracedChain { calls: Vec::new(), error: Some(e.to_string()) }
            }
        }
    }

    fn trace_function(
        &mut self,
        function: &FunctionSource,
        depth: usize,
        parent: Option<usize>,
        state: &mut TraceState<'_>,
    ) -> Result<()> {
        let raw_calls = self.collect_calls(function)?;

        for raw in raw_calls {
            let order = state.calls.len();
            let target = if is_resolvable(&raw.site.callee) {
                state.introspector.resolve_callee(&function.name, &raw.site.callee)
            } else {
                None
            };

            let truncated = match &target {
                Some(target) if state.stack.contains(&target.name) => Some(Truncation::Recursion),
                Some(_) if depth + 1 >= self.max_depth => Some(Truncation::DepthLimit),
                _ => None,
            };

            state.calls.push(TracedCall {
                order,
                depth,
                parent,
                caller: function.name.clone(),
                site: raw.site,
                location: SourceLocation::new(function.location.file.clone(), function.location.line + raw.row),
                data_references: raw.data_references,
                truncated,
                returned: raw.returned && depth == 0,
            });

            let Some(target) = target.filter(|_| truncated.is_none()) else {
                continue;
            };

            state.stack.push(target.name.clone());
            if let Err(e) = self.trace_function(&target, depth + 1, Some(order), state) {
                warn!("Not expanding {}: {}", target.name, e);
            }
            state.stack.pop();
        }

        Ok(())
    }

    /// Call sites of a function body in execution order, skipping nested scopes
    fn collect_calls(&mut self, function: &FunctionSource) -> Result<Vec<RawCall>> {
        let source = function.text.as_str();
        let tree = self.parser.parse(source)?;
        let root = tree.root_node();

        if let Some(row) = first_error_row(root) {
            return Err(MapperError::Parser(format!(
                "syntax error in {} at {}:{}",
                function.name,
                function.location.file.display(),
                function.location.line + row
            )));
        }

        let Some(body) = find_first(root, "function_definition").and_then(|def| def.child_by_field_name("body")) else {
            return Ok(Vec::new());
        };

        let mut calls = Vec::new();
        walk_calls(body, source, &mut calls);
        Ok(calls)
    }
}

fn walk_calls(node: Node, source: &str, calls: &mut Vec<RawCall>) {
    if matches!(node.kind(), "function_definition" | "class_definition" | "lambda" | "decorated_definition") {
        return;
    }

    if node.kind() != "call" {
        for child in named_children(node) {
            walk_calls(child, source, calls);
        }
        return;
    }

    // Receiver calls execute first: `db.query(User).first()` is `query`, then `first`
    if let Some(function) = node.child_by_field_name("function") {
        walk_calls(function, source, calls);
    }
    calls.push(RawCall {
        site: call_site(node, source),
        row: node.start_position().row,
        data_references: data_references(node, source),
        returned: enclosing_statement(node).map_or(false, |(parent, _)| parent.kind() == "return_statement"),
    });
    if let Some(arguments) = node.child_by_field_name("arguments") {
        walk_calls(arguments, source, calls);
    }
}

fn call_site(call: Node, source: &str) -> CallSite {
    let function = call.child_by_field_name("function");
    let callee = function
        .map(|f| dotted_name(f, source))
        .unwrap_or_else(|| "<dynamic>".to_string());

    let literal_args = positional_arguments(call)
        .into_iter()
        .map(|arg| literal_argument(arg, source))
        .collect();

    let subscript_literal = function
        .filter(|f| f.kind() == "attribute")
        .and_then(|f| f.child_by_field_name("object"))
        .and_then(|receiver| match receiver.kind() {
            "subscript" => receiver
                .child_by_field_name("subscript")
                .and_then(|key| string_literal(key, source)),
            "call" => {
                let name = receiver
                    .child_by_field_name("function")
                    .map(|f| dotted_name(f, source))
                    .unwrap_or_default();
                if name.rsplit('.').next() == Some("get_collection") {
                    positional_arguments(receiver)
                        .first()
                        .and_then(|arg| string_literal(*arg, source))
                } else {
                    None
                }
            }
            _ => None,
        });

    CallSite { callee, literal_args, subscript_literal }
}

fn positional_arguments(call: Node) -> Vec<Node> {
    call.child_by_field_name("arguments")
        .filter(|args| args.kind() == "argument_list")
        .map(|args| {
            named_children(args)
                .into_iter()
                .filter(|arg| !matches!(arg.kind(), "keyword_argument" | "comment" | "list_splat" | "dictionary_splat"))
                .collect()
        })
        .unwrap_or_default()
}

/// String literal argument, looking through `text("...")` wrappers
fn literal_argument(arg: Node, source: &str) -> Option<String> {
    if let Some(literal) = string_literal(arg, source) {
        return Some(literal);
    }
    if arg.kind() != "call" {
        return None;
    }
    let wrapper = arg
        .child_by_field_name("function")
        .map(|f| dotted_name(f, source))
        .unwrap_or_default();
    if wrapper.rsplit('.').next() != Some("text") {
        return None;
    }
    positional_arguments(arg)
        .first()
        .and_then(|inner| string_literal(*inner, source))
}

fn data_references(call: Node, source: &str) -> Vec<DataReference> {
    let mut reads = Vec::new();

    if let Some(receiver) = call
        .child_by_field_name("function")
        .filter(|f| f.kind() == "attribute")
        .and_then(receiver_root)
    {
        reads.push(node_text(receiver, source).to_string());
    }
    if let Some(arguments) = call.child_by_field_name("arguments") {
        read_identifiers(arguments, source, &mut reads);
    }

    let mut writes = Vec::new();
    if let Some((statement, child)) = enclosing_statement(call) {
        let is_rhs = statement
            .child_by_field_name("right")
            .map_or(false, |right| right.id() == child.id());
        if is_rhs && matches!(statement.kind(), "assignment" | "augmented_assignment") {
            if let Some(left) = statement.child_by_field_name("left") {
                written_names(left, source, &mut writes);
            }
        }
    }

    let mut references: Vec<DataReference> = Vec::new();
    let tagged = reads
        .into_iter()
        .map(|name| (name, DataAccess::Read))
        .chain(writes.into_iter().map(|name| (name, DataAccess::Write)));
    for (name, access) in tagged {
        if !references.iter().any(|r| r.name == name && r.access == access) {
            references.push(DataReference { name, access });
        }
    }
    references
}

/// Leftmost identifier of a receiver chain, e.g. `db` in `db.query(...).filter`
fn receiver_root(attribute: Node) -> Option<Node> {
    let mut current = attribute.child_by_field_name("object")?;
    loop {
        let next = match current.kind() {
            "identifier" => return Some(current),
            "attribute" => current.child_by_field_name("object"),
            "call" => current.child_by_field_name("function"),
            "subscript" => current.child_by_field_name("value"),
            "parenthesized_expression" => current.named_child(0),
            _ => None,
        };
        current = next?;
    }
}

fn read_identifiers(node: Node, source: &str, reads: &mut Vec<String>) {
    match node.kind() {
        "identifier" => {
            let name = node_text(node, source).to_string();
            if !reads.contains(&name) {
                reads.push(name);
            }
        }
        "keyword_argument" => {
            if let Some(value) = node.child_by_field_name("value") {
                read_identifiers(value, source, reads);
            }
        }
        "attribute" => {
            if let Some(object) = node.child_by_field_name("object") {
                read_identifiers(object, source, reads);
            }
        }
        "call" => {
            // A bare callee name is not data
            if let Some(function) = node.child_by_field_name("function") {
                if function.kind() != "identifier" {
                    read_identifiers(function, source, reads);
                }
            }
            if let Some(arguments) = node.child_by_field_name("arguments") {
                read_identifiers(arguments, source, reads);
            }
        }
        "lambda" | "function_definition" => {}
        _ => {
            for child in named_children(node) {
                read_identifiers(child, source, reads);
            }
        }
    }
}

fn written_names(target: Node, source: &str, writes: &mut Vec<String>) {
    match target.kind() {
        "identifier" | "attribute" | "subscript" => writes.push(node_text(target, source).to_string()),
        "pattern_list" | "tuple_pattern" | "list_pattern" => {
            for child in named_children(target) {
                written_names(child, source, writes);
            }
        }
        _ => {}
    }
}

/// First ancestor that is not `await` or parentheses, with the child leading to it
fn enclosing_statement(node: Node) -> Option<(Node, Node)> {
    let mut child = node;
    let mut parent = node.parent()?;
    while matches!(parent.kind(), "await" | "parenthesized_expression") {
        child = parent;
        parent = parent.parent()?;
    }
    Some((parent, child))
}

fn is_resolvable(callee: &str) -> bool {
    !callee.contains("(...)") && !callee.contains('[') && !callee.contains("<dynamic>")
}
