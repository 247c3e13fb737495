use tree_sitter::{Node, Parser, Tree};

use crate::error::{MapperError, Result};

/// Python parser using Tree-sitter
pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let python_language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        parser.set_language(&python_language)
            .map_err(|e| MapperError::Parser(format!("Failed to set Python language: {}", e)))?;

        Ok(Self { parser })
    }

    pub fn parse(&mut self, content: &str) -> Result<Tree> {
        self.parser.parse(content, None)
            .ok_or_else(|| MapperError::Parser("Failed to parse Python code".to_string()))
    }
}

/// Extract text content of a node
pub fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// First line with a syntax error, 0-based within the parsed text
pub fn first_error_row(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error_row)
}

/// Value of a plain string literal; f-strings and concatenations are not literals
pub fn string_literal(node: Node, source: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut cursor = node.walk();
    if node.children(&mut cursor).any(|child| child.kind() == "interpolation") {
        return None;
    }

    let text = node_text(node, source);
    let body = text.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    if text[..text.len() - body.len()].to_lowercase().contains('f') {
        return None;
    }

    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= quote.len() * 2 && body.starts_with(quote) && body.ends_with(quote) {
            return Some(body[quote.len()..body.len() - quote.len()].to_string());
        }
    }
    None
}

/// Render a callee expression as a dotted chain, e.g. `db.query(...).filter`
pub fn dotted_name(node: Node, source: &str) -> String {
    match node.kind() {
        "identifier" => node_text(node, source).to_string(),
        "attribute" => {
            let object = node
                .child_by_field_name("object")
                .map(|n| dotted_name(n, source))
                .unwrap_or_else(|| "<dynamic>".to_string());
            let attribute = node
                .child_by_field_name("attribute")
                .map(|n| node_text(n, source))
                .unwrap_or_default();
            format!("{}.{}", object, attribute)
        }
        "call" => {
            let function = node
                .child_by_field_name("function")
                .map(|n| dotted_name(n, source))
                .unwrap_or_else(|| "<dynamic>".to_string());
            format!("{}(...)", function)
        }
        "subscript" => {
            let value = node
                .child_by_field_name("value")
                .map(|n| dotted_name(n, source))
                .unwrap_or_else(|| "<dynamic>".to_string());
            match node.child_by_field_name("subscript").and_then(|n| string_literal(n, source)) {
                Some(key) => format!("{}[\"{}\"]", value, key),
                None => format!("{}[...]", value),
            }
        }
        "parenthesized_expression" => node
            .named_child(0)
            .map(|n| dotted_name(n, source))
            .unwrap_or_else(|| "<dynamic>".to_string()),
        _ => "<dynamic>".to_string(),
    }
}

/// First descendant (or self) of the given kind, in pre-order
pub fn find_first<'tree>(node: Node<'tree>, kind: &str) -> Option<Node<'tree>> {
    if node.kind() == kind {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'tree>> = node.named_children(&mut cursor).collect();
    children.into_iter().find_map(|child| find_first(child, kind))
}

/// Named children, collected so callers don't juggle cursors
pub fn named_children<'tree>(node: Node<'tree>) -> Vec<Node<'tree>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}
