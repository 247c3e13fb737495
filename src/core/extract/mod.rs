//! Route and schema extraction from the host's registry

mod models;
mod routes;

pub use models::{ModelExtraction, ModelExtractor};
pub use routes::{ExtractedRoute, RouteExtractor};

/// Identifiers mentioned in a declared type, e.g. `List[Item]` -> `List`, `Item`
pub(crate) fn type_identifiers(declared: &str) -> Vec<String> {
    let mut identifiers = Vec::new();
    let mut current = String::new();

    for ch in declared.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            push_identifier(&mut identifiers, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        push_identifier(&mut identifiers, current);
    }

    identifiers
}

fn push_identifier(identifiers: &mut Vec<String>, candidate: String) {
    let starts_like_identifier = candidate
        .chars()
        .next()
        .map_or(false, |c| c.is_alphabetic() || c == '_');
    if starts_like_identifier && !identifiers.contains(&candidate) {
        identifiers.push(candidate);
    }
}
