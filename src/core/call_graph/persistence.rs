// src/core/call_graph/persistence.rs
//! Static persistence detection over traced call sites
//!
//! Only call shapes from a fixed catalog are reported, and only literal
//! arguments can name a table or collection.

use regex::Regex;

use crate::error::{MapperError, Result};
use super::super::graph::{DbOperationKind, DbTarget};
use super::CallSite;

/// How an operation's kind is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindRule {
    Fixed(DbOperationKind),
    /// Leading verb of a literal SQL argument
    SqlDerived,
}

/// Catalog family and its recognised methods
struct Family {
    api: &'static str,
    operations: &'static [(&'static str, KindRule)],
    /// Whether a bare identifier literal names the target
    literal_target: bool,
}

use DbOperationKind::{Delete, Insert, Read, Unknown, Update};
use KindRule::{Fixed, SqlDerived};

static SQL_SESSION: Family = Family {
    api: "sql.session",
    operations: &[
        ("query", Fixed(Read)),
        ("get", Fixed(Read)),
        ("scalars", Fixed(Read)),
        ("scalar", Fixed(Read)),
        ("add", Fixed(Insert)),
        ("add_all", Fixed(Insert)),
        ("bulk_save_objects", Fixed(Insert)),
        ("merge", Fixed(Update)),
        ("delete", Fixed(Delete)),
        ("execute", SqlDerived),
        ("commit", Fixed(Unknown)),
        ("flush", Fixed(Unknown)),
    ],
    literal_target: true,
};

static SQL_DBAPI: Family = Family {
    api: "sql.dbapi",
    operations: &[
        ("execute", SqlDerived),
        ("executemany", SqlDerived),
        ("fetchone", Fixed(Read)),
        ("fetchall", Fixed(Read)),
        ("fetchmany", Fixed(Read)),
    ],
    literal_target: true,
};

static MONGODB: Family = Family {
    api: "mongodb",
    operations: &[
        ("find", Fixed(Read)),
        ("find_one", Fixed(Read)),
        ("aggregate", Fixed(Read)),
        ("count_documents", Fixed(Read)),
        ("insert_one", Fixed(Insert)),
        ("insert_many", Fixed(Insert)),
        ("update_one", Fixed(Update)),
        ("update_many", Fixed(Update)),
        ("replace_one", Fixed(Update)),
        ("delete_one", Fixed(Delete)),
        ("delete_many", Fixed(Delete)),
    ],
    literal_target: false,
};

static ORM_MANAGER: Family = Family {
    api: "orm.manager",
    operations: &[
        ("filter", Fixed(Read)),
        ("get", Fixed(Read)),
        ("all", Fixed(Read)),
        ("first", Fixed(Read)),
        ("count", Fixed(Read)),
        ("exclude", Fixed(Read)),
        ("create", Fixed(Insert)),
        ("bulk_create", Fixed(Insert)),
        ("update", Fixed(Update)),
        ("delete", Fixed(Delete)),
    ],
    literal_target: false,
};

/// A call site recognised as a persistence operation
#[derive(Debug, Clone, PartialEq)]
pub struct DbOperation {
    pub kind: DbOperationKind,
    pub target: DbTarget,
    pub api: &'static str,
    pub operation: String,
}

pub struct PersistenceClassifier {
    sql_verb: Regex,
    sql_table: Regex,
    identifier: Regex,
}

impl PersistenceClassifier {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| MapperError::Parser(format!("Invalid catalog pattern: {}", e)))
        };
        Ok(Self {
            sql_verb: compile(r"(?i)^\s*(SELECT|INSERT|UPDATE|DELETE|WITH|CREATE|DROP|ALTER|REPLACE)\b")?,
            sql_table: compile(r#"(?i)\b(?:FROM|INTO|UPDATE)\s+[`"\[]?([A-Za-z_][A-Za-z0-9_.]*)"#)?,
            identifier: compile(r"^[A-Za-z_][A-Za-z0-9_.]*$")?,
        })
    }

    /// Classify a call site, or `None` when it does not conclusively match
    pub fn classify(&self, site: &CallSite) -> Option<DbOperation> {
        let segments = split_segments(&site.callee);
        let (method, receiver) = segments.split_last()?;
        let receiver_segment = *receiver.last()?;
        let before_receiver = receiver.len().checked_sub(2).and_then(|i| receiver.get(i)).copied();

        let family = family_for(receiver_segment, before_receiver)?;
        let (_, rule) = family.operations.iter().find(|(name, _)| name == method)?;

        let literal = site.literal_args.first().and_then(|arg| arg.as_deref());
        let (kind, target) = if family.api == MONGODB.api {
            let target = site
                .subscript_literal
                .clone()
                .map(DbTarget::Resolved)
                .unwrap_or(DbTarget::Unresolved);
            (self.kind_from(*rule, None), target)
        } else {
            self.resolve_literal(family, *rule, literal)
        };

        Some(DbOperation {
            kind,
            target,
            api: family.api,
            operation: method.to_string(),
        })
    }

    fn resolve_literal(&self, family: &Family, rule: KindRule, literal: Option<&str>) -> (DbOperationKind, DbTarget) {
        let Some(literal) = literal else {
            return (self.kind_from(rule, None), DbTarget::Unresolved);
        };

        if self.sql_verb.is_match(literal) {
            let target = self
                .sql_table
                .captures(literal)
                .and_then(|cap| cap.get(1))
                .map(|m| DbTarget::Resolved(m.as_str().to_string()))
                .unwrap_or(DbTarget::Unresolved);
            return (self.kind_from(rule, Some(literal)), target);
        }

        let target = if family.literal_target && self.identifier.is_match(literal.trim()) {
            DbTarget::Resolved(literal.trim().to_string())
        } else {
            DbTarget::Unresolved
        };
        (self.kind_from(rule, None), target)
    }

    fn kind_from(&self, rule: KindRule, sql: Option<&str>) -> DbOperationKind {
        match rule {
            Fixed(kind) => kind,
            SqlDerived => sql
                .and_then(|sql| self.sql_verb.captures(sql))
                .and_then(|cap| cap.get(1))
                .map(|verb| match verb.as_str().to_uppercase().as_str() {
                    "SELECT" | "WITH" => Read,
                    "INSERT" | "REPLACE" => Insert,
                    "UPDATE" => Update,
                    "DELETE" => Delete,
                    _ => Unknown,
                })
                .unwrap_or(Unknown),
        }
    }
}

/// Pick the family from the receiver shape; first match wins
fn family_for(receiver: &str, before_receiver: Option<&str>) -> Option<&'static Family> {
    let subscripted = receiver.contains('[');
    let base = strip_brackets(receiver);
    let tokens: Vec<String> = base.split('_').map(|t| t.to_lowercase()).collect();
    let has = |names: &[&str]| tokens.iter().any(|t| names.contains(&t.as_str()));
    let is_db = |name: &str| matches!(name, "db" | "database");

    if base == "objects" {
        return Some(&ORM_MANAGER);
    }
    if has(&["collection", "coll"]) || base.ends_with("get_collection") {
        return Some(&MONGODB);
    }
    if has(&["cursor", "conn", "connection"]) || matches!(base.as_str(), "cur" | "engine") {
        return Some(&SQL_DBAPI);
    }
    if has(&["session"]) {
        return Some(&SQL_SESSION);
    }
    // `db["users"]` or `db.users` address a collection
    if (subscripted && is_db(&base.to_lowercase()))
        || (!receiver.contains('(') && before_receiver.map_or(false, |seg| is_db(&strip_brackets(seg).to_lowercase())))
    {
        return Some(&MONGODB);
    }
    if is_db(&base.to_lowercase()) {
        return Some(&SQL_SESSION);
    }
    None
}

/// Split a dotted callee on top-level dots only, e.g. `db["a.b"].find`
fn split_segments(callee: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;

    for (i, ch) in callee.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '(' | '[' if !quoted => depth += 1,
            ')' | ']' if !quoted => depth -= 1,
            '.' if depth == 0 && !quoted => {
                segments.push(&callee[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&callee[start..]);
    segments
}

/// `find(...)` -> `find`, `db["users"]` -> `db`
fn strip_brackets(segment: &str) -> String {
    segment
        .split(|c| c == '(' || c == '[')
        .next()
        .unwrap_or(segment)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(callee: &str, literal: Option<&str>) -> CallSite {
        CallSite {
            callee: callee.to_string(),
            literal_args: vec![literal.map(|l| l.to_string())],
            subscript_literal: None,
        }
    }

    fn classify(site: &CallSite) -> Option<DbOperation> {
        PersistenceClassifier::new().unwrap().classify(site)
    }

    #[test]
    fn test_literal_sql_resolves_kind_and_table() {
        let op = classify(&site("cursor.execute", Some("SELECT * FROM users WHERE id = ?"))).unwrap();
        assert_eq!(op.api, "sql.dbapi");
        assert_eq!(op.kind, DbOperationKind::Read);
        assert_eq!(op.target, DbTarget::Resolved("users".to_string()));

        let op = classify(&site("self.conn.execute", Some("insert into orders (id) values (?)"))).unwrap();
        assert_eq!(op.kind, DbOperationKind::Insert);
        assert_eq!(op.target, DbTarget::Resolved("orders".to_string()));

        let op = classify(&site("db.execute", Some("UPDATE items SET price = 1"))).unwrap();
        assert_eq!(op.api, "sql.session");
        assert_eq!(op.kind, DbOperationKind::Update);
        assert_eq!(op.target, DbTarget::Resolved("items".to_string()));
    }

    #[test]
    fn test_identifier_literal_and_dynamic_arguments() {
        let op = classify(&site("db.execute", Some("users"))).unwrap();
        assert_eq!(op.kind, DbOperationKind::Unknown);
        assert_eq!(op.target, DbTarget::Resolved("users".to_string()));

        let op = classify(&site("cursor.execute", None)).unwrap();
        assert_eq!(op.kind, DbOperationKind::Unknown);
        assert_eq!(op.target, DbTarget::Unresolved);
    }

    #[test]
    fn test_session_and_orm_families() {
        let op = classify(&site("db.query(...).filter(...).first", None));
        assert!(op.is_none());

        let op = classify(&site("db.query", None)).unwrap();
        assert_eq!((op.api, op.kind), ("sql.session", DbOperationKind::Read));

        let op = classify(&site("session.add", None)).unwrap();
        assert_eq!(op.kind, DbOperationKind::Insert);

        let op = classify(&site("db.session.commit", None)).unwrap();
        assert_eq!((op.api, op.kind), ("sql.session", DbOperationKind::Unknown));

        let op = classify(&site("Article.objects.filter", None)).unwrap();
        assert_eq!((op.api, op.kind), ("orm.manager", DbOperationKind::Read));
        assert_eq!(op.target, DbTarget::Unresolved);
    }

    #[test]
    fn test_mongodb_targets_come_from_subscripts_only() {
        let mut find = site("db[\"users\"].find_one", None);
        find.subscript_literal = Some("users".to_string());
        let op = classify(&find).unwrap();
        assert_eq!((op.api, op.kind), ("mongodb", DbOperationKind::Read));
        assert_eq!(op.target, DbTarget::Resolved("users".to_string()));

        let op = classify(&site("db.orders.insert_one", None)).unwrap();
        assert_eq!((op.api, op.kind), ("mongodb", DbOperationKind::Insert));
        assert_eq!(op.target, DbTarget::Unresolved);

        let op = classify(&site("user_collection.delete_many", None)).unwrap();
        assert_eq!(op.kind, DbOperationKind::Delete);
    }

    #[test]
    fn test_lookalikes_are_omitted() {
        assert!(classify(&site("items.append", None)).is_none());
        assert!(classify(&site("cache.get", Some("users"))).is_none());
        assert!(classify(&site("cursor.close", None)).is_none());
        assert!(classify(&site("execute", Some("SELECT 1"))).is_none());
    }
}
