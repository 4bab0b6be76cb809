//! Checks a generated query against the fetched schema and the `[query]`
//! policy before it reaches the store.
//!
//! The guard works on query text, not a parsed AST. String literals are
//! masked before any pattern runs, so a quoted `'(:Foo)'` or `'CREATE'` is
//! never mistaken for structure.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::config::QueryConfig;
use crate::graph::Schema;

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).expect("valid literal regex")
});

static QUOTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`]*`").expect("valid quoted-name regex"));

/// `(n:A:B)`, `(:A&B)`, `(n:A|B)`; group 1 holds the label expression.
static NODE_LABELS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\(\s*(?:[A-Za-z_]\w*\s*)?(:\s*(?:`[^`]+`|[A-Za-z_]\w*)(?:\s*[:&|]\s*(?:`[^`]+`|[A-Za-z_]\w*))*)",
    )
    .expect("valid node-label regex")
});

/// `[r:T]`, `[:A|B]`, `[:A|:B]`, `[r:!T]`; group 1 holds the type expression.
static REL_TYPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[\s*(?:[A-Za-z_]\w*\s*)?(:\s*!?(?:`[^`]+`|[A-Za-z_]\w*)(?:\s*\|\s*:?\s*!?(?:`[^`]+`|[A-Za-z_]\w*))*)",
    )
    .expect("valid relationship-type regex")
});

/// `n.name = ...` but not `=~`, `<=` or `>=`.
static EXACT_NAME_EQ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*\.(?:name|title))\s*=(?:[^~]|$)").expect("valid equality regex")
});

/// `'NVIC' = n.name` (literal already masked to `''`).
static EXACT_NAME_EQ_REVERSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:''|\$\w+)\s*=\s*([A-Za-z_]\w*\.(?:name|title))\b").expect("valid equality regex")
});

/// `(n:Entity {name: 'NVIC'})`
static INLINE_NAME_MAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\(\s*(?:[A-Za-z_]\w*\s*(?::\s*[\w`&|:\s]+)?|:\s*[\w`&|:\s]+)\{[^}]*\b(name|title)\s*:",
    )
    .expect("valid inline-map regex")
});

static WRITE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[^.:\w])(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP|FOREACH|CALL|LOAD\s+CSV)\b",
    )
    .expect("valid write-clause regex")
});

static LIMIT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("valid limit regex"));

static RETURN_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bRETURN\b").expect("valid return regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("unknown node label '{0}'")]
    UnknownLabel(String),
    #[error("unknown relationship type '{0}'")]
    UnknownRelationshipType(String),
    #[error("exact match on '{0}'; use toLower(..) CONTAINS toLower(..)")]
    ExactNameMatch(String),
    #[error("write clause '{0}' not allowed")]
    WriteClause(String),
}

/// A query that passed the guard, possibly with a `LIMIT` appended, plus the
/// non-fatal findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardReport {
    pub query: String,
    pub warnings: Vec<Violation>,
}

/// Run every enabled check. Rejections are returned all at once.
pub fn apply(query: &str, schema: &Schema, policy: &QueryConfig) -> Result<GuardReport, Vec<Violation>> {
    let masked = mask_literals(query);
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    if policy.enforce_schema {
        violations.extend(
            labels_in(&masked)
                .into_iter()
                .filter(|l| !schema.has_label(l))
                .map(Violation::UnknownLabel),
        );
        violations.extend(
            relationship_types_in(&masked)
                .into_iter()
                .filter(|t| !schema.has_relationship_type(t))
                .map(Violation::UnknownRelationshipType),
        );
    }

    let exact: Vec<Violation> = exact_matches_in(&masked)
        .into_iter()
        .map(Violation::ExactNameMatch)
        .collect();
    if policy.strict_name_matching {
        violations.extend(exact);
    } else {
        warnings.extend(exact);
    }

    if policy.read_only {
        violations.extend(write_clauses_in(&masked).into_iter().map(Violation::WriteClause));
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    let query = match policy.default_limit {
        Some(limit) => ensure_limit(query, limit),
        None => query.to_string(),
    };
    Ok(GuardReport { query, warnings })
}

/// Node labels used in node patterns, backticks removed.
pub fn referenced_labels(query: &str) -> BTreeSet<String> {
    labels_in(&mask_literals(query))
}

/// Relationship types used in relationship patterns, backticks removed.
pub fn referenced_relationship_types(query: &str) -> BTreeSet<String> {
    relationship_types_in(&mask_literals(query))
}

/// Name-like properties compared with `=` or matched by an inline map.
pub fn exact_name_matches(query: &str) -> Vec<String> {
    exact_matches_in(&mask_literals(query))
}

/// Write or admin clauses present in the query, upper-cased.
pub fn write_clauses(query: &str) -> BTreeSet<String> {
    write_clauses_in(&mask_literals(query))
}

/// Append `LIMIT n` to a returning query that has none.
pub fn ensure_limit(query: &str, limit: usize) -> String {
    let masked = mask_literals(query);
    if LIMIT_CLAUSE.is_match(&masked) || !RETURN_CLAUSE.is_match(&masked) {
        return query.to_string();
    }
    format!("{} LIMIT {limit}", query.trim_end().trim_end_matches(';').trim_end())
}

fn mask_literals(query: &str) -> String {
    STRING_LITERAL.replace_all(query, "''").into_owned()
}

fn labels_in(masked: &str) -> BTreeSet<String> {
    NODE_LABELS
        .captures_iter(masked)
        .filter_map(|c| c.get(1))
        .flat_map(|m| split_names(m.as_str(), &[':', '&', '|']))
        .collect()
}

fn relationship_types_in(masked: &str) -> BTreeSet<String> {
    REL_TYPES
        .captures_iter(masked)
        .filter_map(|c| c.get(1))
        .flat_map(|m| split_names(m.as_str(), &[':', '|']))
        .collect()
}

fn exact_matches_in(masked: &str) -> Vec<String> {
    let mut found: Vec<String> = EXACT_NAME_EQ
        .captures_iter(masked)
        .chain(EXACT_NAME_EQ_REVERSED.captures_iter(masked))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    found.extend(
        INLINE_NAME_MAP
            .captures_iter(masked)
            .filter_map(|c| c.get(1))
            .map(|m| format!("{{{}: ..}}", m.as_str())),
    );
    found
}

fn write_clauses_in(masked: &str) -> BTreeSet<String> {
    let bare = QUOTED_NAME.replace_all(masked, "``");
    WRITE_CLAUSE
        .captures_iter(&bare)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase())
        .collect()
}

/// Split a `:A:B` / `:A|B` expression into names, honouring backticks.
fn split_names(expr: &str, separators: &[char]) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in expr.chars() {
        match c {
            '`' => quoted = !quoted,
            c if !quoted && (separators.contains(&c) || c == '!' || c.is_whitespace()) => {
                if !current.is_empty() {
                    names.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        names.push(current);
    }
    names
}
