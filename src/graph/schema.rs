//! Structural vocabulary of the graph: labels, relationship types, their
//! property names and the observed relationship patterns.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// `(:from)-[:rel_type]->(:to)` as observed in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelationshipPattern {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

/// Snapshot fetched once per run and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    /// label → property names
    pub node_labels: BTreeMap<String, BTreeSet<String>>,
    /// relationship type → property names
    pub relationship_types: BTreeMap<String, BTreeSet<String>>,
    pub patterns: BTreeSet<RelationshipPattern>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_label(&mut self, label: impl Into<String>) -> &mut Self {
        self.node_labels.entry(label.into()).or_default();
        self
    }

    pub fn add_node_property(&mut self, label: impl Into<String>, property: impl Into<String>) -> &mut Self {
        self.node_labels.entry(label.into()).or_default().insert(property.into());
        self
    }

    pub fn add_relationship_type(&mut self, rel_type: impl Into<String>) -> &mut Self {
        self.relationship_types.entry(rel_type.into()).or_default();
        self
    }

    pub fn add_relationship_property(
        &mut self,
        rel_type: impl Into<String>,
        property: impl Into<String>,
    ) -> &mut Self {
        self.relationship_types
            .entry(rel_type.into())
            .or_default()
            .insert(property.into());
        self
    }

    /// Record a pattern; both labels and the type become part of the vocabulary.
    pub fn add_pattern(
        &mut self,
        from: impl Into<String>,
        rel_type: impl Into<String>,
        to: impl Into<String>,
    ) -> &mut Self {
        let pattern = RelationshipPattern {
            from: from.into(),
            rel_type: rel_type.into(),
            to: to.into(),
        };
        self.add_label(pattern.from.clone());
        self.add_label(pattern.to.clone());
        self.add_relationship_type(pattern.rel_type.clone());
        self.patterns.insert(pattern);
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.node_labels.contains_key(label)
    }

    pub fn has_relationship_type(&self, rel_type: &str) -> bool {
        self.relationship_types.contains_key(rel_type)
    }

    pub fn is_empty(&self) -> bool {
        self.node_labels.is_empty() && self.relationship_types.is_empty()
    }

    /// Text form embedded in the generation prompt.
    ///
    /// ```text
    /// Node labels and properties:
    /// (:Entity {name})
    /// Relationship types and properties:
    /// [:RELATION {type}]
    /// Relationship patterns:
    /// (:Entity)-[:RELATION]->(:Entity)
    /// ```
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "(the graph is empty: no labels or relationship types)".to_string();
        }

        let mut out = String::from("Node labels and properties:\n");
        for (label, props) in &self.node_labels {
            out.push_str(&format!("(:{}{})\n", quote_name(label), render_props(props)));
        }

        out.push_str("Relationship types and properties:\n");
        if self.relationship_types.is_empty() {
            out.push_str("(none)\n");
        }
        for (rel_type, props) in &self.relationship_types {
            out.push_str(&format!("[:{}{}]\n", quote_name(rel_type), render_props(props)));
        }

        if !self.patterns.is_empty() {
            out.push_str("Relationship patterns:\n");
            for p in &self.patterns {
                out.push_str(&format!(
                    "(:{})-[:{}]->(:{})\n",
                    quote_name(&p.from),
                    quote_name(&p.rel_type),
                    quote_name(&p.to)
                ));
            }
        }

        out.trim_end().to_string()
    }
}

fn render_props(props: &BTreeSet<String>) -> String {
    if props.is_empty() {
        String::new()
    } else {
        let joined: Vec<&str> = props.iter().map(String::as_str).collect();
        format!(" {{{}}}", joined.join(", "))
    }
}

/// Backtick-quote identifiers Cypher would not accept bare.
pub fn quote_name(name: &str) -> String {
    let bare = !name.is_empty()
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if bare {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Inverse of the `:`/backtick decoration Neo4j puts on type names, e.g.
/// ``":`RELATION`"`` → `RELATION`.
pub fn strip_type_decoration(raw: &str) -> String {
    let s = raw.trim().trim_start_matches(':');
    match s.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        Some(inner) => inner.replace("``", "`"),
        None => s.to_string(),
    }
}
