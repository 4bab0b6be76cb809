//! Graph store adapter.
//!
//! [`GraphStore`] is a faithful pass-through to a labeled property graph: it
//! introspects the schema and runs Cypher verbatim. It never validates or
//! rewrites queries.
//!
//! Backends:
//! - [`neo4j::Neo4jStore`]: Neo4j over its HTTP transactional endpoint.
//! - [`memory::MemoryStore`]: in-process graph with scripted query results.

pub mod memory;
pub mod neo4j;
pub mod schema;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GraphConfig;

pub use schema::{RelationshipPattern, Schema};

/// Label every ingested node carries.
pub const ENTITY_LABEL: &str = "Entity";
/// Relationship type every ingested edge carries; the semantic relation is
/// stored in its `type` property.
pub const RELATION_TYPE: &str = "RELATION";

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable or credentials rejected.
    #[error("graph connection failed: {0}")]
    Connection(String),
    #[error("schema fetch failed: {0}")]
    SchemaFetch(String),
    /// The store's own error text, verbatim.
    #[error("{0}")]
    QueryExecution(String),
    #[error("unexpected graph response: {0}")]
    Protocol(String),
}

// ── Results ───────────────────────────────────────────────────────────────────

/// One result row: column name → value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows produced by exactly one query, plus the literal query text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ExecutionResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// One edges-file row: `source_name`, `target_name`, `relation`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source_name: String,
    pub target_name: String,
    pub relation: String,
}

/// Entity and relation totals, used to report ingestion results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub entities: u64,
    pub relations: u64,
}

// ── Store enum ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum GraphStore {
    Neo4j(neo4j::Neo4jStore),
    Memory(memory::MemoryStore),
}

impl GraphStore {
    /// Open a Neo4j connection and verify it answers.
    pub async fn connect(config: &GraphConfig) -> Result<Self, StoreError> {
        Ok(GraphStore::Neo4j(neo4j::Neo4jStore::connect(config).await?))
    }

    pub async fn fetch_schema(&self) -> Result<Schema, StoreError> {
        match self {
            GraphStore::Neo4j(s) => s.fetch_schema().await,
            GraphStore::Memory(s) => s.fetch_schema(),
        }
    }

    /// Run `query` without parameters.
    pub async fn execute(&self, query: &str) -> Result<ExecutionResult, StoreError> {
        self.execute_with(query, Row::new()).await
    }

    pub async fn execute_with(&self, query: &str, params: Row) -> Result<ExecutionResult, StoreError> {
        match self {
            GraphStore::Neo4j(s) => s.execute(query, params).await,
            GraphStore::Memory(s) => s.execute(query),
        }
    }

    /// Uniqueness constraint on `Entity.name`; safe to call repeatedly.
    pub async fn ensure_entity_constraint(&self) -> Result<(), StoreError> {
        match self {
            GraphStore::Neo4j(s) => s.ensure_entity_constraint().await,
            GraphStore::Memory(s) => s.ensure_entity_constraint(),
        }
    }

    /// Merge one `Entity` per name. Returns how many names were submitted.
    pub async fn merge_entities(&self, names: &[String]) -> Result<usize, StoreError> {
        match self {
            GraphStore::Neo4j(s) => s.merge_entities(names).await,
            GraphStore::Memory(s) => s.merge_entities(names),
        }
    }

    /// Merge one `RELATION` per edge whose endpoints exist. Returns how many
    /// edges matched both endpoints.
    pub async fn merge_relations(&self, edges: &[EdgeRecord]) -> Result<usize, StoreError> {
        match self {
            GraphStore::Neo4j(s) => s.merge_relations(edges).await,
            GraphStore::Memory(s) => s.merge_relations(edges),
        }
    }

    pub async fn counts(&self) -> Result<GraphCounts, StoreError> {
        match self {
            GraphStore::Neo4j(s) => s.counts().await,
            GraphStore::Memory(s) => s.counts(),
        }
    }
}

impl From<memory::MemoryStore> for GraphStore {
    fn from(store: memory::MemoryStore) -> Self {
        GraphStore::Memory(store)
    }
}
