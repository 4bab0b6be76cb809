//! In-process graph store.
//!
//! Holds entities and relations natively, so ingestion, counts and schema
//! introspection behave like the real store. It does not evaluate Cypher:
//! `execute` records the query and replays the next scripted result, or
//! returns no rows when nothing is scripted. Clones share state.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EdgeRecord, ENTITY_LABEL, ExecutionResult, GraphCounts, RELATION_TYPE, Row, Schema, StoreError};

#[derive(Debug, Default)]
struct MemoryGraph {
    entities: BTreeSet<String>,
    /// (source, target, relation)
    relations: BTreeSet<(String, String, String)>,
    constraint: bool,
    schema_override: Option<Schema>,
    results: VecDeque<Result<Vec<Row>, String>>,
    executed: Vec<String>,
    unreachable: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    graph: Arc<Mutex<MemoryGraph>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails as if the server were down.
    pub fn unreachable(message: impl Into<String>) -> Self {
        let store = Self::default();
        store.lock().unreachable = Some(message.into());
        store
    }

    /// Report `schema` instead of the one derived from stored data.
    pub fn with_schema(self, schema: Schema) -> Self {
        self.lock().schema_override = Some(schema);
        self
    }

    /// Queue rows for the next `execute`.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.lock().results.push_back(Ok(rows));
    }

    /// Queue a store-side error for the next `execute`.
    pub fn push_error(&self, message: impl Into<String>) {
        self.lock().results.push_back(Err(message.into()));
    }

    /// Every query passed to `execute`, oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn has_entity_constraint(&self) -> bool {
        self.lock().constraint
    }

    pub fn fetch_schema(&self) -> Result<Schema, StoreError> {
        let graph = self.reachable()?;
        if let Some(schema) = &graph.schema_override {
            return Ok(schema.clone());
        }

        let mut schema = Schema::new();
        if !graph.entities.is_empty() {
            schema.add_node_property(ENTITY_LABEL, "name");
        }
        if !graph.relations.is_empty() {
            schema
                .add_relationship_property(RELATION_TYPE, "type")
                .add_pattern(ENTITY_LABEL, RELATION_TYPE, ENTITY_LABEL);
        }
        Ok(schema)
    }

    pub fn execute(&self, query: &str) -> Result<ExecutionResult, StoreError> {
        let mut graph = self.reachable()?;
        graph.executed.push(query.to_string());
        match graph.results.pop_front() {
            Some(Ok(rows)) => {
                let columns = rows
                    .first()
                    .map(|r| r.keys().cloned().collect())
                    .unwrap_or_default();
                Ok(ExecutionResult { query: query.to_string(), columns, rows })
            }
            Some(Err(msg)) => Err(StoreError::QueryExecution(msg)),
            None => Ok(ExecutionResult { query: query.to_string(), ..ExecutionResult::default() }),
        }
    }

    pub fn ensure_entity_constraint(&self) -> Result<(), StoreError> {
        let mut graph = self.reachable()?;
        graph.constraint = true;
        Ok(())
    }

    pub fn merge_entities(&self, names: &[String]) -> Result<usize, StoreError> {
        let mut graph = self.reachable()?;
        graph.entities.extend(names.iter().cloned());
        Ok(names.len())
    }

    pub fn merge_relations(&self, edges: &[EdgeRecord]) -> Result<usize, StoreError> {
        let mut graph = self.reachable()?;
        let mut merged = 0;
        for e in edges {
            if graph.entities.contains(&e.source_name) && graph.entities.contains(&e.target_name) {
                graph.relations.insert((
                    e.source_name.clone(),
                    e.target_name.clone(),
                    e.relation.clone(),
                ));
                merged += 1;
            }
        }
        Ok(merged)
    }

    pub fn counts(&self) -> Result<GraphCounts, StoreError> {
        let graph = self.reachable()?;
        Ok(GraphCounts {
            entities: graph.entities.len() as u64,
            relations: graph.relations.len() as u64,
        })
    }

    fn lock(&self) -> MutexGuard<'_, MemoryGraph> {
        self.graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reachable(&self) -> Result<MutexGuard<'_, MemoryGraph>, StoreError> {
        let graph = self.lock();
        if let Some(msg) = graph.unreachable.clone() {
            return Err(StoreError::Connection(msg));
        }
        Ok(graph)
    }
}
