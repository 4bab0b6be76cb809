//! Runs exactly the generated query against the graph store.

use tracing::debug;

use crate::graph::{ExecutionResult, GraphStore, StoreError};

use super::PipelineError;
use super::generator::GeneratedQuery;

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    store: GraphStore,
}

impl QueryExecutor {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Execute `query` verbatim. The returned result carries the literal text
    /// that ran.
    pub async fn execute(&self, query: &GeneratedQuery) -> Result<ExecutionResult, PipelineError> {
        let result = self
            .store
            .execute(query.as_str())
            .await
            .map_err(|e| execution_error(e, query.as_str()))?;
        debug!(rows = result.len(), attempt = query.attempt(), "query executed");
        Ok(result)
    }
}

fn execution_error(err: StoreError, query: &str) -> PipelineError {
    match err {
        StoreError::Connection(msg) => PipelineError::Connection(msg),
        StoreError::SchemaFetch(msg) => PipelineError::SchemaFetch(msg),
        StoreError::QueryExecution(message) | StoreError::Protocol(message) => {
            PipelineError::QueryExecution { message, query: query.to_string() }
        }
    }
}
