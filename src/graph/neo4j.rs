//! Neo4j backend over the HTTP transactional endpoint
//! (`POST {uri}/db/{database}/tx/commit`).
//!
//! Every call is a single auto-committed transaction. Cypher errors come back
//! inside a `200 OK` body and are surfaced verbatim as `code: message`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::config::GraphConfig;
use crate::error::error_chain;

use super::schema::strip_type_decoration;
use super::{EdgeRecord, ENTITY_LABEL, ExecutionResult, GraphCounts, RELATION_TYPE, Row, Schema, StoreError};

#[derive(Debug, Clone)]
pub struct Neo4jStore {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
    batch_size: usize,
    pattern_sample: usize,
}

impl Neo4jStore {
    /// Build the client and verify the store answers with the given credentials.
    pub async fn connect(config: &GraphConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {e}")))?;

        let store = Self {
            client,
            endpoint: commit_endpoint(&config.uri, &config.database),
            user: config.user.clone(),
            password: config.password.clone(),
            batch_size: config.batch_size.max(1),
            pattern_sample: config.pattern_sample,
        };

        store
            .run(vec![Statement::new("RETURN 1 AS ok")], StoreError::Connection)
            .await?;
        debug!(endpoint = %store.endpoint, "graph store reachable");
        Ok(store)
    }

    pub async fn execute(&self, query: &str, params: Row) -> Result<ExecutionResult, StoreError> {
        let statement = Statement { statement: query.to_string(), parameters: params };
        let mut results = self.run(vec![statement], StoreError::QueryExecution).await?;
        let result = results
            .pop()
            .ok_or_else(|| StoreError::Protocol("no result for executed statement".into()))?;
        Ok(ExecutionResult {
            query: query.to_string(),
            rows: result.rows(),
            columns: result.columns,
        })
    }

    pub async fn fetch_schema(&self) -> Result<Schema, StoreError> {
        let statements = vec![
            Statement::new(
                "CALL db.schema.nodeTypeProperties() YIELD nodeLabels, propertyName \
                 RETURN nodeLabels, propertyName",
            ),
            Statement::new(
                "CALL db.schema.relTypeProperties() YIELD relType, propertyName \
                 RETURN relType, propertyName",
            ),
            pattern_sample_statement(self.pattern_sample),
        ];

        let results = self
            .run(statements, StoreError::SchemaFetch)
            .await
            .map_err(|e| match e {
                StoreError::Protocol(msg) => StoreError::SchemaFetch(msg),
                other => other,
            })?;

        let [nodes, rels, patterns] = <[StatementResult; 3]>::try_from(results)
            .map_err(|r| StoreError::SchemaFetch(format!("expected 3 results, got {}", r.len())))?;

        let mut schema = Schema::new();
        for row in nodes.rows() {
            let labels = string_list(row.get("nodeLabels"));
            let property = row.get("propertyName").and_then(Value::as_str);
            for label in labels {
                match property {
                    Some(p) => schema.add_node_property(label, p),
                    None => schema.add_label(label),
                };
            }
        }
        for row in rels.rows() {
            let Some(rel_type) = row.get("relType").and_then(Value::as_str) else {
                continue;
            };
            let rel_type = strip_type_decoration(rel_type);
            match row.get("propertyName").and_then(Value::as_str) {
                Some(p) => schema.add_relationship_property(rel_type, p),
                None => schema.add_relationship_type(rel_type),
            };
        }
        for row in patterns.rows() {
            let Some(rel) = row.get("rel").and_then(Value::as_str) else {
                continue;
            };
            for from in string_list(row.get("from")) {
                for to in string_list(row.get("to")) {
                    schema.add_pattern(from.clone(), rel, to);
                }
            }
        }

        debug!(
            labels = schema.node_labels.len(),
            rel_types = schema.relationship_types.len(),
            patterns = schema.patterns.len(),
            "schema fetched"
        );
        Ok(schema)
    }

    pub async fn ensure_entity_constraint(&self) -> Result<(), StoreError> {
        let statement = format!(
            "CREATE CONSTRAINT entity_name_unique IF NOT EXISTS \
             FOR (n:{ENTITY_LABEL}) REQUIRE n.name IS UNIQUE"
        );
        self.run(vec![Statement::new(statement)], StoreError::QueryExecution)
            .await
            .map(|_| ())
    }

    pub async fn merge_entities(&self, names: &[String]) -> Result<usize, StoreError> {
        let query = format!("UNWIND $names AS name MERGE (:{ENTITY_LABEL} {{name: name}})");
        for batch in names.chunks(self.batch_size) {
            let statement = Statement::new(query.as_str()).param("names", json!(batch));
            self.run(vec![statement], StoreError::QueryExecution).await?;
        }
        Ok(names.len())
    }

    pub async fn merge_relations(&self, edges: &[EdgeRecord]) -> Result<usize, StoreError> {
        let query = format!(
            "UNWIND $rows AS row \
             MATCH (a:{ENTITY_LABEL} {{name: row.source_name}}) \
             MATCH (b:{ENTITY_LABEL} {{name: row.target_name}}) \
             MERGE (a)-[r:{RELATION_TYPE} {{type: row.relation}}]->(b) \
             RETURN count(r) AS merged"
        );
        let mut merged = 0usize;
        for batch in edges.chunks(self.batch_size) {
            let statement = Statement::new(query.as_str()).param("rows", json!(batch));
            let results = self.run(vec![statement], StoreError::QueryExecution).await?;
            merged += results
                .first()
                .and_then(|r| r.first_value())
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
        }
        Ok(merged)
    }

    pub async fn counts(&self) -> Result<GraphCounts, StoreError> {
        let statements = vec![
            Statement::new(format!("MATCH (n:{ENTITY_LABEL}) RETURN count(n) AS n")),
            Statement::new(format!(
                "MATCH (:{ENTITY_LABEL})-[r:{RELATION_TYPE}]->(:{ENTITY_LABEL}) RETURN count(r) AS n"
            )),
        ];
        let results = self.run(statements, StoreError::QueryExecution).await?;
        let count = |i: usize| {
            results
                .get(i)
                .and_then(StatementResult::first_value)
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Ok(GraphCounts { entities: count(0), relations: count(1) })
    }

    /// Post `statements` in one transaction.
    ///
    /// Transport failures and rejected credentials are always
    /// [`StoreError::Connection`]; Cypher errors go through `on_cypher_error`.
    async fn run(
        &self,
        statements: Vec<Statement>,
        on_cypher_error: fn(String) -> StoreError,
    ) -> Result<Vec<StatementResult>, StoreError> {
        let body = TxRequest { statements };
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string(&body).unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(endpoint = %self.endpoint, body = %json, "graph request");
        }

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Connection(error_chain(&e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Connection(format!(
                "credentials rejected for user '{}' (HTTP {status})",
                self.user
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Protocol(format!("HTTP {status}: {text}")));
        }

        let parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Protocol(format!("failed to parse response body: {e}")))?;

        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(on_cypher_error(format!("{}: {}", err.code, err.message)));
        }
        Ok(parsed.results)
    }
}

/// `http://host:7474/` + `neo4j` → `http://host:7474/db/neo4j/tx/commit`.
pub fn commit_endpoint(uri: &str, database: &str) -> String {
    format!("{}/db/{}/tx/commit", uri.trim_end_matches('/'), database)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TxRequest {
    statements: Vec<Statement>,
}

/// Relationships inspected per sampled pattern.
const PATTERN_SCAN_FACTOR: usize = 100;

/// Distinct `(from)-[rel]->(to)` label patterns, read from a bounded prefix
/// of the relationships.
fn pattern_sample_statement(sample: usize) -> Statement {
    let sample = sample.max(1);
    Statement::new(
        "MATCH (a)-[r]->(b) \
         WITH a, r, b LIMIT $scan \
         WITH DISTINCT labels(a) AS from, type(r) AS rel, labels(b) AS to \
         RETURN from, rel, to LIMIT $limit",
    )
    .param("scan", json!(sample.saturating_mul(PATTERN_SCAN_FACTOR)))
    .param("limit", json!(sample))
}

#[derive(Debug, Serialize)]
struct Statement {
    statement: String,
    parameters: Row,
}

impl Statement {
    fn new(statement: impl Into<String>) -> Self {
        Self { statement: statement.into(), parameters: Row::new() }
    }

    fn param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

impl StatementResult {
    fn rows(&self) -> Vec<Row> {
        self.data
            .iter()
            .map(|d| self.columns.iter().cloned().zip(d.row.iter().cloned()).collect())
            .collect()
    }

    fn first_value(&self) -> Option<&Value> {
        self.data.first().and_then(|d| d.row.first())
    }
}

#[derive(Debug, Deserialize)]
struct DataRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}
