//! Question → Cypher → rows → answer.
//!
//! A [`Pipeline`] run walks the stages in [`Stage`] order, strictly one after
//! the other. Any stage failure ends the run in [`Stage::Failed`] and becomes
//! an error-carrying [`PipelineOutcome`]; nothing escapes as a fault.
//!
//! ```text
//! Idle → SchemaFetch → QueryGenerate → QueryExecute → AnswerSynthesize → Done
//!                ╲            ╲              ╲                 ╲
//!                 └────────────┴──────────────┴─────────────────┴──→ Failed
//! ```

pub mod executor;
pub mod generator;
pub mod guard;
pub mod prompt;
pub mod synthesizer;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, QueryConfig};
use crate::graph::{ExecutionResult, GraphStore, Schema, StoreError};
use crate::llm::LlmProvider;

pub use executor::QueryExecutor;
pub use generator::{GeneratedQuery, NO_QUERY_SENTINEL, QueryGenerator};
pub use synthesizer::{AnswerSynthesizer, NO_RESULTS_ANSWER};

/// `cypher` value of every failed outcome.
pub const ERROR_QUERY_SENTINEL: &str = "Error - No Query";

const CONNECTION_HINT: &str = " (Check that the Neo4j server is running.)";

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Database connection failed: {0}")]
    Connection(String),
    #[error("Schema retrieval failed: {0}")]
    SchemaFetch(String),
    #[error("Query generation failed: {0}")]
    Generation(String),
    #[error("Query execution failed: {message} (query: {query})")]
    QueryExecution { message: String, query: String },
    #[error("Answer synthesis failed: {0}")]
    Synthesis(String),
}

impl PipelineError {
    /// Stage whose work raised this error. Connection failures are attributed
    /// to the first store contact.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Connection(_) | PipelineError::SchemaFetch(_) => Stage::SchemaFetch,
            PipelineError::Generation(_) => Stage::QueryGenerate,
            PipelineError::QueryExecution { .. } => Stage::QueryExecute,
            PipelineError::Synthesis(_) => Stage::AnswerSynthesize,
        }
    }

    /// Message shown to the user, with a hint when the store refused the
    /// connection.
    pub fn user_message(&self) -> String {
        let mut msg = self.to_string();
        if msg.to_ascii_lowercase().contains("connection refused") {
            msg.push_str(CONNECTION_HINT);
        }
        msg
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => PipelineError::Connection(msg),
            StoreError::SchemaFetch(msg) | StoreError::QueryExecution(msg) | StoreError::Protocol(msg) => {
                PipelineError::SchemaFetch(msg)
            }
        }
    }
}

// ── Stage ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    SchemaFetch,
    QueryGenerate,
    QueryExecute,
    AnswerSynthesize,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::SchemaFetch => "schema_fetch",
            Stage::QueryGenerate => "query_generate",
            Stage::QueryExecute => "query_execute",
            Stage::AnswerSynthesize => "answer_synthesize",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    fn enter(&mut self, next: Stage) {
        debug!(from = self.as_str(), to = next.as_str(), "stage");
        *self = next;
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// The single result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub answer: String,
    pub cypher: String,
}

impl PipelineOutcome {
    pub fn success(answer: impl Into<String>, cypher: impl Into<String>) -> Self {
        Self { answer: answer.into(), cypher: cypher.into() }
    }

    pub fn failure(err: &PipelineError) -> Self {
        Self::error_message(err.user_message())
    }

    /// Failed outcome with a free-form message, for errors raised outside a run.
    pub fn error_message(message: impl fmt::Display) -> Self {
        Self {
            answer: format!("ERROR: {message}"),
            cypher: ERROR_QUERY_SENTINEL.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.cypher == ERROR_QUERY_SENTINEL
    }

    /// Single-line JSON object `{"answer": .., "cypher": ..}`.
    pub fn to_json(&self) -> String {
        serde_json::json!({ "answer": self.answer, "cypher": self.cypher }).to_string()
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Pipeline {
    generator: QueryGenerator,
    executor: QueryExecutor,
    synthesizer: AnswerSynthesizer,
    policy: QueryConfig,
}

impl Pipeline {
    pub fn new(store: GraphStore, provider: LlmProvider, policy: QueryConfig) -> Self {
        Self {
            generator: QueryGenerator::new(provider.clone()),
            executor: QueryExecutor::new(store),
            synthesizer: AnswerSynthesizer::new(provider, policy.max_context_rows),
            policy,
        }
    }

    /// Open the configured graph store and build a pipeline over it.
    pub async fn connect(config: &Config, provider: LlmProvider) -> Result<Self, PipelineError> {
        let store = GraphStore::connect(&config.graph).await.map_err(|e| match e {
            StoreError::Connection(msg) => PipelineError::Connection(msg),
            other => PipelineError::Connection(other.to_string()),
        })?;
        Ok(Self::new(store, provider, config.query.clone()))
    }

    pub fn store(&self) -> &GraphStore {
        self.executor.store()
    }

    /// Answer `question`. Always yields exactly one outcome.
    pub async fn run(&self, question: &str) -> PipelineOutcome {
        let run_id = Uuid::now_v7();
        let span = info_span!("run", %run_id);
        async {
            let mut stage = Stage::Idle;
            let outcome = match self.try_run(question, &mut stage).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(stage = %e.stage(), reached = %stage, error = %e, "run failed");
                    stage.enter(Stage::Failed);
                    PipelineOutcome::failure(&e)
                }
            };
            info!(error = outcome.is_error(), cypher = %outcome.cypher, "run finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn try_run(&self, question: &str, stage: &mut Stage) -> Result<PipelineOutcome, PipelineError> {
        stage.enter(Stage::SchemaFetch);
        let schema = self.store().fetch_schema().await?;

        stage.enter(Stage::QueryGenerate);
        let Some(mut query) = self.generator.generate(&schema, question).await? else {
            stage.enter(Stage::AnswerSynthesize);
            let answer = self.synthesizer.synthesize(question, &ExecutionResult::default()).await?;
            stage.enter(Stage::Done);
            return Ok(PipelineOutcome::success(answer, NO_QUERY_SENTINEL));
        };

        stage.enter(Stage::QueryExecute);
        let result = loop {
            let message = match self.attempt(&query, &schema).await? {
                Ok(result) => break result,
                Err(message) => message,
            };
            if query.attempt() >= self.policy.repair_attempts {
                return Err(PipelineError::QueryExecution { message, query: query.to_string() });
            }

            debug!(attempt = query.attempt(), error = %message, "requesting query repair");
            stage.enter(Stage::QueryGenerate);
            query = match self.generator.repair(&schema, question, &query, &message).await? {
                Some(repaired) => repaired,
                None => return Err(PipelineError::QueryExecution { message, query: query.to_string() }),
            };
            stage.enter(Stage::QueryExecute);
        };

        stage.enter(Stage::AnswerSynthesize);
        let answer = self.synthesizer.synthesize(question, &result).await?;
        stage.enter(Stage::Done);
        Ok(PipelineOutcome::success(answer, result.query))
    }

    /// Guard and execute one query.
    ///
    /// The inner `Err` is a rejection or store-side failure the repair loop
    /// may act on; the outer `Err` ends the run.
    async fn attempt(
        &self,
        query: &GeneratedQuery,
        schema: &Schema,
    ) -> Result<Result<ExecutionResult, String>, PipelineError> {
        let report = match guard::apply(query.as_str(), schema, &self.policy) {
            Ok(report) => report,
            Err(violations) => {
                let reasons: Vec<String> = violations.iter().map(ToString::to_string).collect();
                return Ok(Err(format!("query rejected: {}", reasons.join("; "))));
            }
        };
        for w in &report.warnings {
            warn!(warning = %w, "query guard");
        }

        let guarded = GeneratedQuery::new(report.query, query.attempt());
        match self.executor.execute(&guarded).await {
            Ok(result) => Ok(Ok(result)),
            Err(PipelineError::QueryExecution { message, .. }) => Ok(Err(message)),
            Err(e) => Err(e),
        }
    }
}

/// Connect, run once, and return the outcome. Connection failures become a
/// failed outcome like any other stage error.
pub async fn ask(config: &Config, provider: &LlmProvider, question: &str) -> PipelineOutcome {
    match Pipeline::connect(config, provider.clone()).await {
        Ok(pipeline) => pipeline.run(question).await,
        Err(e) => {
            warn!(error = %e, "graph store unavailable");
            PipelineOutcome::failure(&e)
        }
    }
}
