//! Answer synthesis: question plus result rows in, plain-language answer out.

use serde_json::Value;
use tracing::{debug, warn};

use crate::graph::ExecutionResult;
use crate::llm::{LlmProvider, ProviderError};

use super::PipelineError;
use super::prompt::{self, ANSWER_SYNTHESIS};

/// Returned for an empty result set, without a model call.
pub const NO_RESULTS_ANSWER: &str =
    "I could not find any information about that in the knowledge graph.";

#[derive(Debug, Clone)]
pub struct AnswerSynthesizer {
    provider: LlmProvider,
    max_context_rows: usize,
}

impl AnswerSynthesizer {
    pub fn new(provider: LlmProvider, max_context_rows: usize) -> Self {
        Self { provider, max_context_rows: max_context_rows.max(1) }
    }

    /// Prompt for `question` over at most `max_context_rows` rows of `result`.
    pub fn prompt(&self, question: &str, result: &ExecutionResult) -> String {
        let shown = &result.rows[..result.len().min(self.max_context_rows)];
        let results = shown
            .iter()
            .map(|row| Value::Object(row.clone()).to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let truncated = if shown.len() < result.len() {
            format!(", first {} shown", shown.len())
        } else {
            String::new()
        };
        prompt::render(
            ANSWER_SYNTHESIS,
            &[
                ("question", question),
                ("row_count", &result.len().to_string()),
                ("truncated", &truncated),
                ("results", &results),
            ],
        )
    }

    pub async fn synthesize(&self, question: &str, result: &ExecutionResult) -> Result<String, PipelineError> {
        if result.is_empty() {
            debug!("no rows; skipping synthesis call");
            return Ok(NO_RESULTS_ANSWER.to_string());
        }

        let content = self.prompt(question, result);
        match self.provider.complete(&content, None).await {
            Ok(reply) => Ok(reply.text),
            Err(ProviderError::EmptyResponse) => {
                warn!("synthesis returned no content");
                Ok(NO_RESULTS_ANSWER.to_string())
            }
            Err(e) => Err(PipelineError::Synthesis(e.to_string())),
        }
    }
}
