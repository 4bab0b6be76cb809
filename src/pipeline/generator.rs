//! Query generation: one completion call turns `(schema, question)` into a
//! single Cypher query.

use std::fmt;

use tracing::{debug, warn};

use crate::graph::Schema;
use crate::llm::{LlmProvider, ProviderError};

use super::PipelineError;
use super::prompt::{self, CYPHER_GENERATION, CYPHER_REPAIR};

/// Reported as the query when the model produced nothing usable.
pub const NO_QUERY_SENTINEL: &str = "No query generated";

/// Keywords a standalone Cypher statement can open with.
const LEADING_KEYWORDS: &[&str] = &[
    "MATCH", "OPTIONAL", "WITH", "UNWIND", "CALL", "RETURN", "CREATE", "MERGE", "USE", "SHOW",
];

/// Labels models like to put in front of the query.
const ANSWER_LABELS: &[&str] = &["cypher query:", "cypher:", "query:"];

/// A query produced by the generation stage. Never modified after creation;
/// a repair produces a new value with a higher `attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    text: String,
    attempt: u32,
}

impl GeneratedQuery {
    pub fn new(text: impl Into<String>, attempt: u32) -> Self {
        Self { text: text.into(), attempt }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// 0 for the first generation, n for the n-th repair.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl fmt::Display for GeneratedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone)]
pub struct QueryGenerator {
    provider: LlmProvider,
}

impl QueryGenerator {
    pub fn new(provider: LlmProvider) -> Self {
        Self { provider }
    }

    /// The generation prompt for `question` against `schema`.
    pub fn prompt(schema: &Schema, question: &str) -> String {
        let rendered = schema.render();
        prompt::render(CYPHER_GENERATION, &[("schema", &rendered), ("question", question)])
    }

    /// Ask the model for a query.
    ///
    /// `Ok(None)` means the model answered with nothing that looks like
    /// Cypher; the caller reports [`NO_QUERY_SENTINEL`] and skips execution.
    pub async fn generate(
        &self,
        schema: &Schema,
        question: &str,
    ) -> Result<Option<GeneratedQuery>, PipelineError> {
        let content = Self::prompt(schema, question);
        self.request(&content, 0).await
    }

    /// Ask the model to correct `failed` given the store's `error`.
    pub async fn repair(
        &self,
        schema: &Schema,
        question: &str,
        failed: &GeneratedQuery,
        error: &str,
    ) -> Result<Option<GeneratedQuery>, PipelineError> {
        let repair = prompt::render(CYPHER_REPAIR, &[("query", failed.as_str()), ("error", error)]);
        let content = format!("{}\n\n{repair}", Self::prompt(schema, question));
        self.request(&content, failed.attempt() + 1).await
    }

    async fn request(&self, content: &str, attempt: u32) -> Result<Option<GeneratedQuery>, PipelineError> {
        let reply = match self.provider.complete(content, None).await {
            Ok(reply) => reply,
            Err(ProviderError::EmptyResponse) => {
                warn!(attempt, "generation returned no content");
                return Ok(None);
            }
            Err(e) => return Err(PipelineError::Generation(e.to_string())),
        };

        match extract_query(&reply.text) {
            Some(text) => {
                debug!(attempt, query = %text, "query generated");
                Ok(Some(GeneratedQuery::new(text, attempt)))
            }
            None => {
                warn!(attempt, raw = %reply.text, "generation output is not a Cypher query");
                Ok(None)
            }
        }
    }
}

/// Pull the query out of a model reply: drop markdown fences, a leading
/// `cypher` tag or `Cypher Query:` label and a trailing `;`.
///
/// Returns `None` unless the remainder opens with a Cypher keyword.
pub fn extract_query(raw: &str) -> Option<String> {
    let mut text = strip_fences(raw.trim());

    loop {
        let lower = text.to_ascii_lowercase();
        if let Some(label) = ANSWER_LABELS.iter().find(|l| lower.starts_with(*l)) {
            text = text[label.len()..].trim_start();
            continue;
        }
        // Bare tag on its own line or before the query: `cypher\nMATCH ..`.
        let rest = text.get(TAG.len()..).unwrap_or_default();
        if lower.starts_with(TAG)
            && rest.starts_with(char::is_whitespace)
            && opens_with_keyword(rest.trim_start())
        {
            text = rest.trim_start();
            continue;
        }
        break;
    }

    let text = text.trim().trim_end_matches(';').trim_end();
    opens_with_keyword(text).then(|| text.to_string())
}

const TAG: &str = "cypher";

fn opens_with_keyword(text: &str) -> bool {
    let first = text
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    LEADING_KEYWORDS.contains(&first.as_str())
}

fn strip_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let body = &text[start + 3..];
    let body = match body.find('\n') {
        // An info string such as `cypher` sits on the opening line.
        Some(nl) if !body[..nl].trim().contains(' ') => &body[nl + 1..],
        _ => body,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::scripted::ScriptedProvider;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.add_node_property("Entity", "name")
            .add_relationship_property("RELATION", "type")
            .add_pattern("Entity", "RELATION", "Entity");
        s
    }

    #[test]
    fn extracts_plain_query() {
        assert_eq!(
            extract_query("  MATCH (n) RETURN n  ").as_deref(),
            Some("MATCH (n) RETURN n")
        );
    }

    #[test]
    fn strips_fences_and_tag() {
        let raw = "```cypher\nMATCH (a)-[r]-(b) RETURN r.type;\n```";
        assert_eq!(extract_query(raw).as_deref(), Some("MATCH (a)-[r]-(b) RETURN r.type"));
        let raw = "Here you go:\n```\nMATCH (n) RETURN n\n```\nHope this helps";
        assert_eq!(extract_query(raw).as_deref(), Some("MATCH (n) RETURN n"));
    }

    #[test]
    fn strips_labels() {
        assert_eq!(
            extract_query("Cypher Query: MATCH (n) RETURN n").as_deref(),
            Some("MATCH (n) RETURN n")
        );
        assert_eq!(
            extract_query("cypher: OPTIONAL MATCH (n) RETURN n").as_deref(),
            Some("OPTIONAL MATCH (n) RETURN n")
        );
        assert_eq!(
            extract_query("cypher\nMATCH (n) RETURN n").as_deref(),
            Some("MATCH (n) RETURN n")
        );
        assert_eq!(
            extract_query("```cypher MATCH (n) RETURN n```").as_deref(),
            Some("MATCH (n) RETURN n")
        );
        assert_eq!(
            extract_query("Cypher MATCH (a)-[r]-(b) RETURN r.type;").as_deref(),
            Some("MATCH (a)-[r]-(b) RETURN r.type")
        );
    }

    #[test]
    fn tag_word_alone_is_not_a_query() {
        assert_eq!(extract_query("cypher"), None);
        assert_eq!(extract_query("cypher is a query language"), None);
    }

    #[test]
    fn rejects_prose() {
        assert_eq!(extract_query(""), None);
        assert_eq!(extract_query("I cannot answer that."), None);
        assert_eq!(extract_query("```\n```"), None);
    }

    #[test]
    fn prompt_embeds_schema_and_question() {
        let p = QueryGenerator::prompt(&schema(), "What is NVIC related to?");
        assert!(p.contains("(:Entity {name})"));
        assert!(p.contains("What is NVIC related to?"));
        assert!(p.contains("toLower(n.name) CONTAINS toLower("));
        assert!(p.contains("(a)-[r]-(b)"));
        assert!(!p.contains("{{"));
    }

    #[tokio::test]
    async fn generate_returns_query() {
        let scripted = ScriptedProvider::new(["```cypher\nMATCH (n:Entity) RETURN n.name\n```"]);
        let generator = QueryGenerator::new(LlmProvider::Scripted(scripted.clone()));
        let q = generator.generate(&schema(), "list").await.unwrap().unwrap();
        assert_eq!(q.as_str(), "MATCH (n:Entity) RETURN n.name");
        assert_eq!(q.attempt(), 0);
        assert_eq!(scripted.prompts().len(), 1);
    }

    #[tokio::test]
    async fn empty_or_prose_output_is_none() {
        let scripted = ScriptedProvider::new(["", "Sorry, no idea."]);
        let generator = QueryGenerator::new(LlmProvider::Scripted(scripted));
        assert!(generator.generate(&schema(), "q").await.unwrap().is_none());
        assert!(generator.generate(&schema(), "q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn provider_failure_is_generation_error() {
        let scripted = ScriptedProvider::default();
        scripted.push_failure("boom");
        let generator = QueryGenerator::new(LlmProvider::Scripted(scripted));
        let err = generator.generate(&schema(), "q").await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }

    #[tokio::test]
    async fn repair_includes_failure_context() {
        let scripted = ScriptedProvider::new(["MATCH (n) RETURN n"]);
        let generator = QueryGenerator::new(LlmProvider::Scripted(scripted.clone()));
        let failed = GeneratedQuery::new("MATCH (n RETURN n", 0);
        let fixed = generator
            .repair(&schema(), "q", &failed, "Neo.ClientError.Statement.SyntaxError: x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fixed.attempt(), 1);
        let sent = &scripted.prompts()[0].content;
        assert!(sent.contains("MATCH (n RETURN n"));
        assert!(sent.contains("SyntaxError"));
    }
}
