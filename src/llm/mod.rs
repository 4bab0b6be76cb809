//! Chat-completion backends used for Cypher generation and answer synthesis.
//!
//! The pipeline only ever needs "system prompt + one user turn in, text out",
//! so that is the whole surface. A provider is immutable after construction
//! and is cloned into each pipeline run.

pub mod providers;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported llm provider {0:?}")]
    UnknownProvider(String),
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("llm returned no content")]
    EmptyResponse,
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completion: trimmed, non-empty text plus optional usage.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

/// A configured backend. `Scripted` replays canned replies offline.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Scripted(providers::scripted::ScriptedProvider),
}

impl LlmProvider {
    /// Send `content` as the user turn, with an optional system prompt, and
    /// return the provider's text reply.
    pub async fn complete(
        &self,
        content: &str,
        system: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.complete(content, system).await,
            LlmProvider::Scripted(p) => p.complete(content, system),
        }
    }

    /// Model identifier, for logs.
    pub fn model(&self) -> &str {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.model(),
            LlmProvider::Scripted(_) => "scripted",
        }
    }
}
