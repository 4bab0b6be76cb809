//! Chat completions over the OpenAI wire format.
//!
//! Groq is the default endpoint; OpenAI itself and local servers that mimic
//! it work unchanged. Wire structs stay private and callers see
//! [`LlmResponse`] only.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::error::error_chain;
use crate::llm::{LlmResponse, LlmUsage, ProviderError};

/// Upper bound on a single backoff sleep, whatever `Retry-After` says.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Client for one `chat/completions` endpoint and one model.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key`, when given, goes out as a bearer token.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("http client: {e}")))?;

        Ok(Self {
            client,
            api_base_url,
            model,
            temperature,
            max_tokens: None,
            max_retries: 0,
            api_key,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Retry HTTP 429 up to `max_retries` times. `0` means fail on the first one.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat round-trip: optional system prompt plus `content` as the user turn.
    pub async fn complete(&self, content: &str, system: Option<&str>) -> Result<LlmResponse, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system {
            messages.push(Message { role: "system", content: sys });
        }
        messages.push(Message { role: "user", content });

        let payload = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(model = %self.model, prompt_chars = content.len(), "chat completion request");
        if tracing::enabled!(tracing::Level::TRACE) {
            match serde_json::to_string(&payload) {
                Ok(body) => trace!(%body, "chat completion payload"),
                Err(e) => trace!(error = %e, "chat completion payload not serializable"),
            }
        }

        let mut attempt: u32 = 0;
        let response = loop {
            match self.send(&payload).await {
                Err(RateLimit { message, retry_after }) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = backoff_delay(attempt, retry_after);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        %message,
                        "rate limited by llm endpoint, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(RateLimit { message, .. }) => return Err(ProviderError::RateLimited(message)),
                Ok(outcome) => break outcome?,
            }
        };

        let reply: ChatReply = response.json().await.map_err(|e| {
            error!(error = %e, "chat completion reply is not valid json");
            ProviderError::Request(format!("malformed reply: {e}"))
        })?;
        reply.into_response()
    }

    /// Send once. The outer `Result` separates rate limiting (retryable) from
    /// everything else.
    async fn send(
        &self,
        payload: &ChatRequest<'_>,
    ) -> Result<Result<reqwest::Response, ProviderError>, RateLimit> {
        let mut req = self.client.post(&self.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let msg = error_chain(&e);
                error!(url = %self.api_base_url, error = %msg, "llm endpoint unreachable");
                return Ok(Err(ProviderError::Request(msg)));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(Ok(response));
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let message = describe_failure(response).await;
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RateLimit { message, retry_after });
        }
        error!(%status, %message, "llm endpoint rejected request");
        Ok(Err(ProviderError::Request(message)))
    }
}

struct RateLimit {
    message: String,
    retry_after: Option<Duration>,
}

/// Exponential backoff (1s, 2s, 4s…), never shorter than `Retry-After`.
fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let exponential = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(6));
    retry_after.map_or(exponential, |ra| ra.max(exponential)).min(MAX_BACKOFF)
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<TokenCounts>,
}

impl ChatReply {
    /// First choice, trimmed. A missing, null or blank message is empty.
    fn into_response(self) -> Result<LlmResponse, ProviderError> {
        debug!(choices = self.choices.len(), "chat completion reply");
        let usage = self.usage.map(|u| LlmUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        if let Some(u) = &usage {
            debug!(input_tokens = u.input_tokens, output_tokens = u.output_tokens, "token usage");
        }
        let text = self
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .ok_or(ProviderError::EmptyResponse)?;
        Ok(LlmResponse { text, usage })
    }
}

#[derive(Debug, Deserialize)]
struct TokenCounts {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

// {"error": {"message": .., "code": ..}}
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Turn a non-success response into `HTTP <status> [code=..]: <message>`,
/// falling back to the raw body when it is not the usual envelope.
async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return format!("HTTP {status}: unreadable body ({e})"),
    };
    let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(&body) else {
        return format!("HTTP {status}: {body}");
    };
    let code = match envelope.error.code {
        Some(serde_json::Value::String(c)) => format!(" [code={c}]"),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => format!(" [code={other}]"),
    };
    format!("HTTP {status}{code}: {}", envelope.error.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_delay(1, None), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, None), Duration::from_secs(4));
    }

    #[test]
    fn backoff_honours_retry_after() {
        assert_eq!(backoff_delay(1, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(backoff_delay(3, Some(Duration::from_secs(1))), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_delay(30, Some(Duration::from_secs(3600))), MAX_BACKOFF);
    }

    #[test]
    fn request_omits_absent_max_tokens() {
        let payload = ChatRequest {
            model: "m",
            messages: vec![Message { role: "user", content: "hi" }],
            temperature: 0.0,
            max_tokens: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn reply_text_is_trimmed_with_usage() {
        let reply: ChatReply = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"  MATCH (n) RETURN n \n"}}],
                "usage":{"prompt_tokens":12,"completion_tokens":5}}"#,
        )
        .unwrap();
        let resp = reply.into_response().unwrap();
        assert_eq!(resp.text, "MATCH (n) RETURN n");
        assert_eq!(resp.usage, Some(LlmUsage { input_tokens: 12, output_tokens: 5 }));
    }

    #[test]
    fn blank_reply_is_empty_response() {
        for body in [r#"{"choices":[]}"#, r#"{"choices":[{"message":{"content":"   "}}]}"#] {
            let reply: ChatReply = serde_json::from_str(body).unwrap();
            assert!(matches!(reply.into_response(), Err(ProviderError::EmptyResponse)), "{body}");
        }
    }
}
