//! OpenAI-compatible provider against a mock chat completions endpoint.

use graphqa::llm::ProviderError;
use graphqa::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, key: Option<&str>) -> OpenAiCompatibleProvider {
    OpenAiCompatibleProvider::new(
        format!("{}/v1/chat/completions", server.uri()),
        "llama-test".to_string(),
        0.0,
        5,
        key.map(str::to_string),
    )
    .unwrap()
}

fn reply(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 3}
    })
}

#[tokio::test]
async fn sends_bearer_key_model_and_temperature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer gsk_live"))
        .and(body_partial_json(json!({"model": "llama-test", "temperature": 0.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("  MATCH (n) RETURN n  ")))
        .expect(1)
        .mount(&server)
        .await;

    let resp = provider(&server, Some("gsk_live")).complete("question", None).await.unwrap();
    assert_eq!(resp.text, "MATCH (n) RETURN n");
    let usage = resp.usage.unwrap();
    assert_eq!((usage.input_tokens, usage.output_tokens), (12, 3));
}

#[tokio::test]
async fn system_prompt_precedes_user_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "messages": [{"role": "system", "content": "sys"}, {"role": "user", "content": "hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let resp = provider(&server, None).complete("hi", Some("sys")).await.unwrap();
    assert_eq!(resp.text, "ok");
}

#[tokio::test]
async fn error_envelope_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid API Key", "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let err = provider(&server, Some("bad")).complete("q", None).await.unwrap_err();
    match err {
        ProviderError::Request(msg) => {
            assert!(msg.contains("401"));
            assert!(msg.contains("[code=invalid_api_key]"));
            assert!(msg.contains("Invalid API Key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_without_retries_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server, Some("k")).complete("q", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited(msg) if msg.contains("Rate limit reached")));
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("after retry")))
        .expect(1)
        .mount(&server)
        .await;

    let resp = provider(&server, Some("k"))
        .with_max_retries(1)
        .complete("q", None)
        .await
        .unwrap();
    assert_eq!(resp.text, "after retry");
}

#[tokio::test]
async fn missing_content_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        })))
        .mount(&server)
        .await;

    let err = provider(&server, None).complete("q", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::EmptyResponse));
}
