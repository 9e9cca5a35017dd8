use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evbudget_core::epistemic::yes_probability_from_logprobs;
use evbudget_core::{
    detect_hallucination, Backend, ClientConfig, CompletionRequest, DetectRequest, Error,
    LLMClient, OpenAIClient, Span,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn yes_body(p_yes: f64) -> Value {
    let rest = ((1.0 - p_yes) / 2.0).ln();
    json!({
        "id": "chatcmpl-test",
        "model": "gpt-4o-mini-2024-07-18",
        "choices": [{
            "message": { "role": "assistant", "content": "YES" },
            "logprobs": {
                "content": [{
                    "token": "YES",
                    "logprob": p_yes.ln(),
                    "bytes": [89, 69, 83],
                    "top_logprobs": [
                        { "token": "YES", "logprob": p_yes.ln(), "bytes": [89, 69, 83] },
                        { "token": "NO", "logprob": rest, "bytes": [78, 79] },
                        { "token": "UNSURE", "logprob": rest, "bytes": null }
                    ]
                }]
            },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 1, "total_tokens": 121 }
    })
}

fn client(server: &MockServer) -> OpenAIClient {
    OpenAIClient::new(
        ClientConfig::new("sk-test")
            .with_base_url(server.uri())
            .with_timeout(5)
            .with_retry_backoff_ms(1),
    )
}

fn entailment_request() -> CompletionRequest {
    CompletionRequest::new("Is the CLAIM entailed?", "gpt-4o-mini").with_logprobs(10)
}

/// Fails with the given status for the first `failures` calls, then succeeds.
struct FlakyResponder {
    calls: Arc<AtomicUsize>,
    failures: usize,
    status: u16,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(self.status)
                .set_body_json(json!({ "error": { "message": "upstream unavailable" } }))
        } else {
            ResponseTemplate::new(200).set_body_json(yes_body(0.8))
        }
    }
}

#[tokio::test]
async fn openai_parses_logprobs_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "logprobs": true,
            "top_logprobs": 10
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(yes_body(0.8)))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).complete(entailment_request()).await.unwrap();

    assert_eq!(response.text, "YES");
    assert_eq!(response.response_id.as_deref(), Some("chatcmpl-test"));
    assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
    assert_eq!(response.usage.input_tokens, 120);
    assert_eq!(response.usage.output_tokens, 1);

    let yes = yes_probability_from_logprobs(response.require_logprobs().unwrap()).unwrap();
    assert!((yes.p_lower - 0.8).abs() < 1e-9);
    assert_eq!(yes.p_lower, yes.p_upper);
}

#[tokio::test]
async fn openai_accepts_base_url_with_version_suffix() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(yes_body(0.6)))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAIClient::new(
        ClientConfig::new("sk-test").with_base_url(format!("{}/v1/", server.uri())),
    );
    let response = client.complete(entailment_request()).await.unwrap();
    assert_eq!(response.text, "YES");
}

#[tokio::test]
async fn openai_omits_logprob_fields_when_not_requested() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(yes_body(0.6)))
        .mount(&server)
        .await;

    let request = CompletionRequest::new("hi", "gpt-4o-mini");
    let response = client(&server).complete(request).await.unwrap();
    assert!(response.logprobs.is_none());

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert!(body.get("logprobs").is_none());
    assert!(body.get("top_logprobs").is_none());
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "hi");
}

#[tokio::test]
async fn openai_retries_server_errors() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(FlakyResponder {
            calls: calls.clone(),
            failures: 2,
            status: 503,
        })
        .mount(&server)
        .await;

    let response = client(&server).complete(entailment_request()).await.unwrap();
    assert_eq!(response.text, "YES");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn openai_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(FlakyResponder {
            calls: calls.clone(),
            failures: usize::MAX,
            status: 429,
        })
        .mount(&server)
        .await;

    let client = OpenAIClient::new(
        ClientConfig::new("sk-test")
            .with_base_url(server.uri())
            .with_max_retries(1)
            .with_retry_backoff_ms(1),
    );
    let err = client.complete(entailment_request()).await.unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("after 2 attempts"));
}

#[tokio::test]
async fn openai_retries_timed_out_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(yes_body(0.8))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = OpenAIClient::new(
        ClientConfig::new("sk-test")
            .with_base_url(server.uri())
            .with_timeout(1)
            .with_max_retries(1)
            .with_retry_backoff_ms(1),
    );
    let err = client.complete(entailment_request()).await.unwrap_err();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert!(!err.is_retryable());
    let message = err.to_string();
    assert!(message.contains("after 2 attempts"), "{message}");
    assert!(message.contains("timed out"), "{message}");
}

#[tokio::test]
async fn openai_does_not_retry_client_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "error": { "message": "Incorrect API key provided" } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).complete(entailment_request()).await.unwrap_err();
    match err {
        Error::LlmApi { provider, message, retryable } => {
            assert_eq!(provider, "openai");
            assert!(message.contains("401"));
            assert!(message.contains("Incorrect API key provided"));
            assert!(!retryable);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn openai_missing_logprobs_surface_as_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "YES" }, "logprobs": null }]
        })))
        .mount(&server)
        .await;

    let response = client(&server).complete(entailment_request()).await.unwrap();
    assert!(response.logprobs.is_none());
    assert!(matches!(response.require_logprobs(), Err(Error::MissingLogprobs)));
}

#[tokio::test]
async fn detect_over_openai_backend_scores_both_passes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(yes_body(0.6)))
        .expect(2)
        .mount(&server)
        .await;

    let backend = Backend::openai(client(&server));
    let request = DetectRequest::new(
        "Water boils at 100 degrees. [S0]",
        vec![Span::new("S0", "Water boils at 100°C at sea level.")],
    );
    let response = detect_hallucination(&backend, &request).await;

    // Identical answers with and without evidence: no information was supplied.
    assert!(response.error.is_none());
    assert!(response.flagged);
    assert_eq!(response.details[0].observed.max, 0.0);
    assert_eq!(response.summary.unwrap().backend, "openai");
}
