//! LLM client trait and the OpenAI chat-completions implementation.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::types::{CompletionRequest, CompletionResponse, Provider, TokenInfo, TokenUsage};

/// Largest `top_logprobs` value the chat-completions API accepts.
pub const MAX_TOP_LOGPROBS: u8 = 20;

/// LLM client trait for single completions.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the provider for this client.
    fn provider(&self) -> Provider;
}

/// Configuration for HTTP-backed clients.
#[derive(Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Max retries on failure
    pub max_retries: u32,
    /// Backoff unit between attempts; attempt `n` waits `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 1500,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff_ms(mut self, millis: u64) -> Self {
        self.retry_backoff_ms = millis;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed macOS environments can panic during proxy auto-detection
    // in reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e))),
    }
}

/// Cache key for HTTP clients; the credential is stored only as a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    timeout_secs: u64,
    base_url: String,
    credential_digest: String,
}

impl ClientKey {
    fn new(timeout_secs: u64, base_url: &str, api_key: &str) -> Self {
        Self {
            timeout_secs,
            base_url: base_url.to_string(),
            credential_digest: format!("{:x}", Sha256::digest(api_key.as_bytes())),
        }
    }
}

/// HTTP clients keyed by (timeout, endpoint, credential), owned by one client instance.
#[derive(Default)]
struct HttpClientCache {
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl HttpClientCache {
    fn get_or_build(&self, timeout_secs: u64, base_url: &str, api_key: &str) -> Result<Client> {
        let key = ClientKey::new(timeout_secs, base_url, api_key);
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| Error::Internal("HTTP client cache poisoned".to_string()))?;

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(timeout_secs)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn clear(&self) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.clear();
        }
    }

    fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// OpenAI chat-completions client with log-probability support.
pub struct OpenAIClient {
    config: ClientConfig,
    clients: HttpClientCache,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            clients: HttpClientCache::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    /// Accepts both `https://host` and `https://host/v1` style base URLs.
    fn completions_url(&self) -> String {
        let base = self.base_url().trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Drop cached HTTP clients so the next call opens fresh connections.
    pub fn reset_clients(&self) {
        self.clients.clear();
    }

    /// Number of cached HTTP clients.
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }

    async fn complete_once(
        &self,
        http: &Client,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let api_request = OpenAIRequest {
            model: request.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: request.instructions.clone(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            logprobs: request.include_logprobs.then_some(true),
            top_logprobs: request.include_logprobs.then_some(request.top_logprobs),
        };

        let response = http
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(self.config.timeout_secs * 1000)
                } else {
                    Error::llm_api("openai", format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api("openai", format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<OpenAIError>(&body) {
                Ok(error) => format!("OpenAI API error ({}): {}", status, error.error.message),
                Err(_) => format!("OpenAI API error ({}): {}", status, body),
            };
            return Err(if is_retryable_status(status) {
                Error::llm_api("openai", message)
            } else {
                Error::llm_api_permanent("openai", message)
            });
        }

        let api_response: OpenAIResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_api("openai", format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm_api("openai", "No choices in response"))?;

        let logprobs = if request.include_logprobs {
            choice
                .logprobs
                .and_then(|lp| lp.content)
                .filter(|content| !content.is_empty())
        } else {
            None
        };

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text: choice.message.content.unwrap_or_default(),
            response_id: api_response.id,
            model: api_response.model.unwrap_or_else(|| request.model.clone()),
            logprobs,
            usage,
            timestamp: Utc::now(),
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u8>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    #[serde(default)]
    logprobs: Option<OpenAILogprobs>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAILogprobs {
    #[serde(default)]
    content: Option<Vec<TokenInfo>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        if self.config.api_key.trim().is_empty() {
            return Err(Error::Config(
                "OPENAI_API_KEY is not set (required for OpenAI backend)".to_string(),
            ));
        }
        if request.top_logprobs > MAX_TOP_LOGPROBS {
            return Err(Error::invalid_input(format!(
                "top_logprobs must be between 0 and {}",
                MAX_TOP_LOGPROBS
            )));
        }

        let http = self.clients.get_or_build(
            self.config.timeout_secs,
            self.base_url(),
            &self.config.api_key,
        )?;
        let call_timeout = Duration::from_secs(self.config.timeout_secs.max(1));

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            let outcome = match tokio::time::timeout(call_timeout, self.complete_once(&http, &request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(call_timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(response) => {
                    debug!(
                        attempt,
                        tokens = response.usage.total(),
                        "OpenAI completion succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt < self.config.max_retries {
                        let delay =
                            Duration::from_millis(self.config.retry_backoff_ms * (attempt as u64 + 1));
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "OpenAI completion failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let attempts = self.config.max_retries + 1;
        Err(match last_error {
            Some(e) => Error::llm_api_permanent(
                "openai",
                format!("chat call failed after {} attempts: {}", attempts, e),
            ),
            None => Error::Internal("Unexpected retry loop exit".to_string()),
        })
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("sk-test")
            .with_base_url("http://localhost:8080")
            .with_timeout(5)
            .with_max_retries(1)
            .with_retry_backoff_ms(10);

        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_backoff_ms, 10);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ClientConfig::new("sk-very-secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_completions_url_variants() {
        let client = OpenAIClient::new(ClientConfig::new("k"));
        assert_eq!(
            client.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );

        let client = OpenAIClient::new(ClientConfig::new("k").with_base_url("http://proxy/v1/"));
        assert_eq!(client.completions_url(), "http://proxy/v1/chat/completions");
    }

    #[test]
    fn test_client_cache_reuses_by_key() {
        let cache = HttpClientCache::default();
        cache.get_or_build(30, "http://a", "key-1").unwrap();
        cache.get_or_build(30, "http://a", "key-1").unwrap();
        assert_eq!(cache.len(), 1);

        cache.get_or_build(30, "http://a", "key-2").unwrap();
        cache.get_or_build(60, "http://a", "key-1").unwrap();
        cache.get_or_build(30, "http://b", "key-1").unwrap();
        assert_eq!(cache.len(), 4);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_client_key_hides_credential() {
        let key = ClientKey::new(30, "http://a", "sk-secret");
        assert!(!key.credential_digest.contains("sk-secret"));
        assert_eq!(key.credential_digest.len(), 64);
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let client = OpenAIClient::new(ClientConfig::new(""));
        let err = client
            .complete(CompletionRequest::new("p", "gpt-4o-mini"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_top_logprobs_out_of_range() {
        let client = OpenAIClient::new(ClientConfig::new("sk-test"));
        let err = client
            .complete(CompletionRequest::new("p", "gpt-4o-mini").with_logprobs(21))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
