//! Backend selection and configuration.
//!
//! A [`Backend`] wraps one concrete client and exposes the three calls the
//! verifier needs: a single completion, an ordered batch, and a state reset
//! between the posterior and prior passes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::batch::{BatchExecutor, DEFAULT_MAX_PARALLEL};
use super::client::{ClientConfig, LLMClient, OpenAIClient};
use super::dummy::DummyClient;
use super::types::{CompletionRequest, CompletionResponse};

/// Which client a [`Backend`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    #[default]
    OpenAI,
    Dummy,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Dummy => "dummy",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "dummy" => Ok(Self::Dummy),
            other => Err(Error::Config(format!(
                "Unknown verifier backend: {:?} (expected \"openai\" or \"dummy\")",
                other
            ))),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Backend configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Maximum in-flight completions per batch (at least 1)
    pub max_concurrency: usize,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Retries per call after the first attempt
    pub max_retries: u32,
    /// Linear backoff unit in milliseconds
    pub retry_backoff_ms: u64,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::OpenAI,
            max_concurrency: DEFAULT_MAX_PARALLEL,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 1500,
            base_url: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl BackendConfig {
    /// Create configuration from environment variables.
    ///
    /// Unparsable numbers fall back to defaults; an unknown backend name is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from any variable source, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let kind = match value("EVBUDGET_VERIFIER_BACKEND") {
            Some(name) => name.parse()?,
            None => defaults.kind,
        };

        Ok(Self {
            kind,
            max_concurrency: parse_var(value("EVBUDGET_MAX_CONCURRENCY"))
                .unwrap_or(defaults.max_concurrency)
                .max(1),
            timeout_secs: parse_var(value("EVBUDGET_TIMEOUT_SECS")).unwrap_or(defaults.timeout_secs),
            max_retries: parse_var(value("EVBUDGET_MAX_RETRIES")).unwrap_or(defaults.max_retries),
            retry_backoff_ms: defaults.retry_backoff_ms,
            base_url: value("OPENAI_BASE_URL"),
            api_key: value("OPENAI_API_KEY"),
        })
    }

    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
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

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.api_key.clone().unwrap_or_default())
            .with_timeout(self.timeout_secs)
            .with_max_retries(self.max_retries)
            .with_retry_backoff_ms(self.retry_backoff_ms);
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        config
    }
}

fn parse_var<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| s.trim().parse().ok())
}

#[derive(Clone)]
enum BackendClient {
    OpenAI(Arc<OpenAIClient>),
    Dummy(Arc<DummyClient>),
}

/// A completion backend with bounded batch concurrency.
#[derive(Clone)]
pub struct Backend {
    client: BackendClient,
    max_concurrency: usize,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl Backend {
    /// Build the backend a configuration names.
    ///
    /// A missing OpenAI key is reported on the first call, not here.
    pub fn from_config(config: &BackendConfig) -> Self {
        let client = match config.kind {
            BackendKind::OpenAI => {
                BackendClient::OpenAI(Arc::new(OpenAIClient::new(config.client_config())))
            }
            BackendKind::Dummy => BackendClient::Dummy(Arc::new(DummyClient::new())),
        };
        info!(backend = %config.kind, max_concurrency = config.max_concurrency, "verifier backend ready");
        Self {
            client,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Create configuration from environment variables and build the backend.
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_config(&BackendConfig::from_env()?))
    }

    /// Wrap a configured dummy client.
    pub fn dummy(client: DummyClient) -> Self {
        Self {
            client: BackendClient::Dummy(Arc::new(client)),
            max_concurrency: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Wrap a configured OpenAI client.
    pub fn openai(client: OpenAIClient) -> Self {
        Self {
            client: BackendClient::OpenAI(Arc::new(client)),
            max_concurrency: DEFAULT_MAX_PARALLEL,
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn kind(&self) -> BackendKind {
        match self.client {
            BackendClient::OpenAI(_) => BackendKind::OpenAI,
            BackendClient::Dummy(_) => BackendKind::Dummy,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn client(&self) -> Arc<dyn LLMClient> {
        match &self.client {
            BackendClient::OpenAI(c) => Arc::clone(c) as Arc<dyn LLMClient>,
            BackendClient::Dummy(c) => Arc::clone(c) as Arc<dyn LLMClient>,
        }
    }

    /// Run one completion.
    pub async fn call_text(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.client().complete(request).await
    }

    /// Run completions concurrently; responses come back in request order.
    /// Fails if any request fails after its own retries.
    pub async fn call_text_batch(
        &self,
        requests: Vec<CompletionRequest>,
    ) -> Result<Vec<CompletionResponse>> {
        let count = requests.len();
        let executor =
            BatchExecutor::from_arc(self.client()).with_max_parallel(self.max_concurrency);
        let started = std::time::Instant::now();
        let results = executor.execute(requests).await?;
        debug!(
            count,
            succeeded = results.success_count,
            tokens = results.total_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        results.into_responses()
    }

    /// Drop transient connection state between independent passes.
    pub fn reset_state(&self) {
        match &self.client {
            BackendClient::OpenAI(c) => c.reset_clients(),
            BackendClient::Dummy(_) => {}
        }
    }
}
