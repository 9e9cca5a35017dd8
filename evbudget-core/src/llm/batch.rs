//! Batched completion execution with concurrency control.
//!
//! Requests run in parallel up to a semaphore limit. Failures stay attached
//! to their batch position so callers can pair results with inputs.
//!
//! # Example
//!
//! ```rust,ignore
//! use evbudget_core::llm::{BatchExecutor, CompletionRequest, DummyClient};
//!
//! let executor = BatchExecutor::new(DummyClient::new()).with_max_parallel(4);
//! let results = executor
//!     .execute(vec![
//!         CompletionRequest::new("first", "gpt-4o-mini"),
//!         CompletionRequest::new("second", "gpt-4o-mini"),
//!     ])
//!     .await?;
//! let responses = results.into_responses()?;
//! ```

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::types::{CompletionRequest, CompletionResponse};
use super::LLMClient;
use crate::error::{Error, Result};

/// Default maximum parallel requests.
pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Outcome of a single request in a batch.
#[derive(Debug)]
pub struct BatchQueryResult {
    /// Index of this request in the original batch.
    pub index: usize,
    pub outcome: Result<CompletionResponse>,
}

impl BatchQueryResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Results of a batch, in original order.
#[derive(Debug)]
pub struct BatchedQueryResults {
    pub results: Vec<BatchQueryResult>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Total tokens across successful requests.
    pub total_tokens: u64,
}

impl BatchedQueryResults {
    /// Create from a list of results.
    pub fn from_results(mut results: Vec<BatchQueryResult>) -> Self {
        results.sort_by_key(|r| r.index);

        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.len() - success_count;
        let total_tokens = results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .map(|resp| resp.usage.total())
            .sum();

        Self {
            results,
            success_count,
            failure_count,
            total_tokens,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }

    /// Error messages for failed requests.
    pub fn errors(&self) -> Vec<(usize, String)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (r.index, e.to_string())))
            .collect()
    }

    /// All responses in order, or the first failure.
    pub fn into_responses(self) -> Result<Vec<CompletionResponse>> {
        let mut responses = Vec::with_capacity(self.results.len());
        for result in self.results {
            match result.outcome {
                Ok(response) => responses.push(response),
                Err(e) => {
                    tracing::warn!(index = result.index, error = %e, "batch request failed");
                    return Err(e);
                }
            }
        }
        Ok(responses)
    }
}

/// Executor for batched completions.
///
/// Uses a semaphore for concurrency control to respect rate limits.
pub struct BatchExecutor<C: LLMClient + ?Sized> {
    client: Arc<C>,
    max_parallel: usize,
}

impl<C: LLMClient + 'static> BatchExecutor<C> {
    /// Create a new batch executor.
    pub fn new(client: C) -> Self {
        Self::from_arc(Arc::new(client))
    }
}

impl<C: LLMClient + ?Sized + 'static> BatchExecutor<C> {
    /// Create from an Arc'd client.
    pub fn from_arc(client: Arc<C>) -> Self {
        Self {
            client,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Set the maximum parallel requests (at least 1).
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute requests with bounded concurrency.
    ///
    /// Returns results in the original order. Failed requests don't abort the batch.
    pub async fn execute(&self, requests: Vec<CompletionRequest>) -> Result<BatchedQueryResults> {
        if requests.is_empty() {
            return Ok(BatchedQueryResults::from_results(Vec::new()));
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let tasks: Vec<_> = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                let client = Arc::clone(&self.client);
                let semaphore = Arc::clone(&semaphore);

                async move {
                    let outcome = match semaphore.acquire().await {
                        Ok(_permit) => client.complete(request).await,
                        Err(_) => Err(Error::Internal("Semaphore closed unexpectedly".to_string())),
                    };
                    BatchQueryResult { index, outcome }
                }
            })
            .collect();

        let results = join_all(tasks).await;

        Ok(BatchedQueryResults::from_results(results))
    }
}
