//! Embedding client
//!
//! Maps text to fixed-dimension unit vectors through an external API.
//! Queries and documents are steered differently upstream; batches are
//! capped at 100 texts and input order is preserved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use helmsman_core::{
    l2_normalize, EmbeddingTask, Error as CoreError, Result as CoreResult, TextEmbedder,
};

use crate::LlmError;

/// Upstream batch cap
pub const MAX_BATCH: usize = 100;

/// Embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_concurrency: usize,
}

impl Default for EmbeddingClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "text-embedding-004".to_string(),
            dimensions: 768,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_concurrency: 8,
        }
    }
}

impl From<&helmsman_config::EmbeddingSettings> for EmbeddingClientConfig {
    fn from(s: &helmsman_config::EmbeddingSettings) -> Self {
        Self {
            endpoint: s.endpoint.clone(),
            api_key: s.api_key.clone(),
            model: s.model.clone(),
            dimensions: s.dimensions,
            max_concurrency: s.max_concurrency.max(1),
            ..Self::default()
        }
    }
}

/// External embedding API client
pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingClientConfig,
    permits: Arc<Semaphore>,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingClientConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        let permits = Arc::new(Semaphore::new(config.max_concurrency));
        Ok(Self {
            client,
            config,
            permits,
        })
    }

    fn api_url(&self) -> String {
        format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'))
    }

    fn task_name(task: EmbeddingTask) -> &'static str {
        match task {
            EmbeddingTask::Query => "retrieval.query",
            EmbeddingTask::Document => "retrieval.passage",
        }
    }

    /// One upstream call for a batch of at most [`MAX_BATCH`] texts
    async fn embed_batch(
        &self,
        task: EmbeddingTask,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = EmbedRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
            task: Self::task_name(task).to_string(),
            dimensions: self.config.dimensions,
        };

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                backoff *= 2;
            }

            match self.execute_request(&request).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, "embedding request failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("max retries exceeded".to_string())))
    }

    async fn execute_request(&self, request: &EmbedRequest) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut builder = self.client.post(self.api_url()).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LlmError::Auth(message));
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        // The API returns one entry per input with an index; re-sort so the
        // output order always matches the input order.
        let mut data = body.data;
        data.sort_by_key(|d| d.index);

        if data.len() != request.input.len() {
            return Err(LlmError::Parse(format!(
                "expected {} embeddings, got {}",
                request.input.len(),
                data.len()
            )));
        }

        let mut vectors = Vec::with_capacity(data.len());
        for entry in data {
            if entry.embedding.len() != self.config.dimensions {
                return Err(LlmError::Parse(format!(
                    "expected dimension {}, got {}",
                    self.config.dimensions,
                    entry.embedding.len()
                )));
            }
            let mut v = entry.embedding;
            l2_normalize(&mut v);
            vectors.push(v);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingClient {
    async fn embed(&self, task: EmbeddingTask, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(CoreError::Permanent("cannot embed empty text".into()));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CoreError::Internal("embedding semaphore closed".into()))?;

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            let vectors = self.embed_batch(task, batch).await?;
            out.extend(vectors);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.config.dimensions
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
    task: String,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbedEntry {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names() {
        assert_eq!(EmbeddingClient::task_name(EmbeddingTask::Query), "retrieval.query");
        assert_eq!(
            EmbeddingClient::task_name(EmbeddingTask::Document),
            "retrieval.passage"
        );
    }

    #[test]
    fn test_response_reordered_by_index() {
        let raw = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let mut parsed: EmbedResponse = serde_json::from_value(raw).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
        assert_eq!(parsed.data[1].embedding, vec![0.0, 1.0]);
    }

    #[test]
    fn test_batching_boundaries() {
        let texts: Vec<String> = (0..250).map(|i| format!("t{i}")).collect();
        let batches: Vec<_> = texts.chunks(MAX_BATCH).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 100);
        assert_eq!(batches[2].len(), 50);
    }
}
