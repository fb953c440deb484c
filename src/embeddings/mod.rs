#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::{GuideError, Result};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking client for an OpenAI-compatible `/embeddings` endpoint.
///
/// The model identifier is pinned at construction; the indexer records it in
/// the index manifest and the retriever refuses to query an index built with
/// a different model.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    endpoint: Url,
    model: String,
    dimension: usize,
    batch_size: usize,
    api_key: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key()
            .map_err(|e| GuideError::Config(e.to_string()))?;
        Self::with_api_key(config, api_key)
    }

    /// Construct with an explicit key instead of reading the environment.
    #[inline]
    pub fn with_api_key(config: &Config, api_key: String) -> Result<Self> {
        config
            .openai
            .api_base_url()
            .map_err(|e| GuideError::Config(e.to_string()))?;
        let endpoint = Url::parse(&format!(
            "{}/embeddings",
            config.openai.api_base.trim_end_matches('/')
        ))
        .map_err(|e| GuideError::Config(format!("invalid embeddings endpoint: {e}")))?;

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.openai.request_timeout_secs)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.openai.embedding_model.clone(),
            dimension: config.openai.embedding_dimension as usize,
            batch_size: config.openai.batch_size as usize,
            api_key,
            agent,
            retry_attempts: config.openai.retry_attempts,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    /// Pinned embedding model identifier.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Configured vector dimension every returned embedding must match.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text (the query-time path).
    #[inline]
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| GuideError::Service("embedding endpoint returned no data".to_string()))
    }

    /// Embed many texts, splitting into configured batch sizes.
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            results.extend(self.embed_batch(chunk)?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| GuideError::Service(format!("failed to serialize request: {e}")))?;

        let response_text = self.send_with_retry(&request_json)?;

        let response: EmbeddingResponse = serde_json::from_str(&response_text)
            .map_err(|e| GuideError::Service(format!("failed to parse embedding response: {e}")))?;

        if response.data.len() != texts.len() {
            return Err(GuideError::Service(format!(
                "embedding endpoint returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }

        let mut entries = response.data;
        entries.sort_by_key(|entry| entry.index);

        // A wrong-dimension vector would silently corrupt every future
        // lookup, so this is fatal rather than transient.
        for entry in &entries {
            if entry.embedding.len() != self.dimension {
                return Err(GuideError::Config(format!(
                    "embedding dimension mismatch: model {} returned {} dimensions, index is configured for {}",
                    self.model,
                    entry.embedding.len(),
                    self.dimension
                )));
            }
        }

        Ok(entries.into_iter().map(|entry| entry.embedding).collect())
    }

    fn send_with_retry(&self, body: &str) -> Result<String> {
        let auth = format!("Bearer {}", self.api_key);
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            let outcome = self
                .agent
                .post(self.endpoint.as_str())
                .header("Authorization", &auth)
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string());

            match outcome {
                Ok(text) => return Ok(text),
                Err(ureq::Error::StatusCode(status)) if status == 401 || status == 403 => {
                    return Err(GuideError::Config(format!(
                        "embedding endpoint rejected credentials (HTTP {status})"
                    )));
                }
                Err(ureq::Error::StatusCode(status)) if status == 429 || status >= 500 => {
                    warn!(
                        "Embedding endpoint returned HTTP {}, attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                    last_error = Some(GuideError::Service(format!(
                        "embedding endpoint returned HTTP {status}"
                    )));
                }
                Err(ureq::Error::StatusCode(status)) => {
                    return Err(GuideError::Service(format!(
                        "embedding request failed with HTTP {status}"
                    )));
                }
                Err(
                    error @ (ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Embedding transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(GuideError::Service(format!("transport error: {error}")));
                }
                Err(error) => {
                    return Err(GuideError::Service(format!(
                        "embedding request failed: {error}"
                    )));
                }
            }

            if attempt < self.retry_attempts {
                let delay = Duration::from_millis(
                    EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000,
                );
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        Err(last_error
            .unwrap_or_else(|| GuideError::Service("embedding request failed".to_string())))
    }
}
